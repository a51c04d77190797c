//! # Compactor
//!
//! Background merging of adjacent segments.  A pass selects the adjacent
//! run whose combined file size is smallest (size-tiered flavor), rewrites
//! the run's writes into one replacement segment in the scratch directory,
//! moves it into the segments directory, and swaps it into the live list
//! under the engine's storage gate.
//!
//! Two schedules share this code: **minor** passes merge an adjacent pair
//! and run frequently; **major** passes merge broader runs during quiet
//! periods.  Both preserve every revision and the combined
//! `[min_version, max_version]` range, so the result of every read
//! operation at every timestamp is identical before and after a pass.

#[cfg(test)]
mod tests;

use std::fs;
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::{Engine, EngineError};
use crate::model::Write;
use crate::segment::{Segment, SegmentConfig};

/// Run one compaction pass merging up to `run_len` adjacent segments.
///
/// Returns `true` when a merge happened, `false` when fewer than two
/// segments exist or `run_len` does not permit a merge.
pub(crate) fn run(engine: &Engine, run_len: usize) -> Result<bool, EngineError> {
    if run_len < 2 {
        return Ok(false);
    }
    let segments = engine.shared.database.segments();
    if segments.len() < 2 {
        return Ok(false);
    }

    let window = run_len.min(segments.len());
    let start = smallest_adjacent_run(&segments, window);
    let run = &segments[start..start + window];

    let mut writes: Vec<Write> = Vec::new();
    for segment in run {
        writes.extend(segment.writes()?);
    }
    debug!(
        segments = run.len(),
        writes = writes.len(),
        "compaction pass selected a run"
    );

    // Build in the scratch directory, then move the sealed file into the
    // segments directory and open it from its final home.
    let min_version = run[0].min_version();
    let scratch = engine
        .shared
        .database
        .compaction_dir()
        .join(Segment::file_name(min_version));
    let built = Segment::build(
        &scratch,
        &writes,
        SegmentConfig {
            bloom_fp_rate: engine.shared.config.bloom_fp_rate,
            max_token_length: engine.shared.config.max_token_length,
        },
    )?;
    drop(built);

    let destination = engine
        .shared
        .database
        .segments_dir()
        .join(Segment::file_name(min_version));

    // The run's oldest member shares the merged segment's file name; move
    // it aside so the rename cannot clobber a live mapping.
    let displaced = destination.with_extension("old");
    let destination_occupied = destination.exists();
    if destination_occupied {
        fs::rename(&destination, &displaced)?;
    }
    fs::rename(&scratch, &destination)?;

    let merged = Arc::new(Segment::open(&destination)?);
    match engine.swap_segments(run, Arc::clone(&merged)) {
        Ok(()) => {
            if destination_occupied {
                let _ = fs::remove_file(&displaced);
            }
            info!(
                merged = %destination.display(),
                replaced = run.len(),
                "compaction pass complete"
            );
            Ok(true)
        }
        Err(e) => {
            // Roll the rename back so the on-disk state matches the list.
            let _ = fs::remove_file(&destination);
            if destination_occupied {
                let _ = fs::rename(&displaced, &destination);
            }
            Err(e)
        }
    }
}

/// Index of the adjacent `window`-length run with the smallest combined
/// file size.
fn smallest_adjacent_run(segments: &[Arc<Segment>], window: usize) -> usize {
    let mut best_start = 0;
    let mut best_size = u64::MAX;
    for start in 0..=segments.len() - window {
        let size: u64 = segments[start..start + window]
            .iter()
            .map(|s| s.file_size())
            .sum();
        if size < best_size {
            best_size = size;
            best_start = start;
        }
    }
    best_start
}
