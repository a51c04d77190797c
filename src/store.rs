//! Environment management: one engine per named environment, lazily opened
//! under a shared base directory.
//!
//! Layout per environment:
//!
//! ```text
//! <base>/<env>/db/        segments, compaction scratch, transactions, …
//! <base>/<env>/buffer/    write-log pages + inventory
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::info;

use crate::engine::{Engine, EngineConfig, EngineError};

/// The environment used when none is named.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Maps environment names to engines.
pub struct Store {
    base: PathBuf,
    config: EngineConfig,
    engines: Mutex<HashMap<String, Engine>>,
}

impl Store {
    /// Create a store rooted at `base`.  Environments open lazily.
    pub fn open(base: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            base: base.into(),
            config,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// The engine for `name`, opening it on first use.  An empty name maps
    /// to [`DEFAULT_ENVIRONMENT`].
    pub fn environment(&self, name: &str) -> Result<Engine, EngineError> {
        let name = if name.is_empty() {
            DEFAULT_ENVIRONMENT
        } else {
            name
        };
        validate_environment(name)?;

        let mut engines = self
            .engines
            .lock()
            .map_err(|_| EngineError::Internal("store lock poisoned".into()))?;
        if let Some(engine) = engines.get(name) {
            return Ok(engine.clone());
        }

        let root = self.base.join(name);
        let engine = Engine::open(root.join("db"), root.join("buffer"), self.config.clone())?;
        info!(environment = name, "environment opened");
        engines.insert(name.to_string(), engine.clone());
        Ok(engine)
    }

    /// The engine for [`DEFAULT_ENVIRONMENT`].
    pub fn default_environment(&self) -> Result<Engine, EngineError> {
        self.environment(DEFAULT_ENVIRONMENT)
    }

    /// Close every opened environment.
    pub fn close(&self) -> Result<(), EngineError> {
        let engines = self
            .engines
            .lock()
            .map_err(|_| EngineError::Internal("store lock poisoned".into()))?;
        for engine in engines.values() {
            engine.close()?;
        }
        Ok(())
    }
}

/// Environment identifiers are non-empty ASCII without path separators.
fn validate_environment(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidArgument(
            "environment name must not be empty".into(),
        ));
    }
    if !name.is_ascii() {
        return Err(EngineError::InvalidArgument(format!(
            "environment name {name:?} must be ASCII"
        )));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(EngineError::InvalidArgument(format!(
            "environment name {name:?} must not contain path separators"
        )));
    }
    Ok(())
}
