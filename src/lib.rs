//! # tripledb
//!
//! A versioned, transactional, schema-less record store.  Data is organized
//! as `{record, key, value}` triples where each key holds a multi-valued
//! set; every change is an immutable ADD/REMOVE **revision**, so the store
//! supports point-in-time reads, audit, and revert.  Presence follows the
//! odd-parity rule: a triple is present iff the count of its matching
//! revisions is odd.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Engine                             │
//! │  ┌───────────────┐   transport   ┌──────────────────────┐  │
//! │  │    Buffer     │ ────────────► │  Database (segments) │  │
//! │  │  mmap pages   │               │  table/index/corpus  │  │
//! │  │  + inventory  │               │  chunks + bloom +    │  │
//! │  └───────────────┘               │  manifest            │  │
//! │          ▲                       └──────────┬───────────┘  │
//! │          │ accept                           │ compaction   │
//! │  ┌───────┴────────┐               ┌─────────▼───────────┐  │
//! │  │ AtomicOperation│               │      Compactor      │  │
//! │  │ / Transaction  │               │  (adjacent merges)  │  │
//! │  └────────────────┘               └─────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Orchestration and the full operation surface |
//! | [`buffer`] | Page-based, mmap-backed append-only write log + inventory |
//! | [`segment`] | Immutable three-chunk on-disk artifacts |
//! | [`chunk`] | Table/index/corpus revision blocks and the corpus tokenizer |
//! | [`record`] | In-memory materializations with parity reads |
//! | [`bloom`] | Composite bloom filters for sealed chunks |
//! | [`manifest`] | Locator → byte-range maps inside chunks |
//! | [`database`] | Ordered segment list, record cache, read fan-out |
//! | [`lock`] | Token lock service and range lock service |
//! | [`transaction`] | MVCC atomic operations and durable transactions |
//! | [`compactor`] | Background merging of adjacent segments |
//! | [`query`] | Postfix criteria evaluation (find operators) |
//! | [`encoding`] | Deterministic big-endian wire encoding |
//! | [`store`] | Environment → engine mapping |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tripledb::{Engine, EngineConfig, Value};
//!
//! let engine = Engine::open("/tmp/db", "/tmp/buffer", EngineConfig::default()).unwrap();
//!
//! engine.add("name", Value::String("jeff".into()), 1).unwrap();
//! assert!(engine.verify("name", &Value::String("jeff".into()), 1).unwrap());
//!
//! // Serializable transaction.
//! let mut txn = engine.stage();
//! txn.add("age", Value::Int64(30), 1).unwrap();
//! txn.commit().unwrap();
//!
//! engine.close().unwrap();
//! ```

pub mod bloom;
pub mod buffer;
pub mod chunk;
pub mod compactor;
pub mod database;
pub mod encoding;
pub mod engine;
pub mod lock;
pub mod manifest;
pub mod model;
pub mod query;
pub mod record;
pub mod segment;
pub mod store;
pub mod transaction;

pub use engine::{Calculation, Engine, EngineConfig, EngineError, TransportMode};
pub use model::{Action, Identifier, Key, Value, ValueKind, Write};
pub use query::{Conjunction, Operator, Symbol};
pub use store::Store;
pub use transaction::{AtomicOperation, Transaction, TransactionError};
