//! Small persisted per-repository state
//!
//! A plain `key=value` file inside a repository directory, shared by
//! independent writers that each own different keys.

pub mod memory;
pub mod store;

pub use memory::{parse_memory_mb, HeapLadder, HeapLimits, MemoryTuning, TuningScope, DEFAULT_HEAP_FACTOR};
pub use store::{RepositoryStateStore, DEFAULT_STATE_FILE};
