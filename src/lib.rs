//! gitmirror - local cache of bare git mirrors
//!
//! Maps remote repository URLs to dedicated mirror directories under one
//! cache root, keeps that mapping safe across crashes and processes, and
//! manages mirror lifecycle: invalidation, reset, expiry and eviction.

pub mod cli;
pub mod config;
pub mod error;
pub mod evict;
pub mod mirror;
pub mod persist;
pub mod reset;
pub mod state;

pub use error::{MirrorError, MirrorResult};
pub use mirror::MirrorManager;
