//! CLI command implementations

pub mod cache;
pub mod config;
pub mod mirror;
pub mod state;

pub use cache::execute as cache;
pub use config::execute as config;
pub use mirror::{cleanup, evict, invalidate, list, resolve};
pub use state::execute as state;

use crate::config::Config;
use crate::error::{MirrorError, MirrorResult};
use crate::mirror::MirrorManager;
use std::sync::Arc;
use tracing::debug;

/// Open the mirror cache configured in `config`
pub(crate) fn open_manager(config: &Config) -> MirrorResult<Arc<MirrorManager>> {
    let root = config.mirrors.cache_dir();
    debug!("Using mirror cache at {}", root.display());
    MirrorManager::open(root).map(Arc::new)
}

/// Run blocking filesystem work off the async runtime
pub(crate) async fn blocking<T, F>(work: F) -> MirrorResult<T>
where
    F: FnOnce() -> MirrorResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MirrorError::Internal(format!("background task failed: {e}")))?
}
