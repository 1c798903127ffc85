//! Shared, runtime-updatable view of the configuration.

use crate::settings::{BatchLimits, BeaconConfig, SessionLimits, UploadSettings};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Cheaply cloneable handle every component reads limits through.
///
/// Updates replace the whole config under a short write lock; readers take
/// snapshots, never holding the lock across any async boundary.
#[derive(Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<BeaconConfig>>,
}

impl ConfigHandle {
    pub fn new(config: BeaconConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Full snapshot of the current config.
    pub fn snapshot(&self) -> BeaconConfig {
        self.inner.read().clone()
    }

    pub fn batch_limits(&self) -> BatchLimits {
        self.inner.read().batch.clone()
    }

    pub fn session_limits(&self) -> SessionLimits {
        self.inner.read().session.clone()
    }

    pub fn upload_settings(&self) -> UploadSettings {
        self.inner.read().upload.clone()
    }

    pub fn crash_signal_ignore_list(&self) -> Vec<String> {
        self.inner.read().crash_signal_ignore_list.clone()
    }

    /// Replace the configuration, e.g. when the remote config collaborator
    /// delivers new limits.
    pub fn replace(&self, config: BeaconConfig) {
        info!("applying updated pipeline configuration");
        *self.inner.write() = config;
    }

    /// Mutate the configuration in place.
    pub fn update(&self, f: impl FnOnce(&mut BeaconConfig)) {
        let mut guard = self.inner.write();
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_visible_to_other_clones() {
        let handle = ConfigHandle::default();
        let other = handle.clone();

        handle.update(|c| c.batch.max_records_per_batch = 2);

        assert_eq!(other.batch_limits().max_records_per_batch, 2);
    }
}
