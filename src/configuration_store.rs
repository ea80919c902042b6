//! A thread-safe in-memory storage for the currently active project configuration.
//! [`ConfigurationStore`] provides concurrent access for readers (decisions) and writers (whatever
//! fetches new datafiles).
use std::sync::{Arc, RwLock};

use crate::project::ProjectConfig;

/// Source of the configuration snapshot decisions are made against.
///
/// A decision reads the snapshot once and uses it to the end, so a concurrent swap never shows
/// it a half-updated configuration.
pub trait ConfigProvider: Send + Sync {
    /// Currently-active snapshot, or `None` if no configuration has been published yet.
    fn get_configuration(&self) -> Option<Arc<ProjectConfig>>;
}

/// `ConfigurationStore` provides a thread-safe (`Sync`) storage for the project configuration
/// that allows concurrent access for readers and writers.
///
/// `ProjectConfig` itself is always immutable and can only be replaced completely.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<ProjectConfig>>>,
}

impl ConfigurationStore {
    /// Create a new empty configuration store.
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    pub fn get_configuration(&self) -> Option<Arc<ProjectConfig>> {
        // Only a writer panicking mid-swap can poison the lock, and swaps never panic.
        let configuration = self
            .configuration
            .read()
            .expect("thread holding configuration lock should not panic");

        configuration.clone()
    }

    /// Publish a new snapshot.
    pub fn set_configuration(&self, config: Arc<ProjectConfig>) {
        log::debug!(target: "decision_core", revision = config.revision();
            "publishing project configuration");

        let mut configuration_slot = self
            .configuration
            .write()
            .expect("thread holding configuration lock should not panic");

        *configuration_slot = Some(config);
    }
}

impl ConfigProvider for ConfigurationStore {
    fn get_configuration(&self) -> Option<Arc<ProjectConfig>> {
        ConfigurationStore::get_configuration(self)
    }
}
