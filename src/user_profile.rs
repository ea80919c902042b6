//! Sticky bucketing through an external user-profile store.
use std::{collections::HashMap, sync::Mutex};

/// Experiment id to variation id.
pub type ExperimentBucketMap = HashMap<String, String>;

/// Error reported by a [`UserProfileStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("user profile store failed: {0}")]
pub struct UserProfileStoreError(pub String);

/// Persistent mapping of users to the variations they were bucketed into.
///
/// The engine assumes nothing about persistence. A failing store degrades to stateless bucketing.
pub trait UserProfileStore: Send + Sync {
    fn lookup(&self, user_id: &str) -> Result<Option<ExperimentBucketMap>, UserProfileStoreError>;

    fn save(
        &self,
        user_id: &str,
        experiment_id: &str,
        variation_id: &str,
    ) -> Result<(), UserProfileStoreError>;
}

/// Process-local store, mostly useful for tests and short-lived hosts.
#[derive(Debug, Default)]
pub struct InMemoryUserProfileStore {
    profiles: Mutex<HashMap<String, ExperimentBucketMap>>,
}

impl InMemoryUserProfileStore {
    pub fn new() -> InMemoryUserProfileStore {
        InMemoryUserProfileStore::default()
    }
}

impl UserProfileStore for InMemoryUserProfileStore {
    fn lookup(&self, user_id: &str) -> Result<Option<ExperimentBucketMap>, UserProfileStoreError> {
        let profiles = self
            .profiles
            .lock()
            .expect("thread holding user profiles lock should not panic");
        Ok(profiles.get(user_id).cloned())
    }

    fn save(
        &self,
        user_id: &str,
        experiment_id: &str,
        variation_id: &str,
    ) -> Result<(), UserProfileStoreError> {
        let mut profiles = self
            .profiles
            .lock()
            .expect("thread holding user profiles lock should not panic");
        profiles
            .entry(user_id.to_owned())
            .or_default()
            .insert(experiment_id.to_owned(), variation_id.to_owned());
        Ok(())
    }
}

/// Profile of one user for the duration of one decide call.
///
/// The profile is loaded at most once, lazily, and only new or changed mappings are written back
/// by [`ProfileTracker::save`].
pub(crate) struct ProfileTracker<'a> {
    store: &'a dyn UserProfileStore,
    user_id: &'a str,
    profile: Option<ExperimentBucketMap>,
    updates: Vec<(String, String)>,
}

impl<'a> ProfileTracker<'a> {
    pub(crate) fn new(store: &'a dyn UserProfileStore, user_id: &'a str) -> ProfileTracker<'a> {
        ProfileTracker {
            store,
            user_id,
            profile: None,
            updates: Vec::new(),
        }
    }

    fn profile(&mut self) -> &mut ExperimentBucketMap {
        let store = self.store;
        let user_id = self.user_id;
        self.profile.get_or_insert_with(|| match store.lookup(user_id) {
            Ok(profile) => profile.unwrap_or_default(),
            Err(err) => {
                log::warn!(target: "decision_core", user_id;
                    "failed to look up user profile: {err}");
                ExperimentBucketMap::new()
            }
        })
    }

    /// Variation id previously saved for `experiment_id`.
    pub(crate) fn variation_id(&mut self, experiment_id: &str) -> Option<String> {
        self.profile().get(experiment_id).cloned()
    }

    pub(crate) fn update(&mut self, experiment_id: &str, variation_id: &str) {
        let previous = self
            .profile()
            .insert(experiment_id.to_owned(), variation_id.to_owned());
        if previous.as_deref() != Some(variation_id) {
            self.updates
                .retain(|(experiment, _)| experiment != experiment_id);
            self.updates
                .push((experiment_id.to_owned(), variation_id.to_owned()));
        }
    }

    /// Write back changed mappings. Failures are logged and otherwise ignored.
    pub(crate) fn save(self) {
        for (experiment_id, variation_id) in &self.updates {
            if let Err(err) = self.store.save(self.user_id, experiment_id, variation_id) {
                log::warn!(target: "decision_core", user_id = self.user_id, experiment_id = experiment_id.as_str();
                    "failed to save user profile: {err}");
            } else {
                log::debug!(target: "decision_core", user_id = self.user_id, experiment_id = experiment_id.as_str();
                    "saved variation {variation_id} to user profile");
            }
        }
    }
}
