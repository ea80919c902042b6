use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::bandits::BanditCacheOptions;

/// Per-call options of the decide API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecideOption {
    /// Do not dispatch an impression for this decision.
    DisableDecisionEvent,
    /// `decide_all` and `decide_for_keys` return enabled flags only.
    EnabledFlagsOnly,
    /// Neither read nor write sticky bucketing.
    IgnoreUserProfileService,
    /// Return informational reasons, not just errors.
    IncludeReasons,
    /// Do not compute flag variables.
    ExcludeVariables,
    /// Call the bandit service even if a cached decision exists.
    IgnoreBanditCache,
    /// Clear all cached bandit decisions before deciding.
    ResetBanditCache,
    /// Clear cached bandit decisions of this user before deciding.
    InvalidateUserBanditCache,
}

/// Set of [`DecideOption`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecideOptions(HashSet<DecideOption>);

impl DecideOptions {
    pub fn new() -> DecideOptions {
        DecideOptions::default()
    }

    pub fn contains(&self, option: DecideOption) -> bool {
        self.0.contains(&option)
    }

    pub fn insert(&mut self, option: DecideOption) {
        self.0.insert(option);
    }

    /// Union of `self` and `other`.
    pub fn merged(&self, other: &DecideOptions) -> DecideOptions {
        DecideOptions(self.0.union(&other.0).copied().collect())
    }

    pub(crate) fn bandit_cache_options(&self) -> BanditCacheOptions {
        BanditCacheOptions {
            ignore_cache: self.contains(DecideOption::IgnoreBanditCache),
            reset_cache: self.contains(DecideOption::ResetBanditCache),
            invalidate_user_cache: self.contains(DecideOption::InvalidateUserBanditCache),
        }
    }
}

impl FromIterator<DecideOption> for DecideOptions {
    fn from_iter<T: IntoIterator<Item = DecideOption>>(iter: T) -> Self {
        DecideOptions(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[DecideOption; N]> for DecideOptions {
    fn from(options: [DecideOption; N]) -> Self {
        options.into_iter().collect()
    }
}

impl From<&[DecideOption]> for DecideOptions {
    fn from(options: &[DecideOption]) -> Self {
        options.iter().copied().collect()
    }
}
