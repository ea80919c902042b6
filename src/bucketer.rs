//! Deterministic bucketing of users into traffic ranges.
//!
//! The bucket value of a user is derived from MurmurHash3 (x86, 32-bit, seed 1) of the bucketing
//! id concatenated with the id of the entity being bucketed into, scaled into `[0, 10000)`. The
//! hash must stay bit-for-bit compatible with other SDK implementations, so that the same user
//! lands in the same variation everywhere.
use std::sync::Arc;

use crate::{
    decision::DecisionReasons,
    project::{Experiment, GroupPolicy, ProjectConfig, Targetable, TrafficAllocation, Variation},
};

/// Upper bound (exclusive) of bucket values.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

const BUCKETING_SEED: u32 = 1;

/// Maps a bucketing key into a bucket value.
pub trait Sharder: Send + Sync {
    /// Returns a bucket value in `[0, MAX_TRAFFIC_VALUE)`.
    fn bucket_value(&self, bucketing_key: &str) -> u32;
}

/// The default sharder.
#[derive(Debug, Clone, Copy, Default)]
pub struct MurmurSharder;

impl Sharder for MurmurSharder {
    fn bucket_value(&self, bucketing_key: &str) -> u32 {
        let hash = murmur3_32(bucketing_key.as_bytes(), BUCKETING_SEED);
        // floor(hash / 2^32 * 10000), computed exactly in integers.
        ((u64::from(hash) * u64::from(MAX_TRAFFIC_VALUE)) >> 32) as u32
    }
}

/// MurmurHash3, x86 32-bit variant.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut hash = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k ^= u32::from(*byte) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}

/// Pick the entity whose cumulative range contains `bucket_value`.
///
/// Ranges are sorted by `end_of_range`; the first range with `bucket_value < end_of_range` wins.
/// An empty entity id marks unallocated traffic and never matches.
pub fn allocate_traffic(ranges: &[TrafficAllocation], bucket_value: u32) -> Option<&str> {
    ranges
        .iter()
        .find(|range| bucket_value < range.end_of_range)
        .map(|range| range.entity_id.as_str())
        .filter(|entity_id| !entity_id.is_empty())
}

/// Buckets users into groups, experiments, and variations.
#[derive(Clone)]
pub struct Bucketer {
    sharder: Arc<dyn Sharder>,
}

impl Default for Bucketer {
    fn default() -> Self {
        Bucketer::new(Arc::new(MurmurSharder))
    }
}

impl std::fmt::Debug for Bucketer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucketer").finish_non_exhaustive()
    }
}

impl Bucketer {
    pub fn new(sharder: Arc<dyn Sharder>) -> Bucketer {
        Bucketer { sharder }
    }

    /// Bucket value for `bucketing_id` salted with `salt` (an experiment, group, or holdout id).
    pub fn bucket_value(&self, bucketing_id: &str, salt: &str) -> u32 {
        let value = self.sharder.bucket_value(&format!("{bucketing_id}{salt}"));
        log::trace!(target: "decision_core", bucketing_id, salt;
            "assigned bucket {value} to user with bucketing id {bucketing_id}");
        value
    }

    /// Bucket into one of `ranges`, salting the hash with `salt`.
    pub fn bucket<'a>(
        &self,
        bucketing_id: &str,
        salt: &str,
        ranges: &'a [TrafficAllocation],
    ) -> Option<&'a str> {
        allocate_traffic(ranges, self.bucket_value(bucketing_id, salt))
    }

    /// Bucket into a variation of an experiment, honoring mutually-exclusive groups.
    ///
    /// In a group with the `random` policy, the user is first bucketed into at most one
    /// experiment of the group; if that is not `experiment`, the user gets no variation.
    pub fn bucket_experiment<'a>(
        &self,
        config: &ProjectConfig,
        experiment: &'a Experiment,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        if !self.passes_group(config, experiment, bucketing_id, reasons) {
            return None;
        }
        self.bucket_to_variation(experiment, bucketing_id, reasons)
    }

    /// Whether the user is admitted to `experiment` by its group, if it has one.
    pub(crate) fn passes_group(
        &self,
        config: &ProjectConfig,
        experiment: &Experiment,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> bool {
        let Some(group) = config.group_for_experiment(&experiment.id) else {
            return true;
        };
        if group.policy != GroupPolicy::Random {
            return true;
        }

        let Some(bucketed_id) = self.bucket(bucketing_id, &group.id, &group.traffic_allocation)
        else {
            reasons.add_info(format!(
                "User ({bucketing_id}) is not in any experiment of group ({}).",
                group.id
            ));
            return false;
        };

        match config.experiment(bucketed_id) {
            None => {
                reasons.add_error(format!(
                    "Bucketed into an invalid experiment id ({bucketed_id})"
                ));
                false
            }
            Some(bucketed) if bucketed.id != experiment.id => {
                reasons.add_info(format!(
                    "User ({bucketing_id}) is not in experiment ({}) of group ({}).",
                    experiment.key, group.id
                ));
                false
            }
            Some(_) => {
                reasons.add_info(format!(
                    "User ({bucketing_id}) is in experiment ({}) of group ({}).",
                    experiment.key, group.id
                ));
                true
            }
        }
    }

    /// Bucket into a variation of any targetable rule, ignoring groups.
    pub fn bucket_to_variation<'a, T: Targetable + ?Sized>(
        &self,
        rule: &'a T,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        if rule.variations().is_empty() {
            return None;
        }
        if rule.traffic_allocation().is_empty() {
            reasons.add_info(format!(
                "No traffic allocation rules are defined for experiment ({}).",
                rule.key()
            ));
            return None;
        }

        let variation_id = self.bucket(bucketing_id, rule.id(), rule.traffic_allocation())?;
        let variation = rule.variation_by_id(variation_id);
        if variation.is_none() {
            reasons.add_error(format!("Bucketed into an invalid variation id ({variation_id})"));
        }
        variation
    }
}
