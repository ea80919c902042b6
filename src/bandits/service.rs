use std::sync::Arc;

use uuid::Uuid;

use crate::{
    bucketer::murmur3_32, project::ProjectConfig, AttributeValue, Attributes,
};

use super::{
    cache::{BanditCache, BanditCacheConfig, BanditCacheOptions, CacheLookup, CachedDecision},
    BanditClient, BanditError,
};

const ATTRIBUTES_HASH_SEED: u32 = 0;

/// A bandit decision for one user and rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanditDecision {
    pub variation_id: String,
    /// Identifies this decision in analytics events. Reused while the decision is cached.
    pub decision_uuid: String,
}

/// Obtains bandit decisions through a [`BanditClient`], memoizing them per user, rule, and
/// attributes.
pub struct BanditService {
    client: Arc<dyn BanditClient>,
    cache: BanditCache,
}

impl BanditService {
    pub fn new(client: Arc<dyn BanditClient>, cache_config: BanditCacheConfig) -> BanditService {
        BanditService {
            client,
            cache: BanditCache::new(cache_config),
        }
    }

    pub fn cache(&self) -> &BanditCache {
        &self.cache
    }

    /// Get the bandit decision of `user_id` for the rule (experiment) `rule_id`.
    ///
    /// A cached decision is reused only if it was made with the same bandit attributes. Failures
    /// are returned as is and never cached.
    pub async fn get_decision(
        &self,
        config: &ProjectConfig,
        user_id: &str,
        attributes: &Attributes,
        rule_id: &str,
        options: BanditCacheOptions,
    ) -> Result<BanditDecision, BanditError> {
        let filtered = filter_attributes(config, attributes, rule_id);
        let attributes_hash = hash_attributes(&filtered);
        let cache_key = BanditCache::cache_key(user_id, rule_id);

        let ticket = match self
            .cache
            .lookup_or_begin(&cache_key, &attributes_hash, options)
        {
            CacheLookup::Hit(cached) => {
                log::debug!(target: "decision_core", user_id, rule_id;
                    "using cached bandit decision");
                return Ok(BanditDecision {
                    variation_id: cached.variation_id,
                    decision_uuid: cached.decision_uuid,
                });
            }
            CacheLookup::Miss { ticket } => ticket,
        };

        let decision_uuid = Uuid::new_v4().to_string();
        let variation_id = self
            .client
            .fetch_decision(rule_id, user_id, &filtered, &decision_uuid)
            .await
            .map_err(|err| {
                log::warn!(target: "decision_core", user_id, rule_id;
                    "failed to fetch bandit decision: {err}");
                err
            })?;

        self.cache.save_if_current(
            cache_key,
            CachedDecision {
                attributes_hash,
                variation_id: variation_id.clone(),
                decision_uuid: decision_uuid.clone(),
            },
            ticket,
        );

        Ok(BanditDecision {
            variation_id,
            decision_uuid,
        })
    }
}

/// Keep only the attributes the rule's bandit consults.
pub(crate) fn filter_attributes(
    config: &ProjectConfig,
    attributes: &Attributes,
    rule_id: &str,
) -> Attributes {
    let Some(bandit) = config
        .experiment(rule_id)
        .and_then(|experiment| experiment.cmab.as_ref())
    else {
        return Attributes::new();
    };

    bandit
        .attribute_ids
        .iter()
        .filter_map(|attribute_id| config.attribute_key(attribute_id))
        .filter_map(|key| {
            attributes
                .get(key)
                .map(|value| (key.to_owned(), value.clone()))
        })
        .collect()
}

/// Order-independent fingerprint of attributes.
pub fn hash_attributes(attributes: &Attributes) -> String {
    let mut pairs: Vec<(&String, &AttributeValue)> = attributes.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let encoded = serde_json::to_string(&pairs).unwrap_or_default();
    format!("{:08x}", murmur3_32(encoded.as_bytes(), ATTRIBUTES_HASH_SEED))
}
