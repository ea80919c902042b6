use std::sync::Arc;

use crate::{
    attributes::bucketing_id,
    audience::rule_matches,
    bandits::{BanditError, BanditService},
    bucketer::Bucketer,
    forced_decisions::{whitelisted_variation, ForcedDecisionKey, ForcedVariations},
    holdouts,
    project::{
        BanditConfig, Experiment, FeatureFlag, ProjectConfig, Targetable, TrafficAllocation,
        Variation,
    },
    user_profile::{ProfileTracker, UserProfileStore},
    Attributes, Error, Result, UserContext,
};

use super::{DecideOption, DecideOptions, DecisionReasons, DecisionSource, FeatureDecision};

const EVERYONE_ELSE: &str = "Everyone Else";

/// How users are admitted into a bandit experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BanditTrafficPolicy {
    /// Only the bandit's own traffic allocation gates membership.
    #[default]
    BanditAllocationOnly,
    /// The user must also fall into the experiment's regular traffic allocation.
    ExperimentAndBanditAllocation,
}

/// Configuration of [`DecisionService`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionServiceConfig {
    pub bandit_traffic_policy: BanditTrafficPolicy,
}

impl DecisionServiceConfig {
    pub fn new() -> DecisionServiceConfig {
        DecisionServiceConfig::default()
    }

    pub fn with_bandit_traffic_policy(mut self, policy: BanditTrafficPolicy) -> DecisionServiceConfig {
        self.bandit_traffic_policy = policy;
        self
    }
}

/// Variation an experiment resolved to.
#[derive(Debug)]
pub(crate) struct ExperimentVariation<'a> {
    pub variation: &'a Variation,
    pub bandit_uuid: Option<String>,
}

impl<'a> ExperimentVariation<'a> {
    fn bucketed(variation: &'a Variation) -> Self {
        ExperimentVariation {
            variation,
            bandit_uuid: None,
        }
    }
}

/// Resolves flags and experiments for users.
///
/// Flags go through forced decisions, holdouts, the flag's experiments in order, and finally its
/// rollout. The only suspension point is the bandit fetch.
pub struct DecisionService {
    bucketer: Bucketer,
    bandits: Option<BanditService>,
    user_profiles: Option<Arc<dyn UserProfileStore>>,
    forced_variations: ForcedVariations,
    config: DecisionServiceConfig,
}

impl DecisionService {
    pub fn new(
        bucketer: Bucketer,
        bandits: Option<BanditService>,
        user_profiles: Option<Arc<dyn UserProfileStore>>,
        config: DecisionServiceConfig,
    ) -> DecisionService {
        DecisionService {
            bucketer,
            bandits,
            user_profiles,
            forced_variations: ForcedVariations::new(),
            config,
        }
    }

    pub fn forced_variations(&self) -> &ForcedVariations {
        &self.forced_variations
    }

    pub fn bandits(&self) -> Option<&BanditService> {
        self.bandits.as_ref()
    }

    fn profile_tracker<'a>(
        &'a self,
        user_id: &'a str,
        options: &DecideOptions,
    ) -> Option<ProfileTracker<'a>> {
        if options.contains(DecideOption::IgnoreUserProfileService) {
            return None;
        }
        self.user_profiles
            .as_deref()
            .map(|store| ProfileTracker::new(store, user_id))
    }

    /// Resolve one flag.
    pub async fn get_variation_for_flag(
        &self,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision> {
        let mut profile = self.profile_tracker(user.user_id(), options);
        let decision = self
            .decide_flag(config, flag, user, options, &mut profile, reasons)
            .await;
        if let Some(profile) = profile {
            profile.save();
        }
        decision
    }

    /// Resolve several flags, loading and saving the user profile once.
    ///
    /// Returns one result and one set of reasons per flag, in order.
    pub async fn get_variations_for_flags(
        &self,
        config: &ProjectConfig,
        flags: &[&FeatureFlag],
        user: &UserContext,
        options: &DecideOptions,
    ) -> Vec<(Result<FeatureDecision>, DecisionReasons)> {
        let mut profile = self.profile_tracker(user.user_id(), options);
        let mut decisions = Vec::with_capacity(flags.len());
        for flag in flags {
            let mut reasons = DecisionReasons::new();
            let decision = self
                .decide_flag(config, flag, user, options, &mut profile, &mut reasons)
                .await;
            decisions.push((decision, reasons));
        }
        if let Some(profile) = profile {
            profile.save();
        }
        decisions
    }

    async fn decide_flag(
        &self,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        profile: &mut Option<ProfileTracker<'_>>,
        reasons: &mut DecisionReasons,
    ) -> Result<FeatureDecision> {
        let user_id = user.user_id();

        if let Some(variation) = user.forced_decisions().resolve(
            config,
            &ForcedDecisionKey::flag(&flag.key),
            user_id,
            reasons,
        ) {
            return Ok(FeatureDecision::forced(variation));
        }

        if let Some((holdout, variation)) = holdouts::resolve(
            config,
            &self.bucketer,
            flag,
            user_id,
            user.attributes(),
            reasons,
        ) {
            return Ok(FeatureDecision::from_rule(
                holdout,
                variation,
                DecisionSource::Holdout,
            ));
        }

        if let Some(decision) = self
            .get_variation_from_experiments(config, flag, user, options, profile, reasons)
            .await?
        {
            return Ok(decision);
        }

        if let Some(decision) = self.get_variation_from_rollout(config, flag, user, reasons) {
            return Ok(decision);
        }

        log::debug!(target: "decision_core", flag_key = flag.key.as_str(), user_id;
            "no rule served the user");
        Ok(FeatureDecision::none())
    }

    async fn get_variation_from_experiments(
        &self,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        profile: &mut Option<ProfileTracker<'_>>,
        reasons: &mut DecisionReasons,
    ) -> Result<Option<FeatureDecision>> {
        if flag.experiment_ids.is_empty() {
            reasons.add_info(format!(
                "Feature ({}) is not attached to any experiments.",
                flag.key
            ));
            return Ok(None);
        }

        for experiment_id in &flag.experiment_ids {
            let Some(experiment) = config.experiment(experiment_id) else {
                log::warn!(target: "decision_core", flag_key = flag.key.as_str(), experiment_id = experiment_id.as_str();
                    "flag references an unknown experiment");
                continue;
            };

            if let Some(variation) = user.forced_decisions().resolve(
                config,
                &ForcedDecisionKey::rule(&flag.key, &experiment.key),
                user.user_id(),
                reasons,
            ) {
                return Ok(Some(FeatureDecision::from_rule(
                    experiment,
                    variation,
                    DecisionSource::FeatureTest,
                )));
            }

            if let Some(resolved) = self
                .resolve_experiment(
                    config,
                    experiment,
                    user.user_id(),
                    user.attributes(),
                    options,
                    profile,
                    reasons,
                )
                .await?
            {
                let mut decision = FeatureDecision::from_rule(
                    experiment,
                    resolved.variation,
                    DecisionSource::FeatureTest,
                );
                decision.bandit_uuid = resolved.bandit_uuid;
                return Ok(Some(decision));
            }
        }

        Ok(None)
    }

    /// Walk the rollout rules. An audience miss moves to the next rule; a bucketing miss jumps to
    /// the last ("Everyone Else") rule.
    fn get_variation_from_rollout(
        &self,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Option<FeatureDecision> {
        let user_id = user.user_id();
        let rollout_id = flag.rollout_id.trim();
        if rollout_id.is_empty() {
            reasons.add_info(format!("There is no rollout of feature ({}).", flag.key));
            return None;
        }
        let Some(rollout) = config.rollout(rollout_id) else {
            reasons.add_info(format!(
                "Invalid rollout ID ({rollout_id}) attached to feature ({}).",
                flag.key
            ));
            return None;
        };
        let rules = &rollout.experiments;
        if rules.is_empty() {
            reasons.add_info(format!("Rollout of feature ({rollout_id}) has no experiments"));
            return None;
        }

        let bucketing_id = bucketing_id(user_id, user.attributes());
        let everyone_else = rules.len() - 1;
        let mut index = 0;
        while index < rules.len() {
            let rule = &rules[index];

            if let Some(variation) = user.forced_decisions().resolve(
                config,
                &ForcedDecisionKey::rule(&flag.key, &rule.key),
                user_id,
                reasons,
            ) {
                return Some(FeatureDecision::from_rule(
                    rule,
                    variation,
                    DecisionSource::Rollout,
                ));
            }

            let logging_key = if index == everyone_else {
                EVERYONE_ELSE.to_owned()
            } else {
                (index + 1).to_string()
            };

            if !rule_matches(config, rule, &logging_key, user.attributes(), reasons) {
                reasons.add_info(format!(
                    "User ({user_id}) does not meet conditions for targeting rule ({logging_key})."
                ));
                index += 1;
                continue;
            }
            reasons.add_info(format!(
                "User ({user_id}) meets conditions for targeting rule ({logging_key})."
            ));

            if let Some(variation) = self.bucketer.bucket_to_variation(rule, bucketing_id, reasons)
            {
                reasons.add_info(format!(
                    "User ({user_id}) is in the traffic group of targeting rule ({logging_key})."
                ));
                return Some(FeatureDecision::from_rule(
                    rule,
                    variation,
                    DecisionSource::Rollout,
                ));
            }

            if index == everyone_else {
                break;
            }
            reasons.add_info(format!(
                "User ({user_id}) is not in the traffic group for targeting rule ({logging_key}). Checking (Everyone Else) rule now."
            ));
            index = everyone_else;
        }

        None
    }

    /// Resolve a plain experiment outside of any flag.
    pub async fn get_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment: &'a Experiment,
        user_id: &str,
        attributes: &Attributes,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<Option<&'a Variation>> {
        let mut profile = self.profile_tracker(user_id, options);
        let resolved = self
            .resolve_experiment(
                config,
                experiment,
                user_id,
                attributes,
                options,
                &mut profile,
                reasons,
            )
            .await;
        if let Some(profile) = profile {
            profile.save();
        }
        Ok(resolved?.map(|resolved| resolved.variation))
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_experiment<'a>(
        &self,
        config: &ProjectConfig,
        experiment: &'a Experiment,
        user_id: &str,
        attributes: &Attributes,
        options: &DecideOptions,
        profile: &mut Option<ProfileTracker<'_>>,
        reasons: &mut DecisionReasons,
    ) -> Result<Option<ExperimentVariation<'a>>> {
        if !experiment.is_running() {
            reasons.add_info(format!("Experiment ({}) is not running.", experiment.key));
            return Ok(None);
        }

        if let Some(variation) = self.forced_variations.get(experiment, user_id, reasons) {
            return Ok(Some(ExperimentVariation::bucketed(variation)));
        }
        if let Some(variation) = whitelisted_variation(experiment, user_id, reasons) {
            return Ok(Some(ExperimentVariation::bucketed(variation)));
        }

        // Bandit decisions are never sticky.
        let mut profile = match experiment.cmab {
            Some(_) => None,
            None => profile.as_mut(),
        };
        if let Some(tracker) = profile.as_deref_mut() {
            if let Some(variation_id) = tracker.variation_id(&experiment.id) {
                match experiment.variation_by_id(&variation_id) {
                    Some(variation) => {
                        reasons.add_info(format!(
                            "Returning previously activated variation ({}) of experiment ({}) for user ({user_id}) from user profile.",
                            variation.key, experiment.key
                        ));
                        return Ok(Some(ExperimentVariation::bucketed(variation)));
                    }
                    None => {
                        log::info!(target: "decision_core", user_id, experiment_key = experiment.key.as_str();
                            "user profile refers to unknown variation {variation_id}, re-bucketing");
                    }
                }
            }
        }

        if !rule_matches(config, experiment, &experiment.key, attributes, reasons) {
            reasons.add_info(format!(
                "User ({user_id}) does not meet conditions to be in experiment ({}).",
                experiment.key
            ));
            return Ok(None);
        }

        let bucketing_id = bucketing_id(user_id, attributes);
        let resolved = match &experiment.cmab {
            Some(bandit) => {
                self.bandit_variation(
                    config,
                    experiment,
                    bandit,
                    user_id,
                    attributes,
                    bucketing_id,
                    options,
                    reasons,
                )
                .await?
            }
            None => self
                .bucketer
                .bucket_experiment(config, experiment, bucketing_id, reasons)
                .map(ExperimentVariation::bucketed),
        };

        match &resolved {
            Some(resolved) => {
                reasons.add_info(format!(
                    "User ({user_id}) is in variation ({}) of experiment ({})",
                    resolved.variation.key, experiment.key
                ));
                if let Some(tracker) = profile {
                    tracker.update(&experiment.id, &resolved.variation.id);
                }
            }
            None => reasons.add_info(format!("User ({user_id}) is in no variation.")),
        }

        Ok(resolved)
    }

    #[allow(clippy::too_many_arguments)]
    async fn bandit_variation<'a>(
        &self,
        config: &ProjectConfig,
        experiment: &'a Experiment,
        bandit: &BanditConfig,
        user_id: &str,
        attributes: &Attributes,
        bucketing_id: &str,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Result<Option<ExperimentVariation<'a>>> {
        if !self
            .bucketer
            .passes_group(config, experiment, bucketing_id, reasons)
        {
            return Ok(None);
        }

        let in_experiment_traffic = match self.config.bandit_traffic_policy {
            BanditTrafficPolicy::BanditAllocationOnly => true,
            BanditTrafficPolicy::ExperimentAndBanditAllocation => self
                .bucketer
                .bucket(bucketing_id, &experiment.id, &experiment.traffic_allocation)
                .is_some(),
        };
        let bandit_range = [TrafficAllocation {
            entity_id: "$".to_owned(),
            end_of_range: bandit.traffic_allocation,
        }];
        if !in_experiment_traffic
            || self
                .bucketer
                .bucket(bucketing_id, &experiment.id, &bandit_range)
                .is_none()
        {
            reasons.add_info(format!(
                "User ({user_id}) does not fall into cmab traffic allocation in experiment ({}).",
                experiment.key
            ));
            return Ok(None);
        }

        let Some(bandits) = &self.bandits else {
            reasons.add_error(format!(
                "Failed to fetch CMAB data for experiment: {}.",
                experiment.key
            ));
            return Err(Error::Bandit(BanditError::NoClient));
        };

        let decision = match bandits
            .get_decision(
                config,
                user_id,
                attributes,
                &experiment.id,
                options.bandit_cache_options(),
            )
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                reasons.add_error(format!(
                    "Failed to fetch CMAB data for experiment: {}.",
                    experiment.key
                ));
                return Err(err.into());
            }
        };

        match experiment.variation_by_id(&decision.variation_id) {
            Some(variation) => Ok(Some(ExperimentVariation {
                variation,
                bandit_uuid: Some(decision.decision_uuid),
            })),
            None => {
                reasons.add_error(format!(
                    "Bucketed into an invalid variation id ({})",
                    decision.variation_id
                ));
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        bandits::{BanditCacheConfig, BanditClient},
        user_profile::InMemoryUserProfileStore,
    };

    struct FixedBanditClient {
        result: std::result::Result<String, BanditError>,
        calls: AtomicUsize,
    }

    impl FixedBanditClient {
        fn new(result: std::result::Result<String, BanditError>) -> Arc<FixedBanditClient> {
            Arc::new(FixedBanditClient {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BanditClient for FixedBanditClient {
        async fn fetch_decision(
            &self,
            _rule_id: &str,
            _user_id: &str,
            _attributes: &Attributes,
            _decision_uuid: &str,
        ) -> std::result::Result<String, BanditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn rule(id: &str, audience_ids: &[&str], variation_key: &str, end_of_range: u32) -> serde_json::Value {
        json!({
            "id": id, "key": id, "status": "Running",
            "audienceIds": audience_ids,
            "variations": [{"id": format!("{id}_var"), "key": variation_key, "featureEnabled": true}],
            "trafficAllocation": [{"entityId": format!("{id}_var"), "endOfRange": end_of_range}]
        })
    }

    fn config() -> ProjectConfig {
        let datafile = json!({
            "revision": "1",
            "attributes": [{"id": "attr_a", "key": "a"}],
            "typedAudiences": [
                {"id": "A", "name": "A", "conditions": ["and",
                    {"name": "a", "type": "custom_attribute", "match": "exact", "value": true}]},
                {"id": "B", "name": "B", "conditions": ["and",
                    {"name": "b", "type": "custom_attribute", "match": "exact", "value": true}]}
            ],
            "experiments": [
                {"id": "exp1", "key": "exp_1", "status": "Running", "audienceIds": ["A"],
                 "variations": [
                    {"id": "v_c", "key": "control", "featureEnabled": false},
                    {"id": "v_t", "key": "treatment", "featureEnabled": true}
                 ],
                 "trafficAllocation": [{"entityId": "v_t", "endOfRange": 10000}]},
                {"id": "paused", "key": "paused_exp", "status": "Paused",
                 "variations": [{"id": "v_p", "key": "paused_on", "featureEnabled": true}],
                 "trafficAllocation": [{"entityId": "v_p", "endOfRange": 10000}]},
                {"id": "bandit_exp", "key": "bandit_exp", "status": "Running",
                 "variations": [
                    {"id": "v_b1", "key": "arm_1", "featureEnabled": true},
                    {"id": "v_b2", "key": "arm_2", "featureEnabled": true}
                 ],
                 "trafficAllocation": [],
                 "cmab": {"trafficAllocation": 10000, "attributeIds": ["attr_a"]}}
            ],
            "featureFlags": [
                {"id": "f1", "key": "rollout_flag", "rolloutId": "ro1"},
                {"id": "f2", "key": "exp_flag", "rolloutId": "ro2", "experimentIds": ["exp1"]},
                {"id": "f3", "key": "bandit_flag", "experimentIds": ["bandit_exp"]},
                {"id": "f4", "key": "held_flag", "rolloutId": "ro2"},
                {"id": "f5", "key": "paused_flag", "rolloutId": "ro2", "experimentIds": ["paused"]}
            ],
            "rollouts": [
                {"id": "ro1", "experiments": [
                    rule("r0", &["A"], "r0_on", 0),
                    rule("r1", &["B"], "r1_on", 10000),
                    rule("r2", &[], "r2_on", 10000)
                ]},
                {"id": "ro2", "experiments": [rule("everyone", &[], "off", 10000)]}
            ],
            "holdouts": [
                {"id": "h1", "key": "global_holdout", "status": "Running", "includedFlags": ["f4"],
                 "variations": [{"id": "h1_off", "key": "holdout_off", "featureEnabled": false}],
                 "trafficAllocation": [{"entityId": "h1_off", "endOfRange": 10000}]}
            ]
        });
        ProjectConfig::from_json(datafile.to_string().as_bytes()).unwrap()
    }

    fn service(
        bandit_client: Option<Arc<dyn BanditClient>>,
        user_profiles: Option<Arc<dyn UserProfileStore>>,
        config: DecisionServiceConfig,
    ) -> DecisionService {
        DecisionService::new(
            Bucketer::default(),
            bandit_client.map(|client| BanditService::new(client, BanditCacheConfig::default())),
            user_profiles,
            config,
        )
    }

    fn user(attributes: serde_json::Value) -> UserContext {
        UserContext::new("u", serde_json::from_value(attributes).unwrap())
    }

    async fn decide(
        service: &DecisionService,
        config: &ProjectConfig,
        flag_key: &str,
        user: &UserContext,
        options: &DecideOptions,
    ) -> (Result<FeatureDecision>, DecisionReasons) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut reasons = DecisionReasons::new();
        let flag = config.flag(flag_key).unwrap();
        let decision = service
            .get_variation_for_flag(config, flag, user, options, &mut reasons)
            .await;
        (decision, reasons)
    }

    fn variation_key(decision: &FeatureDecision) -> Option<&str> {
        decision.variation.as_ref().map(|v| v.key.as_str())
    }

    #[tokio::test]
    async fn rollout_bucketing_miss_jumps_to_everyone_else() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let (decision, reasons) = decide(
            &service,
            &config,
            "rollout_flag",
            &user(json!({"a": true, "b": true})),
            &DecideOptions::new(),
        )
        .await;
        let decision = decision.unwrap();

        assert_eq!(variation_key(&decision), Some("r2_on"));
        assert_eq!(decision.rule_key.as_deref(), Some("r2"));
        assert_eq!(decision.source, DecisionSource::Rollout);
        assert!(reasons.infos().iter().any(|reason| reason
            == "User (u) is not in the traffic group for targeting rule (1). Checking (Everyone Else) rule now."));
        assert!(!reasons
            .infos()
            .iter()
            .any(|reason| reason.contains("targeting rule (2)")));
    }

    #[tokio::test]
    async fn rollout_audience_miss_continues_to_next_rule() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let (decision, _) = decide(
            &service,
            &config,
            "rollout_flag",
            &user(json!({"b": true})),
            &DecideOptions::new(),
        )
        .await;
        assert_eq!(variation_key(&decision.unwrap()), Some("r1_on"));

        let (decision, _) = decide(
            &service,
            &config,
            "rollout_flag",
            &user(json!({})),
            &DecideOptions::new(),
        )
        .await;
        assert_eq!(variation_key(&decision.unwrap()), Some("r2_on"));
    }

    #[tokio::test]
    async fn experiment_wins_over_rollout() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let (decision, reasons) = decide(
            &service,
            &config,
            "exp_flag",
            &user(json!({"a": true})),
            &DecideOptions::new(),
        )
        .await;
        let decision = decision.unwrap();
        assert_eq!(variation_key(&decision), Some("treatment"));
        assert_eq!(decision.source, DecisionSource::FeatureTest);
        assert!(decision.is_enabled());
        assert!(reasons.errors().is_empty());

        let (decision, reasons) = decide(
            &service,
            &config,
            "exp_flag",
            &user(json!({})),
            &DecideOptions::new(),
        )
        .await;
        assert_eq!(variation_key(&decision.unwrap()), Some("off"));
        assert!(reasons
            .infos()
            .iter()
            .any(|reason| reason == "User (u) does not meet conditions to be in experiment (exp_1)."));
    }

    #[tokio::test]
    async fn paused_experiment_is_skipped() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let (decision, reasons) = decide(
            &service,
            &config,
            "paused_flag",
            &user(json!({})),
            &DecideOptions::new(),
        )
        .await;
        assert_eq!(variation_key(&decision.unwrap()), Some("off"));
        assert!(reasons
            .infos()
            .contains(&"Experiment (paused_exp) is not running.".to_owned()));
    }

    #[tokio::test]
    async fn flag_level_forced_decision_wins_regardless_of_order() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let mut rule_first = user(json!({"a": true}));
        rule_first.set_forced_decision(ForcedDecisionKey::rule("exp_flag", "exp_1"), "control");
        rule_first.set_forced_decision(ForcedDecisionKey::flag("exp_flag"), "off");

        let mut flag_first = user(json!({"a": true}));
        flag_first.set_forced_decision(ForcedDecisionKey::flag("exp_flag"), "off");
        flag_first.set_forced_decision(ForcedDecisionKey::rule("exp_flag", "exp_1"), "control");

        for user in [rule_first, flag_first] {
            let (decision, _) =
                decide(&service, &config, "exp_flag", &user, &DecideOptions::new()).await;
            let decision = decision.unwrap();
            assert_eq!(variation_key(&decision), Some("off"));
            assert_eq!(decision.source, DecisionSource::Forced);
            assert_eq!(decision.rule_key, None);
        }
    }

    #[tokio::test]
    async fn rule_level_forced_decision() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let mut user = user(json!({}));
        user.set_forced_decision(ForcedDecisionKey::rule("exp_flag", "exp_1"), "control");
        let (decision, _) = decide(&service, &config, "exp_flag", &user, &DecideOptions::new()).await;
        let decision = decision.unwrap();
        assert_eq!(variation_key(&decision), Some("control"));
        assert_eq!(decision.rule_key.as_deref(), Some("exp_1"));

        let mut user = UserContext::new("u", Attributes::new());
        user.set_forced_decision(ForcedDecisionKey::rule("rollout_flag", "r0"), "r1_on");
        let (decision, _) =
            decide(&service, &config, "rollout_flag", &user, &DecideOptions::new()).await;
        let decision = decision.unwrap();
        assert_eq!(variation_key(&decision), Some("r1_on"));
        assert_eq!(decision.rule_key.as_deref(), Some("r0"));
    }

    #[tokio::test]
    async fn invalid_forced_decision_falls_through() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let mut user = user(json!({"a": true}));
        user.set_forced_decision(ForcedDecisionKey::flag("exp_flag"), "missing");
        let (decision, reasons) =
            decide(&service, &config, "exp_flag", &user, &DecideOptions::new()).await;

        assert_eq!(variation_key(&decision.unwrap()), Some("treatment"));
        assert!(reasons.infos().contains(
            &"Invalid variation is mapped to flag (exp_flag) and user (u) in the forced decision map."
                .to_owned()
        ));
    }

    #[tokio::test]
    async fn holdout_precedes_rules_but_not_forced_decisions() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let (decision, _) = decide(
            &service,
            &config,
            "held_flag",
            &user(json!({})),
            &DecideOptions::new(),
        )
        .await;
        let decision = decision.unwrap();
        assert_eq!(variation_key(&decision), Some("holdout_off"));
        assert_eq!(decision.source, DecisionSource::Holdout);
        assert_eq!(decision.rule_key.as_deref(), Some("global_holdout"));

        let mut forced = user(json!({}));
        forced.set_forced_decision(ForcedDecisionKey::flag("held_flag"), "off");
        let (decision, _) =
            decide(&service, &config, "held_flag", &forced, &DecideOptions::new()).await;
        assert_eq!(decision.unwrap().source, DecisionSource::Forced);
    }

    #[tokio::test]
    async fn user_profile_is_sticky() {
        let config = config();
        let store = Arc::new(InMemoryUserProfileStore::new());
        store.save("u", "exp1", "v_c").unwrap();
        let service = service(None, Some(store.clone()), DecisionServiceConfig::default());

        // the stored variation is returned without re-checking the audience
        let (decision, reasons) = decide(
            &service,
            &config,
            "exp_flag",
            &user(json!({})),
            &DecideOptions::new(),
        )
        .await;
        assert_eq!(variation_key(&decision.unwrap()), Some("control"));
        assert!(reasons.infos().contains(
            &"Returning previously activated variation (control) of experiment (exp_1) for user (u) from user profile."
                .to_owned()
        ));

        let (decision, _) = decide(
            &service,
            &config,
            "exp_flag",
            &user(json!({"a": true})),
            &DecideOptions::from([DecideOption::IgnoreUserProfileService]),
        )
        .await;
        assert_eq!(variation_key(&decision.unwrap()), Some("treatment"));
        assert_eq!(store.lookup("u").unwrap().unwrap()["exp1"], "v_c");
    }

    #[tokio::test]
    async fn bucketing_is_saved_to_user_profile() {
        let config = config();
        let store = Arc::new(InMemoryUserProfileStore::new());
        let service = service(None, Some(store.clone()), DecisionServiceConfig::default());

        decide(
            &service,
            &config,
            "exp_flag",
            &user(json!({"a": true})),
            &DecideOptions::from([DecideOption::IgnoreUserProfileService]),
        )
        .await
        .0
        .unwrap();
        assert_eq!(store.lookup("u").unwrap(), None);

        decide(
            &service,
            &config,
            "exp_flag",
            &user(json!({"a": true})),
            &DecideOptions::new(),
        )
        .await
        .0
        .unwrap();
        assert_eq!(store.lookup("u").unwrap().unwrap()["exp1"], "v_t");
    }

    #[tokio::test]
    async fn bandit_decides_variation() {
        let config = config();
        let client = FixedBanditClient::new(Ok("v_b2".into()));
        let store = Arc::new(InMemoryUserProfileStore::new());
        let service = service(
            Some(client.clone()),
            Some(store.clone()),
            DecisionServiceConfig::default(),
        );

        let (decision, _) = decide(
            &service,
            &config,
            "bandit_flag",
            &user(json!({"a": true})),
            &DecideOptions::new(),
        )
        .await;
        let decision = decision.unwrap();
        assert_eq!(variation_key(&decision), Some("arm_2"));
        assert_eq!(decision.source, DecisionSource::FeatureTest);
        assert!(decision.bandit_uuid.is_some());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // bandit decisions are not sticky
        assert_eq!(store.lookup("u").unwrap(), None);
    }

    #[tokio::test]
    async fn bandit_failure_is_an_error() {
        let config = config();
        let client = FixedBanditClient::new(Err(BanditError::FetchFailed("down".into())));
        let service = service(Some(client), None, DecisionServiceConfig::default());

        let (decision, reasons) = decide(
            &service,
            &config,
            "bandit_flag",
            &user(json!({})),
            &DecideOptions::new(),
        )
        .await;
        assert!(matches!(
            decision,
            Err(Error::Bandit(BanditError::FetchFailed(_)))
        ));
        assert_eq!(
            reasons.errors(),
            ["Failed to fetch CMAB data for experiment: bandit_exp."]
        );
    }

    #[tokio::test]
    async fn bandit_without_client_is_an_error() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());

        let (decision, _) = decide(
            &service,
            &config,
            "bandit_flag",
            &user(json!({})),
            &DecideOptions::new(),
        )
        .await;
        assert!(matches!(decision, Err(Error::Bandit(BanditError::NoClient))));
    }

    #[tokio::test]
    async fn experiment_traffic_can_gate_bandit() {
        let config = config();
        let client = FixedBanditClient::new(Ok("v_b1".into()));
        let service = service(
            Some(client.clone()),
            None,
            DecisionServiceConfig::new()
                .with_bandit_traffic_policy(BanditTrafficPolicy::ExperimentAndBanditAllocation),
        );

        let (decision, _) = decide(
            &service,
            &config,
            "bandit_flag",
            &user(json!({})),
            &DecideOptions::new(),
        )
        .await;
        let decision = decision.unwrap();
        assert_eq!(decision.variation, None);
        assert!(!decision.is_enabled());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn plain_experiment_lookup() {
        let config = config();
        let service = service(None, None, DecisionServiceConfig::default());
        let experiment = config.experiment_by_key("exp_1").unwrap();
        let mut reasons = DecisionReasons::new();
        let attributes: Attributes = [("a".to_owned(), true.into())].into();

        let variation = service
            .get_variation(&config, experiment, "u", &attributes, &DecideOptions::new(), &mut reasons)
            .await
            .unwrap();
        assert_eq!(variation.map(|v| v.key.as_str()), Some("treatment"));

        service
            .forced_variations()
            .set(&config, "exp_1", "u", Some("control"))
            .unwrap();
        let variation = service
            .get_variation(&config, experiment, "u", &Attributes::new(), &DecideOptions::new(), &mut reasons)
            .await
            .unwrap();
        assert_eq!(variation.map(|v| v.key.as_str()), Some("control"));
    }

    #[tokio::test]
    async fn decides_several_flags_with_one_profile_load() {
        let config = config();
        let store = Arc::new(InMemoryUserProfileStore::new());
        let service = service(None, Some(store.clone()), DecisionServiceConfig::default());
        let flags: Vec<&FeatureFlag> = config.flags().iter().take(2).collect();

        let decisions = service
            .get_variations_for_flags(&config, &flags, &user(json!({"a": true})), &DecideOptions::new())
            .await;

        assert_eq!(decisions.len(), 2);
        assert_eq!(
            variation_key(decisions[0].0.as_ref().unwrap()),
            Some("r2_on")
        );
        assert_eq!(
            variation_key(decisions[1].0.as_ref().unwrap()),
            Some("treatment")
        );
        assert_eq!(store.lookup("u").unwrap().unwrap()["exp1"], "v_t");
    }
}
