use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::Serialize;

use crate::{
    bandits::BanditService,
    bucketer::Bucketer,
    configuration_store::ConfigProvider,
    decision::{
        DecideOption, DecideOptions, DecisionReasons, DecisionService, DecisionSource,
        FeatureDecision,
    },
    events::{DecisionEvent, DecisionListener, DecisionType},
    project::{FeatureFlag, ProjectConfig},
    variables::flag_variables,
    Attributes, ClientConfig, Error, Result, UserContext,
};

/// Outcome of deciding a flag for a user.
///
/// Failures (no configuration yet, unknown flag, bandit unavailable) are reported as decisions
/// without a variation whose reasons contain the error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// `None` if no rule served the user or the decision failed.
    pub variation_key: Option<String>,
    pub enabled: bool,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub rule_key: Option<String>,
    pub flag_key: String,
    pub user_id: String,
    pub attributes: Attributes,
    pub reasons: Vec<String>,
}

impl Decision {
    fn error(flag_key: &str, user: &UserContext, error: &Error) -> Decision {
        Decision {
            variation_key: None,
            enabled: false,
            variables: serde_json::Map::new(),
            rule_key: None,
            flag_key: flag_key.to_owned(),
            user_id: user.user_id().to_owned(),
            attributes: user.attributes().clone(),
            reasons: vec![error.to_string()],
        }
    }
}

/// A client for the decision engine.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use std::sync::Arc;
/// # use decision_core::{Client, ClientConfig, ConfigurationStore, ProjectConfig, UserContext};
/// let store = Arc::new(ConfigurationStore::new());
/// let client = ClientConfig::from_provider(store.clone()).to_client();
///
/// let datafile = br#"{"featureFlags": [{"id": "1", "key": "checkout"}]}"#;
/// store.set_configuration(Arc::new(ProjectConfig::from_json(datafile).unwrap()));
///
/// let user = UserContext::new("user-1", Default::default());
/// let decision = client.decide_blocking(&user, "checkout", &Default::default());
/// assert_eq!(decision.variation_key, None);
/// ```
pub struct Client {
    config_provider: Arc<dyn ConfigProvider>,
    decision_service: DecisionService,
    decision_listener: Box<dyn DecisionListener>,
    default_decide_options: DecideOptions,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Self {
        let ClientConfig {
            config_provider,
            user_profile_store,
            bandit_client,
            bandit_cache,
            decision_listener,
            default_decide_options,
            decision_service,
            sharder,
        } = config;

        let bandits = bandit_client.map(|client| BanditService::new(client, bandit_cache));

        Client {
            config_provider,
            decision_service: DecisionService::new(
                Bucketer::new(sharder),
                bandits,
                user_profile_store,
                decision_service,
            ),
            decision_listener,
            default_decide_options,
        }
    }

    pub fn decision_service(&self) -> &DecisionService {
        &self.decision_service
    }

    /// Decide `flag_key` for `user`.
    pub async fn decide(
        &self,
        user: &UserContext,
        flag_key: &str,
        options: &DecideOptions,
    ) -> Decision {
        let options = self.default_decide_options.merged(options);

        let Some(config) = self.config_provider.get_configuration() else {
            log::warn!(target: "decision_core", flag_key, user_id = user.user_id();
                "deciding a flag before configuration has been published");
            return Decision::error(flag_key, user, &Error::ConfigurationMissing);
        };
        let Some(flag) = config.flag(flag_key) else {
            log::warn!(target: "decision_core", flag_key; "unknown flag");
            return Decision::error(flag_key, user, &Error::FlagNotFound(flag_key.to_owned()));
        };

        let mut reasons = DecisionReasons::new();
        let result = self
            .decision_service
            .get_variation_for_flag(&config, flag, user, &options, &mut reasons)
            .await;
        self.finish_decision(&config, flag, user, &options, result, reasons)
    }

    /// Decide several flags, loading the user profile once.
    ///
    /// Unknown keys produce error decisions. With [`DecideOption::EnabledFlagsOnly`], only
    /// enabled decisions are returned. Returns an empty map if no configuration has been
    /// published yet.
    pub async fn decide_for_keys(
        &self,
        user: &UserContext,
        flag_keys: &[&str],
        options: &DecideOptions,
    ) -> HashMap<String, Decision> {
        let options = self.default_decide_options.merged(options);

        let Some(config) = self.config_provider.get_configuration() else {
            log::warn!(target: "decision_core", user_id = user.user_id();
                "deciding flags before configuration has been published");
            return HashMap::new();
        };

        let mut decisions = HashMap::new();
        let mut flags = Vec::with_capacity(flag_keys.len());
        for flag_key in flag_keys {
            match config.flag(flag_key) {
                Some(flag) => flags.push(flag),
                None => {
                    let error = Error::FlagNotFound((*flag_key).to_owned());
                    decisions.insert((*flag_key).to_owned(), Decision::error(flag_key, user, &error));
                }
            }
        }

        let results = self
            .decision_service
            .get_variations_for_flags(&config, &flags, user, &options)
            .await;
        for (flag, (result, reasons)) in flags.into_iter().zip(results) {
            let decision = self.finish_decision(&config, flag, user, &options, result, reasons);
            decisions.insert(flag.key.clone(), decision);
        }

        if options.contains(DecideOption::EnabledFlagsOnly) {
            decisions.retain(|_, decision| decision.enabled);
        }
        decisions
    }

    /// Decide every flag of the current configuration.
    pub async fn decide_all(
        &self,
        user: &UserContext,
        options: &DecideOptions,
    ) -> HashMap<String, Decision> {
        let Some(config) = self.config_provider.get_configuration() else {
            log::warn!(target: "decision_core", user_id = user.user_id();
                "deciding flags before configuration has been published");
            return HashMap::new();
        };
        let flag_keys: Vec<&str> = config.flags().iter().map(|flag| flag.key.as_str()).collect();
        self.decide_for_keys(user, &flag_keys, options).await
    }

    /// [`Client::decide`] for callers without an async runtime.
    ///
    /// Drives the decision on a fresh current-thread runtime, so it must not be called from
    /// within an async context.
    pub fn decide_blocking(
        &self,
        user: &UserContext,
        flag_key: &str,
        options: &DecideOptions,
    ) -> Decision {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.decide(user, flag_key, options)),
            Err(err) => Decision::error(flag_key, user, &Error::from(err)),
        }
    }

    /// Variation of a plain experiment for the user.
    ///
    /// Runs forced variations, the whitelist, the user profile, audiences and bucketing.
    pub async fn get_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<Option<String>> {
        let config = self
            .config_provider
            .get_configuration()
            .ok_or(Error::ConfigurationMissing)?;
        let experiment = config
            .experiment_by_key(experiment_key)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_key.to_owned()))?;

        let options = self.default_decide_options.clone();
        let mut reasons = DecisionReasons::new();
        let variation = self
            .decision_service
            .get_variation(&config, experiment, user_id, attributes, &options, &mut reasons)
            .await
            .inspect_err(|err| {
                log::warn!(target: "decision_core", experiment_key, user_id;
                    "failed to get variation: {err}");
            })?;

        log::trace!(target: "decision_core", experiment_key, user_id;
            "variation: {:?}", variation.map(|v| v.key.as_str()));

        self.decision_listener.on_decision(DecisionEvent {
            decision_type: DecisionType::AbTest,
            user_id: user_id.to_owned(),
            attributes: attributes.clone(),
            flag_key: experiment_key.to_owned(),
            rule_key: Some(experiment_key.to_owned()),
            variation_key: variation.map(|v| v.key.clone()),
            enabled: variation.is_some_and(|v| v.is_feature_enabled()),
            source: Some(DecisionSource::FeatureTest),
            variables: serde_json::Map::new(),
            reasons: reasons.to_report(options.contains(DecideOption::IncludeReasons)),
            bandit_uuid: None,
            dispatch_impression: false,
            timestamp: Utc::now(),
        });

        Ok(variation.map(|v| v.key.clone()))
    }

    /// Force `user_id` into a variation of a plain experiment, or clear it with `None`.
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let config = self
            .config_provider
            .get_configuration()
            .ok_or(Error::ConfigurationMissing)?;
        self.decision_service
            .forced_variations()
            .set(&config, experiment_key, user_id, variation_key)
    }

    pub fn get_forced_variation(&self, experiment_key: &str, user_id: &str) -> Option<String> {
        let config = self.config_provider.get_configuration()?;
        let experiment = config.experiment_by_key(experiment_key)?;
        self.decision_service
            .forced_variations()
            .get(experiment, user_id, &mut DecisionReasons::new())
            .map(|variation| variation.key.clone())
    }

    fn finish_decision(
        &self,
        config: &ProjectConfig,
        flag: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        result: Result<FeatureDecision>,
        mut reasons: DecisionReasons,
    ) -> Decision {
        let include_reasons = options.contains(DecideOption::IncludeReasons);

        let feature_decision = match result {
            Ok(feature_decision) => feature_decision,
            Err(err) => {
                reasons.add_error(&err);
                let mut decision = Decision::error(&flag.key, user, &err);
                decision.reasons = reasons.to_report(include_reasons);
                return decision;
            }
        };

        let variation = feature_decision.variation.as_ref();
        let variables = if options.contains(DecideOption::ExcludeVariables) {
            serde_json::Map::new()
        } else {
            flag_variables(flag, variation, &mut reasons)
        };
        let reasons = reasons.to_report(include_reasons);

        let dispatch_impression = !options.contains(DecideOption::DisableDecisionEvent)
            && match feature_decision.source {
                DecisionSource::Rollout => config.send_flag_decisions(),
                _ if variation.is_none() => config.send_flag_decisions(),
                _ => true,
            };

        let decision = Decision {
            variation_key: variation.map(|v| v.key.clone()),
            enabled: feature_decision.is_enabled(),
            variables,
            rule_key: feature_decision.rule_key.clone(),
            flag_key: flag.key.clone(),
            user_id: user.user_id().to_owned(),
            attributes: user.attributes().clone(),
            reasons,
        };

        log::trace!(target: "decision_core",
            flag_key = flag.key.as_str(),
            user_id = user.user_id(),
            variation_key = decision.variation_key.as_deref(),
            dispatch_impression;
            "decided flag");

        self.decision_listener.on_decision(DecisionEvent {
            decision_type: DecisionType::Flag,
            user_id: decision.user_id.clone(),
            attributes: decision.attributes.clone(),
            flag_key: decision.flag_key.clone(),
            rule_key: decision.rule_key.clone(),
            variation_key: decision.variation_key.clone(),
            enabled: decision.enabled,
            source: Some(feature_decision.source),
            variables: decision.variables.clone(),
            reasons: decision.reasons.clone(),
            bandit_uuid: feature_decision.bandit_uuid,
            dispatch_impression,
            timestamp: Utc::now(),
        });

        decision
    }
}
