use std::sync::Arc;

use crate::{
    bandits::{BanditCacheConfig, BanditClient},
    bucketer::{MurmurSharder, Sharder},
    configuration_store::ConfigProvider,
    decision::{DecideOptions, DecisionServiceConfig},
    events::{DecisionListener, NoopDecisionListener},
    user_profile::UserProfileStore,
    Client,
};

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) config_provider: Arc<dyn ConfigProvider>,
    pub(crate) user_profile_store: Option<Arc<dyn UserProfileStore>>,
    pub(crate) bandit_client: Option<Arc<dyn BanditClient>>,
    pub(crate) bandit_cache: BanditCacheConfig,
    pub(crate) decision_listener: Box<dyn DecisionListener>,
    pub(crate) default_decide_options: DecideOptions,
    pub(crate) decision_service: DecisionServiceConfig,
    pub(crate) sharder: Arc<dyn Sharder>,
}

impl ClientConfig {
    /// Create a default configuration reading snapshots from `config_provider`.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use decision_core::{ClientConfig, ConfigurationStore};
    /// let store = Arc::new(ConfigurationStore::new());
    /// let config = ClientConfig::from_provider(store.clone());
    /// ```
    pub fn from_provider(config_provider: Arc<dyn ConfigProvider>) -> ClientConfig {
        ClientConfig {
            config_provider,
            user_profile_store: None,
            bandit_client: None,
            bandit_cache: BanditCacheConfig::default(),
            decision_listener: Box::new(NoopDecisionListener),
            default_decide_options: DecideOptions::new(),
            decision_service: DecisionServiceConfig::default(),
            sharder: Arc::new(MurmurSharder),
        }
    }

    /// Enable sticky bucketing through `store`.
    pub fn with_user_profile_store(mut self, store: Arc<dyn UserProfileStore>) -> ClientConfig {
        self.user_profile_store = Some(store);
        self
    }

    /// Client used for experiments whose variation is chosen by a bandit. Without one, such
    /// experiments produce error decisions.
    pub fn with_bandit_client(mut self, client: Arc<dyn BanditClient>) -> ClientConfig {
        self.bandit_client = Some(client);
        self
    }

    pub fn with_bandit_cache(mut self, cache: BanditCacheConfig) -> ClientConfig {
        self.bandit_cache = cache;
        self
    }

    /// Set the listener that receives a record of every decision.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use decision_core::{ClientConfig, ConfigurationStore, DecisionEvent};
    /// let config = ClientConfig::from_provider(Arc::new(ConfigurationStore::new()))
    ///     .with_decision_listener(|event: DecisionEvent| {
    ///         println!("{:?}", event);
    ///     });
    /// ```
    pub fn with_decision_listener(
        mut self,
        listener: impl DecisionListener + 'static,
    ) -> ClientConfig {
        self.decision_listener = Box::new(listener);
        self
    }

    /// Options applied to every decide call in addition to the per-call ones.
    pub fn with_default_decide_options(mut self, options: DecideOptions) -> ClientConfig {
        self.default_decide_options = options;
        self
    }

    pub fn with_decision_service(mut self, config: DecisionServiceConfig) -> ClientConfig {
        self.decision_service = config;
        self
    }

    /// Override how bucket values are computed. Clients should use the default in most cases.
    pub fn with_sharder(mut self, sharder: Arc<dyn Sharder>) -> ClientConfig {
        self.sharder = sharder;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}
