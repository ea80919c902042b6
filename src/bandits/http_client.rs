//! A [`BanditClient`] backed by the hosted prediction service.
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use serde::{Deserialize, Serialize};

use crate::{AttributeValue, Attributes};

use super::{BanditClient, BanditError};

const CUSTOM_ATTRIBUTE_TYPE: &str = "custom_attribute";

/// `{rule_id}` as it appears in a parsed URL path.
const RULE_ID_PLACEHOLDER: &str = "%7Brule_id%7D";

/// Retry policy of [`HttpBanditClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 1;
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
    pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

    pub fn new() -> RetryConfig {
        RetryConfig::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> RetryConfig {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> RetryConfig {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> RetryConfig {
        self.max_backoff = backoff;
        self
    }

    /// Update the factor applied to the backoff after each retry. Negative and NaN factors act as
    /// zero.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> RetryConfig {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before retry number `attempt` (starting at 1).
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        // f64::max drops NaN, so the factor is always within [0, u32::MAX].
        let factor = self
            .backoff_multiplier
            .max(0.0)
            .powi(exponent)
            .min(f64::from(u32::MAX));
        Duration::try_from_secs_f64(self.initial_backoff.as_secs_f64() * factor)
            .map_or(self.max_backoff, |backoff| backoff.min(self.max_backoff))
    }
}

impl Default for RetryConfig {
    fn default() -> RetryConfig {
        RetryConfig {
            max_retries: RetryConfig::DEFAULT_MAX_RETRIES,
            initial_backoff: RetryConfig::DEFAULT_INITIAL_BACKOFF,
            max_backoff: RetryConfig::DEFAULT_MAX_BACKOFF,
            backoff_multiplier: RetryConfig::DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

/// Configuration of [`HttpBanditClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpBanditClientConfig {
    /// Base URL. The rule id is appended as the last path segment, unless the URL contains a
    /// `{rule_id}` placeholder.
    pub prediction_endpoint: String,
    /// Timeout of a single attempt.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl HttpBanditClientConfig {
    pub const DEFAULT_PREDICTION_ENDPOINT: &'static str =
        "https://prediction.cmab.optimizely.com/predict";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new() -> HttpBanditClientConfig {
        HttpBanditClientConfig::default()
    }

    pub fn with_prediction_endpoint(mut self, endpoint: impl Into<String>) -> HttpBanditClientConfig {
        self.prediction_endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> HttpBanditClientConfig {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> HttpBanditClientConfig {
        self.retry = retry;
        self
    }
}

impl Default for HttpBanditClientConfig {
    fn default() -> HttpBanditClientConfig {
        HttpBanditClientConfig {
            prediction_endpoint: HttpBanditClientConfig::DEFAULT_PREDICTION_ENDPOINT.to_owned(),
            timeout: HttpBanditClientConfig::DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    instances: Vec<PredictionInstance<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionInstance<'a> {
    visitor_id: &'a str,
    experiment_id: &'a str,
    attributes: Vec<RequestAttribute<'a>>,
    #[serde(rename = "cmabUUID")]
    cmab_uuid: &'a str,
}

#[derive(Debug, Serialize)]
struct RequestAttribute<'a> {
    id: &'a str,
    value: &'a AttributeValue,
    #[serde(rename = "type")]
    attribute_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    variation_id: serde_json::Value,
}

/// Calls the prediction service over HTTP, retrying failed requests with exponential backoff.
pub struct HttpBanditClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: HttpBanditClientConfig,
}

impl HttpBanditClient {
    pub fn new(config: HttpBanditClientConfig) -> HttpBanditClient {
        HttpBanditClient {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Prediction URL of `rule_id`. The id is percent-encoded as a single path segment, either
    /// in place of a `{rule_id}` placeholder of the endpoint or appended to it.
    fn prediction_url(&self, rule_id: &str) -> Result<Url, BanditError> {
        let endpoint = &self.config.prediction_endpoint;
        let invalid =
            |reason: &str| BanditError::FetchFailed(format!("invalid url {endpoint}: {reason}"));

        let mut url = Url::parse(endpoint).map_err(|err| invalid(&err.to_string()))?;

        let mut scratch = url.clone();
        scratch.set_path("");
        scratch
            .path_segments_mut()
            .map_err(|()| invalid("endpoint cannot have a path"))?
            .push(rule_id);
        let segment = scratch.path().trim_start_matches('/');

        let path = url.path();
        let path = if path.contains(RULE_ID_PLACEHOLDER) {
            path.replace(RULE_ID_PLACEHOLDER, segment)
        } else {
            format!("{}/{segment}", path.trim_end_matches('/'))
        };
        url.set_path(&path);
        Ok(url)
    }

    async fn attempt(&self, url: &Url, body: &PredictionRequest<'_>) -> Result<String, Attempt> {
        let response = self
            .client
            .post(url.clone())
            .timeout(self.config.timeout)
            .json(body)
            .send()
            .await
            .map_err(|err| Attempt::Retryable(err.without_url().to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|err| Attempt::Retryable(err.without_url().to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|err| Attempt::Retryable(err.without_url().to_string()))?;

        parse_prediction(&bytes).map_err(Attempt::Fatal)
    }
}

/// Outcome of a failed attempt.
enum Attempt {
    Retryable(String),
    Fatal(BanditError),
}

#[async_trait]
impl BanditClient for HttpBanditClient {
    async fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &Attributes,
        decision_uuid: &str,
    ) -> Result<String, BanditError> {
        let url = self.prediction_url(rule_id)?;
        let body = request_body(rule_id, user_id, attributes, decision_uuid);

        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.attempt(&url, &body).await {
                Ok(variation_id) => {
                    log::debug!(target: "decision_core", rule_id, user_id;
                        "fetched bandit decision");
                    return Ok(variation_id);
                }
                Err(Attempt::Fatal(err)) => {
                    log::warn!(target: "decision_core", rule_id;
                        "invalid bandit prediction response");
                    return Err(err);
                }
                Err(Attempt::Retryable(message)) if attempt < retry.max_retries => {
                    attempt += 1;
                    let backoff = retry.backoff(attempt);
                    log::info!(target: "decision_core", rule_id, attempt;
                        "bandit request failed, retrying in {backoff:?}: {message}");
                    tokio::time::sleep(backoff).await;
                }
                Err(Attempt::Retryable(message)) => {
                    log::warn!(target: "decision_core", rule_id;
                        "bandit request failed: {message}");
                    return Err(if retry.max_retries == 0 {
                        BanditError::FetchFailed(message)
                    } else {
                        BanditError::FetchFailed(format!(
                            "Exhausted all retries for bandit request: {message}"
                        ))
                    });
                }
            }
        }
    }
}

fn request_body<'a>(
    rule_id: &'a str,
    user_id: &'a str,
    attributes: &'a Attributes,
    decision_uuid: &'a str,
) -> PredictionRequest<'a> {
    let mut attributes: Vec<RequestAttribute<'a>> = attributes
        .iter()
        .map(|(key, value)| RequestAttribute {
            id: key,
            value,
            attribute_type: CUSTOM_ATTRIBUTE_TYPE,
        })
        .collect();
    attributes.sort_by(|a, b| a.id.cmp(b.id));

    PredictionRequest {
        instances: vec![PredictionInstance {
            visitor_id: user_id,
            experiment_id: rule_id,
            attributes,
            cmab_uuid: decision_uuid,
        }],
    }
}

/// Extract the variation id of the first prediction.
fn parse_prediction(body: &[u8]) -> Result<String, BanditError> {
    let response: PredictionResponse =
        serde_json::from_slice(body).map_err(|_| BanditError::InvalidResponse)?;
    let prediction = response
        .predictions
        .into_iter()
        .next()
        .ok_or(BanditError::InvalidResponse)?;
    match prediction.variation_id {
        serde_json::Value::String(id) if !id.is_empty() => Ok(id),
        serde_json::Value::Number(id) => Ok(id.to_string()),
        _ => Err(BanditError::InvalidResponse),
    }
}
