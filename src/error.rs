use std::sync::Arc;

use crate::bandits::BanditError;

/// Represents a result type for operations in the decision engine.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// crate-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the decision engine.
///
/// Errors found while evaluating audiences or bucketing users never surface here: they are
/// recorded as decision reasons instead. Only configuration-identity errors and bandit failures
/// are returned to the caller.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No configuration has been published to the configuration store yet.
    #[error("decision engine is not configured yet")]
    ConfigurationMissing,

    /// Requested flag key is not present in the current configuration.
    #[error("no flag was found for key {0:?}")]
    FlagNotFound(String),

    /// Requested experiment key is not present in the current configuration.
    #[error("no experiment was found for key {0:?}")]
    ExperimentNotFound(String),

    /// Requested variation key does not belong to the experiment.
    #[error("no variation {variation_key:?} in experiment {experiment_key:?}")]
    VariationNotFound {
        /// Experiment that was searched.
        experiment_key: String,
        /// Variation key that was not found.
        variation_key: String,
    },

    /// Project configuration could not be deserialized.
    #[error("invalid project configuration: {0}")]
    InvalidConfiguration(String),

    /// Bandit decision could not be obtained.
    #[error(transparent)]
    Bandit(BanditError),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<BanditError> for Error {
    fn from(value: BanditError) -> Self {
        Error::Bandit(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}
