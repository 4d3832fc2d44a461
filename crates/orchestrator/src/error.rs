use firewood_config::ConfigError;
use firewood_matching_engine::MatchingError;
use firewood_settlement::LifecycleError;
use firewood_store::StoreError;
use thiserror::Error;

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("matching failed: {0}")]
    Matching(#[from] MatchingError),

    #[error("lifecycle failed: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("assembly failed: {0}")]
    Builder(#[from] BuilderError),

    #[error("tracing initialisation failed: {0}")]
    Tracing(String),
}

/// Builder error
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("missing required field: {field}")]
    MissingField { field: String },
}
