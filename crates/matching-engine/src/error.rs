use firewood_store::StoreError;
use firewood_types::VisitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{kind} not found: {name}")]
    MissingEntity { kind: &'static str, name: String },

    #[error("cargo underflow for driver {driver} at {buyer}: loaded={loaded}, requirement={requirement}")]
    CargoUnderflow {
        driver: String,
        buyer: String,
        loaded: u32,
        requirement: u32,
    },

    #[error("invalid visit: {0}")]
    InvalidVisit(#[from] VisitError),
}
