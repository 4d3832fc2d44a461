use firewood_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment not found: {0}")]
    NotFound(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("invalid invoice: {0}")]
    Invalid(String),

    #[error("invoice service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("missing recipient")]
    MissingRecipient,

    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("invoice error: {0}")]
    Invoice(#[from] InvoiceError),

    #[error("no planned route for driver {0}")]
    PlannedRouteNotFound(String),

    #[error("ongoing route not found: {0}")]
    OngoingRouteNotFound(String),

    #[error("driver {0} already has an ongoing route")]
    DriverBusy(String),

    #[error("{kind} not found: {name}")]
    MissingEntity { kind: &'static str, name: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl LifecycleError {
    pub fn missing(kind: &'static str, name: impl Into<String>) -> Self {
        Self::MissingEntity {
            kind,
            name: name.into(),
        }
    }
}
