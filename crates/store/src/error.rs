use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate ID: {0}")]
    DuplicateId(String),

    #[error("capacity exceeded on {name}: reserved={reserved}, staged={staged}, capacity={capacity}")]
    CapacityExceeded {
        name: String,
        reserved: u32,
        staged: u32,
        capacity: u32,
    },

    #[error("counter {field} on {name} would drop below zero")]
    CounterUnderflow { name: String, field: &'static str },

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

impl StoreError {
    /// Whether the failure signals broken accounting rather than an unavailable backend
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            StoreError::CapacityExceeded { .. } | StoreError::CounterUnderflow { .. }
        )
    }
}
