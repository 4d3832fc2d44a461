//! Configuration validation

use crate::{AppConfig, ConfigError, OperatorConfig, Result};

const MAX_BPS: u32 = 10_000;

/// Validation error details
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let errors = collect_errors(config);

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Every problem found in `config`, in section order
pub fn collect_errors(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(e) = validate_log_level(&config.logging.level) {
        errors.push(e);
    }

    if config.matching.minimum_age_secs == 0 {
        errors.push(ValidationError::new(
            "matching.minimum_age_secs",
            "must be greater than 0",
        ));
    }

    let lifecycle = &config.lifecycle;
    if lifecycle.claim_due_secs == 0 {
        errors.push(ValidationError::new(
            "lifecycle.claim_due_secs",
            "must be greater than 0",
        ));
    }
    if lifecycle.default_price_per_bag == 0 {
        errors.push(ValidationError::new(
            "lifecycle.default_price_per_bag",
            "must be greater than 0",
        ));
    }
    if lifecycle.confirmation_code_length == 0 || lifecycle.confirmation_code_length > 16 {
        errors.push(ValidationError::new(
            "lifecycle.confirmation_code_length",
            "must be between 1 and 16",
        ));
    }
    if !(0.0..1.0).contains(&lifecycle.vat_rate) {
        errors.push(ValidationError::new(
            "lifecycle.vat_rate",
            "must be a fraction in [0, 1)",
        ));
    }

    let payments = &config.payments;
    if payments.driver_share_bps > MAX_BPS {
        errors.push(ValidationError::new(
            "payments.driver_share_bps",
            "must be <= 10000 (100%)",
        ));
    }
    if payments.operator_share_bps > MAX_BPS {
        errors.push(ValidationError::new(
            "payments.operator_share_bps",
            "must be <= 10000 (100%)",
        ));
    }
    if payments.driver_share_bps + payments.operator_share_bps > MAX_BPS {
        errors.push(ValidationError::new(
            "payments",
            "driver and operator shares exceed the deal amount",
        ));
    }

    errors.extend(validate_operator(&config.operator));

    let retry = &config.retry;
    if retry.initial_delay_secs == 0 {
        errors.push(ValidationError::new(
            "retry.initial_delay_secs",
            "must be greater than 0",
        ));
    }
    if retry.max_delay_secs < retry.initial_delay_secs {
        errors.push(ValidationError::new(
            "retry.max_delay_secs",
            "must be >= initial_delay_secs",
        ));
    }
    if retry.multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retry.multiplier",
            "must be >= 1.0",
        ));
    }

    if let Some(path) = &config.storage.failed_match_db {
        if path.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.failed_match_db",
                "path must not be empty when set",
            ));
        }
    }

    errors
}

/// Validate the operator company used on outgoing invoices
pub fn validate_operator(operator: &OperatorConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if operator.name.trim().is_empty() {
        errors.push(ValidationError::new("operator.name", "name is required"));
    }

    // Norwegian organisation numbers are nine digits
    if operator.companynum.len() != 9 || !operator.companynum.chars().all(|c| c.is_ascii_digit())
    {
        errors.push(ValidationError::new(
            "operator.companynum",
            "must be a nine digit organisation number",
        ));
    }

    if !operator.email.contains('@') {
        errors.push(ValidationError::new(
            "operator.email",
            "must be an email address",
        ));
    }

    errors
}

/// Validate log level directive
///
/// Accepts a bare level or a comma separated `EnvFilter` directive list
/// such as `info,firewood_settlement=debug`.
pub fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

    if level.trim().is_empty() {
        return Err(ValidationError::new("logging.level", "must not be empty"));
    }

    for directive in level.split(',') {
        let lvl = directive.rsplit('=').next().unwrap_or(directive).trim();
        if !LEVELS.contains(&lvl.to_lowercase().as_str()) {
            return Err(ValidationError::new(
                "logging.level",
                format!("invalid log level '{lvl}', must be one of: {}", LEVELS.join(", ")),
            ));
        }
    }

    Ok(())
}
