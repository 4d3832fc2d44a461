//! Translation of loaded configuration into the component configs

use firewood_config::{AppConfig, OperatorConfig, RetrySettings, StorageConfig};
use firewood_matching_engine::MatchingConfig;
use firewood_settlement::{InvoiceTerms, LifecycleConfig, PaymentSplit};
use firewood_store::{FailedMatchStore, InMemoryFailedMatchStore, SqliteFailedMatchStore};
use firewood_types::{Company, UserContact};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{ExponentialBackoff, OrchestratorError};

pub fn matching_config(config: &AppConfig) -> MatchingConfig {
    MatchingConfig {
        minimum_age_secs: config.matching.minimum_age_secs,
    }
}

pub fn payment_split(config: &AppConfig) -> PaymentSplit {
    PaymentSplit {
        driver_share_bps: config.payments.driver_share_bps,
        operator_share_bps: config.payments.operator_share_bps,
    }
}

pub fn invoice_terms(config: &AppConfig) -> Result<InvoiceTerms, OrchestratorError> {
    let vat_rate = Decimal::try_from(config.lifecycle.vat_rate)
        .map_err(|e| OrchestratorError::InvalidSetting {
            field: "lifecycle.vat_rate",
            reason: e.to_string(),
        })?
        .round_dp(4);

    Ok(InvoiceTerms {
        due_days: config.lifecycle.invoice_due_days,
        vat_rate,
    })
}

pub fn lifecycle_config(config: &AppConfig) -> LifecycleConfig {
    let lifecycle = &config.lifecycle;
    LifecycleConfig {
        claim_due_secs: lifecycle.claim_due_secs,
        default_price_per_bag: Decimal::from(lifecycle.default_price_per_bag),
        confirmation_code_length: lifecycle.confirmation_code_length,
        require_paid_before_settlement: lifecycle.require_paid_before_settlement,
        operator: operator_company(&config.operator),
    }
}

pub fn operator_company(operator: &OperatorConfig) -> Company {
    Company {
        name: operator.name.clone(),
        companynum: operator.companynum.clone(),
        address: operator.address.clone(),
        email: operator.email.clone(),
        phone: operator.phone.clone(),
        account_number: operator.account_number.clone(),
    }
}

/// Payment recipient of the operator share
pub fn operator_contact(operator: &OperatorConfig) -> UserContact {
    UserContact {
        name: operator.name.clone(),
        email: operator.email.clone(),
        phone: operator.phone.clone(),
    }
}

pub fn backoff(retry: &RetrySettings) -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_secs(retry.initial_delay_secs),
        Duration::from_secs(retry.max_delay_secs),
    )
    .with_multiplier(retry.multiplier)
}

/// SQLite ledger when a path is configured, in-memory otherwise
pub async fn open_failed_match_store(
    storage: &StorageConfig,
) -> Result<Arc<dyn FailedMatchStore>, OrchestratorError> {
    match &storage.failed_match_db {
        Some(path) => {
            info!(path = %path, "Opening failed-match ledger");
            Ok(Arc::new(SqliteFailedMatchStore::new(path).await?))
        }
        None => Ok(Arc::new(InMemoryFailedMatchStore::new())),
    }
}
