//! Core configuration structures

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Tracing output
    pub logging: LoggingConfig,

    /// Matcher eligibility and scheduling
    pub matching: MatchingSettings,

    /// Route lifecycle and invoicing
    pub lifecycle: LifecycleSettings,

    /// Payout split of a settled deal
    pub payments: PaymentSettings,

    /// Company receiving outgoing invoices
    pub operator: OperatorConfig,

    /// Failed-match retry backoff
    pub retry: RetrySettings,

    /// Persistent storage locations
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingSettings {
    /// Minimum time since a buyer was last calculated
    #[serde(default = "default_minimum_age_secs")]
    pub minimum_age_secs: u64,

    /// Run counties concurrently within a cycle
    #[serde(default)]
    pub parallel_counties: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// Time a driver has to finish a claimed route
    #[serde(default = "default_claim_due_secs")]
    pub claim_due_secs: u64,

    /// Price per bag when neither county nor seller sets one
    #[serde(default = "default_price_per_bag")]
    pub default_price_per_bag: u32,

    #[serde(default = "default_confirmation_code_length")]
    pub confirmation_code_length: usize,

    /// Hold wrap-up until every buyer has paid
    #[serde(default)]
    pub require_paid_before_settlement: bool,

    #[serde(default = "default_invoice_due_days")]
    pub invoice_due_days: u64,

    /// VAT as a fraction (0.25 = 25%)
    #[serde(default = "default_vat_rate")]
    pub vat_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSettings {
    #[serde(default = "default_driver_share_bps")]
    pub driver_share_bps: u32,

    #[serde(default = "default_operator_share_bps")]
    pub operator_share_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub name: String,

    /// Organisation number
    pub companynum: String,

    pub address: String,

    pub email: String,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub account_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file for the failed-match ledger; in-memory when unset
    #[serde(default)]
    pub failed_match_db: Option<String>,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_minimum_age_secs() -> u64 {
    432_000 // 5 days
}

fn default_claim_due_secs() -> u64 {
    172_800 // 2 days
}

fn default_price_per_bag() -> u32 {
    150
}

fn default_confirmation_code_length() -> usize {
    4
}

fn default_invoice_due_days() -> u64 {
    30
}

fn default_vat_rate() -> f64 {
    0.25
}

fn default_driver_share_bps() -> u32 {
    2000 // 20%
}

fn default_operator_share_bps() -> u32 {
    500 // 5%
}

fn default_initial_delay_secs() -> u64 {
    3600 // 1 hour
}

fn default_max_delay_secs() -> u64 {
    604_800 // 1 week
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            minimum_age_secs: default_minimum_age_secs(),
            parallel_counties: false,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            claim_due_secs: default_claim_due_secs(),
            default_price_per_bag: default_price_per_bag(),
            confirmation_code_length: default_confirmation_code_length(),
            require_paid_before_settlement: false,
            invoice_due_days: default_invoice_due_days(),
            vat_rate: default_vat_rate(),
        }
    }
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            driver_share_bps: default_driver_share_bps(),
            operator_share_bps: default_operator_share_bps(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            name: "VEDBJØRN AS".to_string(),
            companynum: "929350790".to_string(),
            address: "Adalsveien 1B , 3185 , SKOPPUM".to_string(),
            email: "regninger@vedbjorn.no".to_string(),
            phone: None,
            account_number: None,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            multiplier: default_multiplier(),
        }
    }
}
