use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::UserContact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

/// Route context attached to every payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub drive_request: String,
    pub ongoing_route: String,
    pub sell_request: String,
    #[serde(default)]
    pub buy_request: Option<String>,
}

/// Money a buyer owes for a delivery, collected on the intermediate account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingPayment {
    pub id: String,
    pub amount: Decimal,
    pub payer: UserContact,
    pub receiver: String,
    pub message: String,
    pub reference: PaymentReference,
    pub status: PaymentStatus,
    pub calc_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutTarget {
    Seller,
    Driver,
    Operator,
}

/// Money owed from the intermediate account to a seller, driver or the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub target: PayoutTarget,
    pub amount: Decimal,
    pub payee: UserContact,
    pub message: String,
    pub reference: PaymentReference,
    pub status: PaymentStatus,
    /// Invoice backing this payout, once requested
    #[serde(default)]
    pub invoice_id: Option<String>,
    pub calc_time: u64,
}
