use async_trait::async_trait;
use firewood_types::{
    IncomingPayment, PaymentReference, PaymentStatus, Payout, PayoutTarget, UserContact,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::PaymentError;

const BPS_DENOMINATOR: i64 = 10_000;

// ═══════════════════════════════════════════════════════════════════════════
// PAYMENT SPLIT
// ═══════════════════════════════════════════════════════════════════════════

/// Shares of a settled deal, in basis points of the total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentSplit {
    pub driver_share_bps: u32,
    pub operator_share_bps: u32,
}

impl Default for PaymentSplit {
    fn default() -> Self {
        Self {
            driver_share_bps: 2000,  // 20%
            operator_share_bps: 500, // 5%
        }
    }
}

impl PaymentSplit {
    pub fn driver_share(&self, amount: Decimal) -> Decimal {
        share(amount, self.driver_share_bps)
    }

    pub fn operator_share(&self, amount: Decimal) -> Decimal {
        share(amount, self.operator_share_bps)
    }

    /// Whatever is left once driver and operator are paid
    pub fn seller_share(&self, amount: Decimal) -> Decimal {
        amount - self.driver_share(amount) - self.operator_share(amount)
    }
}

fn share(amount: Decimal, bps: u32) -> Decimal {
    (amount * Decimal::from(bps) / Decimal::from(BPS_DENOMINATOR)).round_dp(2)
}

// ═══════════════════════════════════════════════════════════════════════════
// GATEWAY CONTRACT
// ═══════════════════════════════════════════════════════════════════════════

/// Payment collaborator. Requests are recorded obligations; settlement of the
/// money itself happens outside this process.
///
/// Every call is idempotent per `PaymentReference` (and payout target): a
/// repeated call returns the reference recorded the first time, so a failed
/// step can be retried without paying twice.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn split(&self) -> PaymentSplit;

    /// Record that `payer` owes `amount`. Returns the payment reference.
    async fn request_payment(
        &self,
        amount: Decimal,
        payer: &UserContact,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<String, PaymentError>;

    /// Split `amount` and record the seller and driver payouts.
    /// Returns `(seller_payment_ref, driver_payment_ref)`.
    async fn pay_seller_and_driver(
        &self,
        amount: Decimal,
        seller: &UserContact,
        driver: &UserContact,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<(String, String), PaymentError>;

    /// Record the operator share of a settled deal
    async fn pay_operator(
        &self,
        amount: Decimal,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<String, PaymentError>;

    async fn incoming_for_route(&self, route_id: &str)
        -> Result<Vec<IncomingPayment>, PaymentError>;

    async fn payouts_for_route(
        &self,
        route_id: &str,
        target: PayoutTarget,
        status: Option<PaymentStatus>,
    ) -> Result<Vec<Payout>, PaymentError>;

    async fn attach_invoice(&self, payout_id: &str, invoice_id: &str) -> Result<(), PaymentError>;

    async fn mark_incoming_paid(&self, payment_id: &str) -> Result<(), PaymentError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY LEDGER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Ledger {
    incoming: BTreeMap<String, IncomingPayment>,
    payouts: BTreeMap<String, Payout>,
}

/// Gateway that only keeps the books, for tests and dry runs
#[derive(Debug, Clone)]
pub struct LedgerPaymentGateway {
    ledger: Arc<RwLock<Ledger>>,
    split: PaymentSplit,
    operator: UserContact,
}

impl LedgerPaymentGateway {
    pub fn new(split: PaymentSplit, operator: UserContact) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(Ledger::default())),
            split,
            operator,
        }
    }

    pub async fn incoming(&self) -> Vec<IncomingPayment> {
        self.ledger.read().await.incoming.values().cloned().collect()
    }

    pub async fn payouts(&self) -> Vec<Payout> {
        self.ledger.read().await.payouts.values().cloned().collect()
    }

    async fn record_payout(
        &self,
        target: PayoutTarget,
        amount: Decimal,
        payee: &UserContact,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> String {
        let mut ledger = self.ledger.write().await;
        if let Some(existing) = ledger
            .payouts
            .values()
            .find(|p| p.target == target && p.reference == reference)
        {
            debug!(payout_id = %existing.id, ?target, "Payout already recorded");
            return existing.id.clone();
        }
        let id = format!("payout-{}", Uuid::new_v4());
        let payout = Payout {
            id: id.clone(),
            target,
            amount,
            payee: payee.clone(),
            message: message.to_string(),
            reference,
            status: PaymentStatus::Unpaid,
            invoice_id: None,
            calc_time,
        };
        ledger.payouts.insert(id.clone(), payout);
        id
    }
}

fn ensure_not_negative(amount: Decimal) -> Result<(), PaymentError> {
    if amount.is_sign_negative() {
        return Err(PaymentError::InvalidAmount(amount.to_string()));
    }
    Ok(())
}

#[async_trait]
impl PaymentGateway for LedgerPaymentGateway {
    fn split(&self) -> PaymentSplit {
        self.split
    }

    async fn request_payment(
        &self,
        amount: Decimal,
        payer: &UserContact,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<String, PaymentError> {
        ensure_not_negative(amount)?;
        let mut ledger = self.ledger.write().await;
        if let Some(existing) = ledger.incoming.values().find(|p| p.reference == reference) {
            debug!(payment_id = %existing.id, payer = %payer.name, "Payment already requested");
            return Ok(existing.id.clone());
        }
        let id = format!("incoming-{}", Uuid::new_v4());
        let payment = IncomingPayment {
            id: id.clone(),
            amount,
            payer: payer.clone(),
            receiver: self.operator.name.clone(),
            message: message.to_string(),
            reference,
            status: PaymentStatus::Unpaid,
            calc_time,
        };
        ledger.incoming.insert(id.clone(), payment);

        info!(payment_id = %id, payer = %payer.name, %amount, "Payment requested");
        Ok(id)
    }

    async fn pay_seller_and_driver(
        &self,
        amount: Decimal,
        seller: &UserContact,
        driver: &UserContact,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<(String, String), PaymentError> {
        ensure_not_negative(amount)?;
        let seller_amount = self.split.seller_share(amount);
        let driver_amount = self.split.driver_share(amount);

        let seller_ref = self
            .record_payout(
                PayoutTarget::Seller,
                seller_amount,
                seller,
                message,
                reference.clone(),
                calc_time,
            )
            .await;
        let driver_ref = self
            .record_payout(
                PayoutTarget::Driver,
                driver_amount,
                driver,
                message,
                reference,
                calc_time,
            )
            .await;

        info!(
            seller = %seller.name,
            driver = %driver.name,
            %seller_amount,
            %driver_amount,
            "Seller and driver payouts recorded"
        );
        Ok((seller_ref, driver_ref))
    }

    async fn pay_operator(
        &self,
        amount: Decimal,
        message: &str,
        reference: PaymentReference,
        calc_time: u64,
    ) -> Result<String, PaymentError> {
        ensure_not_negative(amount)?;
        let operator = self.operator.clone();
        Ok(self
            .record_payout(
                PayoutTarget::Operator,
                amount,
                &operator,
                message,
                reference,
                calc_time,
            )
            .await)
    }

    async fn incoming_for_route(
        &self,
        route_id: &str,
    ) -> Result<Vec<IncomingPayment>, PaymentError> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .incoming
            .values()
            .filter(|p| p.reference.ongoing_route == route_id)
            .cloned()
            .collect())
    }

    async fn payouts_for_route(
        &self,
        route_id: &str,
        target: PayoutTarget,
        status: Option<PaymentStatus>,
    ) -> Result<Vec<Payout>, PaymentError> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .payouts
            .values()
            .filter(|p| {
                p.reference.ongoing_route == route_id
                    && p.target == target
                    && status.map_or(true, |s| p.status == s)
            })
            .cloned()
            .collect())
    }

    async fn attach_invoice(&self, payout_id: &str, invoice_id: &str) -> Result<(), PaymentError> {
        let mut ledger = self.ledger.write().await;
        let payout = ledger
            .payouts
            .get_mut(payout_id)
            .ok_or_else(|| PaymentError::NotFound(payout_id.to_string()))?;
        payout.invoice_id = Some(invoice_id.to_string());
        Ok(())
    }

    async fn mark_incoming_paid(&self, payment_id: &str) -> Result<(), PaymentError> {
        let mut ledger = self.ledger.write().await;
        let payment = ledger
            .incoming
            .get_mut(payment_id)
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))?;
        payment.status = PaymentStatus::Paid;
        Ok(())
    }
}
