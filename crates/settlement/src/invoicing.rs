use async_trait::async_trait;
use chrono::DateTime;
use firewood_types::{Company, SECONDS_PER_DAY};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::InvoiceError;

/// Payment terms applied to every invoice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvoiceTerms {
    pub due_days: u64,
    pub vat_rate: Decimal,
}

impl Default for InvoiceTerms {
    fn default() -> Self {
        Self {
            due_days: 30,
            vat_rate: Decimal::new(25, 2), // 25%
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub from: Company,
    pub to: Company,
    pub amount: Decimal,
    pub amount_excl_vat: Decimal,
    pub vat: Decimal,
    pub message: String,
    pub bill_date: u64,
    pub due_date: u64,
    /// Name of the rendered document
    pub filename: String,
}

impl Invoice {
    pub fn build(
        from: &Company,
        to: &Company,
        amount: Decimal,
        message: &str,
        bill_date: u64,
        terms: InvoiceTerms,
    ) -> Result<Self, InvoiceError> {
        if amount.is_sign_negative() {
            return Err(InvoiceError::Invalid(format!("negative amount {amount}")));
        }
        let amount_excl_vat = (amount / (Decimal::ONE + terms.vat_rate)).round_dp(2);
        let date = DateTime::from_timestamp(bill_date as i64, 0)
            .map(|d| d.format("%Y%m%d").to_string())
            .ok_or_else(|| InvoiceError::Invalid(format!("bill date {bill_date}")))?;

        Ok(Self {
            id: format!("invoice-{}", Uuid::new_v4()),
            from: from.clone(),
            to: to.clone(),
            amount,
            amount_excl_vat,
            vat: amount - amount_excl_vat,
            message: message.to_string(),
            bill_date,
            due_date: bill_date + terms.due_days * SECONDS_PER_DAY,
            filename: format!("faktura_{}_{}.pdf", from.companynum, date),
        })
    }
}

/// Invoicing collaborator: produces a retrievable invoice document handle
#[async_trait]
pub trait InvoiceService: Send + Sync {
    async fn create_invoice(
        &self,
        from: &Company,
        to: &Company,
        amount: Decimal,
        message: &str,
        bill_date: u64,
    ) -> Result<Invoice, InvoiceError>;

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, InvoiceError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryInvoiceService {
    invoices: Arc<RwLock<BTreeMap<String, Invoice>>>,
    terms: InvoiceTerms,
}

impl InMemoryInvoiceService {
    pub fn new(terms: InvoiceTerms) -> Self {
        Self {
            invoices: Arc::new(RwLock::new(BTreeMap::new())),
            terms,
        }
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.invoices.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl InvoiceService for InMemoryInvoiceService {
    async fn create_invoice(
        &self,
        from: &Company,
        to: &Company,
        amount: Decimal,
        message: &str,
        bill_date: u64,
    ) -> Result<Invoice, InvoiceError> {
        let invoice = Invoice::build(from, to, amount, message, bill_date, self.terms)?;
        self.invoices
            .write()
            .await
            .insert(invoice.id.clone(), invoice.clone());

        info!(
            invoice_id = %invoice.id,
            from = %from.name,
            %amount,
            "Invoice created"
        );
        Ok(invoice)
    }

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, InvoiceError> {
        Ok(self.invoices.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_company(name: &str, num: &str) -> Company {
        Company {
            name: name.to_string(),
            companynum: num.to_string(),
            address: "Skogveien 1".to_string(),
            email: format!("{num}@example.no"),
            phone: None,
            account_number: None,
        }
    }

    #[test]
    fn test_vat_breakdown() {
        let invoice = Invoice::build(
            &create_test_company("Ved AS", "111"),
            &create_test_company("VEDBJØRN AS", "929350790"),
            Decimal::new(1000, 0),
            "Betaling for 4 vedsekker",
            1_700_000_000,
            InvoiceTerms::default(),
        )
        .unwrap();

        assert_eq!(invoice.amount_excl_vat, Decimal::new(800, 0));
        assert_eq!(invoice.vat, Decimal::new(200, 0));
        assert_eq!(invoice.due_date, 1_700_000_000 + 30 * SECONDS_PER_DAY);
        assert_eq!(invoice.filename, "faktura_111_20231114.pdf");
    }

    #[test]
    fn test_vat_rounds_to_cents() {
        let invoice = Invoice::build(
            &create_test_company("Ved AS", "111"),
            &create_test_company("Operator", "222"),
            Decimal::new(100, 0),
            "x",
            0,
            InvoiceTerms::default(),
        )
        .unwrap();
        assert_eq!(invoice.amount_excl_vat, Decimal::new(8000, 2));

        let odd = Invoice::build(
            &create_test_company("Ved AS", "111"),
            &create_test_company("Operator", "222"),
            Decimal::new(9999, 2),
            "x",
            0,
            InvoiceTerms::default(),
        )
        .unwrap();
        assert_eq!(odd.amount_excl_vat, Decimal::new(7999, 2));
        assert_eq!(odd.vat, Decimal::new(2000, 2));
    }

    #[tokio::test]
    async fn test_invoice_is_retrievable() {
        let service = InMemoryInvoiceService::new(InvoiceTerms::default());
        let invoice = service
            .create_invoice(
                &create_test_company("Ved AS", "111"),
                &create_test_company("Operator", "222"),
                Decimal::new(250, 0),
                "Fullført kjøreoppdrag",
                0,
            )
            .await
            .unwrap();

        let fetched = service.get_invoice(&invoice.id).await.unwrap();
        assert_eq!(fetched, Some(invoice));
        assert!(service.get_invoice("nope").await.unwrap().is_none());
    }
}
