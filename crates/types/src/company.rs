use serde::{Deserialize, Serialize};

/// Invoicing identity of a seller, a driver or the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
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

impl Company {
    /// Whether this company is reachable by either contact channel
    pub fn matches_contact(&self, email: &str, phone: Option<&str>) -> bool {
        (!email.is_empty() && self.email.eq_ignore_ascii_case(email))
            || matches!((phone, self.phone.as_deref()), (Some(p), Some(q)) if !p.is_empty() && p == q)
    }
}
