use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "new assignment")]
    NewAssignment,
    #[serde(rename = "pickup")]
    Pickup,
    #[serde(rename = "delivery")]
    Delivery,
    #[serde(rename = "IncomingInvoice")]
    IncomingInvoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    New,
    Requested,
}

/// Message queued for a user's contact channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient email
    pub recipient: String,
    #[serde(default)]
    pub copy_to: Option<String>,
    pub content_type: ContentType,
    pub status: NotificationStatus,
    pub text: String,
    /// Bags involved, when relevant
    #[serde(default)]
    pub amount: Option<u32>,
    /// Id of the record the message is about
    #[serde(default)]
    pub reference: Option<String>,
    pub created_at: u64,
}

impl Notification {
    pub fn new(
        recipient: impl Into<String>,
        content_type: ContentType,
        status: NotificationStatus,
        text: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            copy_to: None,
            content_type,
            status,
            text: text.into(),
            amount: None,
            reference: None,
            created_at,
        }
    }

    pub fn with_amount(mut self, amount: u32) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_copy_to(mut self, copy_to: impl Into<String>) -> Self {
        self.copy_to = Some(copy_to.into());
        self
    }
}
