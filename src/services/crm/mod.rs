use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("crm api error: {0}")]
    Api(String),
    #[error("crm request timed out: {0}")]
    Timeout(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CrmError::Timeout(err.to_string())
        } else {
            CrmError::Api(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: i64,
    pub title: String,
    pub value: Option<Decimal>,
    pub currency: String,
    pub status: String,
    pub stage_id: Option<i64>,
    /// yyyy-mm-dd; parsed downstream, unparsable values fail open to a
    /// one-part schedule.
    pub expected_close_date: Option<String>,
    pub invoice_type: Option<String>,
    pub lost_reason: Option<String>,
    /// Out-of-band cash amount the customer already committed.
    pub cash_prepaid: Option<Decimal>,
    pub person_id: Option<i64>,
    pub org_id: Option<i64>,
}

/// Deal joined with the contact data needed for receipt delivery.
#[derive(Debug, Clone)]
pub struct DealContacts {
    pub deal: Deal,
    pub person_name: Option<String>,
    pub person_email: Option<String>,
    pub org_email: Option<String>,
}

impl DealContacts {
    /// Primary-contact email, falling back to the organization's.
    pub fn customer_email(&self) -> Option<&str> {
        self.person_email
            .as_deref()
            .filter(|e| !e.is_empty())
            .or_else(|| self.org_email.as_deref().filter(|e| !e.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealLineItem {
    pub product_id: i64,
    pub name: String,
    pub quantity: u64,
    pub unit_price: Option<Decimal>,
    /// Pre-computed total; when present it already reflects the item-level
    /// discount.
    pub total: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub discount_kind: Option<DiscountKind>,
}

#[async_trait]
pub trait CrmService: Send + Sync {
    async fn get_deal(&self, deal_id: i64) -> Result<Deal, CrmError>;

    async fn get_deal_with_contacts(&self, deal_id: i64) -> Result<DealContacts, CrmError>;

    async fn get_deal_line_items(&self, deal_id: i64) -> Result<Vec<DealLineItem>, CrmError>;

    async fn update_deal_field(
        &self,
        deal_id: i64,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), CrmError>;

    async fn create_note(&self, deal_id: i64, content: &str) -> Result<(), CrmError>;

    async fn create_task(&self, deal_id: i64, subject: &str, note: &str) -> Result<(), CrmError>;
}

mod live;
mod mock;

#[allow(unused_imports)]
pub use live::LiveCrmService;
#[allow(unused_imports)]
pub use mock::MockCrmService;
