// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper
// and checkout). Touching APIs outside those features requires updating
// Cargo.toml explicitly so we keep compile times and binary size in check.
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PaymentProviderError {
    #[error("payment provider api error: {0}")]
    Api(String),
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<stripe::StripeError> for PaymentProviderError {
    fn from(err: stripe::StripeError) -> Self {
        match &err {
            stripe::StripeError::Timeout => PaymentProviderError::Unavailable(err.to_string()),
            stripe::StripeError::Stripe(req) if req.http_status >= 500 => {
                PaymentProviderError::Unavailable(err.to_string())
            }
            _ => PaymentProviderError::Api(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    /// Provider-side catalog entry id.
    pub product_id: String,
    /// Amount in the currency's minor unit.
    pub unit_amount_minor: i64,
    pub currency: String,
    pub quantity: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub line_item: CheckoutLineItem,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: String,
    pub client_reference_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
}

/// Live provider-side view of a checkout session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub status: SessionStatus,
    pub paid: bool,
    pub payment_intent: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub crm_product_id: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCatalogEntry {
    pub name: String,
    pub crm_product_id: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub id: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        req: CreateSessionRequest,
    ) -> Result<ProviderSession, PaymentProviderError>;

    async fn retrieve_session(&self, session_id: &str)
        -> Result<SessionState, PaymentProviderError>;

    /// Catalog entries tagged with the given CRM product id.
    async fn list_catalog_entries(
        &self,
        crm_product_id: i64,
    ) -> Result<Vec<CatalogEntry>, PaymentProviderError>;

    async fn create_catalog_entry(
        &self,
        req: CreateCatalogEntry,
    ) -> Result<CatalogEntry, PaymentProviderError>;

    async fn expire_session(&self, session_id: &str) -> Result<(), PaymentProviderError>;

    async fn create_refund(
        &self,
        payment_intent_id: &str,
    ) -> Result<RefundOutcome, PaymentProviderError>;
}

mod live;
mod mock;

#[allow(unused_imports)]
pub use live::StripePaymentProvider;
#[allow(unused_imports)]
pub use mock::MockPaymentProvider;
