use std::collections::HashMap;

use async_trait::async_trait;

use super::{
    CatalogEntry, CreateCatalogEntry, CreateSessionRequest, PaymentProvider,
    PaymentProviderError, ProviderSession, RefundOutcome, SessionState, SessionStatus,
};
use crate::config::StripeSettings;

pub const CRM_PRODUCT_ID_TAG: &str = "crm_product_id";

pub struct StripePaymentProvider {
    client: stripe::Client,
}

impl StripePaymentProvider {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
        }
    }

    pub fn from_settings(settings: &StripeSettings) -> Self {
        Self::new(settings.secret_key.clone())
    }
}

fn parse_currency(code: &str) -> Result<stripe::Currency, PaymentProviderError> {
    serde_json::from_value(serde_json::Value::String(code.to_lowercase()))
        .map_err(|_| PaymentProviderError::Config(format!("unsupported currency {}", code)))
}

fn map_session_status(status: Option<stripe::CheckoutSessionStatus>) -> SessionStatus {
    match status {
        Some(stripe::CheckoutSessionStatus::Complete) => SessionStatus::Complete,
        Some(stripe::CheckoutSessionStatus::Expired) => SessionStatus::Expired,
        _ => SessionStatus::Open,
    }
}

fn entry_from_product(product: &stripe::Product) -> CatalogEntry {
    CatalogEntry {
        id: product.id.to_string(),
        name: product.name.clone().unwrap_or_default(),
        crm_product_id: product
            .metadata
            .as_ref()
            .and_then(|m| m.get(CRM_PRODUCT_ID_TAG))
            .and_then(|v| v.parse::<i64>().ok()),
    }
}

#[async_trait]
impl PaymentProvider for StripePaymentProvider {
    async fn create_checkout_session(
        &self,
        req: CreateSessionRequest,
    ) -> Result<ProviderSession, PaymentProviderError> {
        let currency = parse_currency(&req.line_item.currency)?;

        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(stripe::CheckoutSessionMode::Payment);
        params.success_url = Some(&req.success_url);
        params.cancel_url = Some(&req.cancel_url);
        params.customer_email = Some(&req.customer_email);
        if let Some(ref reference) = req.client_reference_id {
            params.client_reference_id = Some(reference);
        }
        let mut metadata = HashMap::new();
        for (k, v) in req.metadata.iter() {
            metadata.insert(k.clone(), v.clone());
        }
        params.metadata = Some(metadata);
        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            quantity: Some(req.line_item.quantity),
            price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
                currency,
                product: Some(req.line_item.product_id.clone()),
                unit_amount: Some(req.line_item.unit_amount_minor),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let session = stripe::CheckoutSession::create(&self.client, params).await?;
        Ok(ProviderSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<SessionState, PaymentProviderError> {
        let id = session_id
            .parse::<stripe::CheckoutSessionId>()
            .map_err(|e| PaymentProviderError::Serde(e.to_string()))?;
        let session = stripe::CheckoutSession::retrieve(&self.client, &id, &[]).await?;

        let paid = matches!(
            session.payment_status,
            stripe::CheckoutSessionPaymentStatus::Paid
                | stripe::CheckoutSessionPaymentStatus::NoPaymentRequired
        );
        let payment_intent = session.payment_intent.as_ref().map(|pi| match pi {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(obj) => obj.id.to_string(),
        });

        Ok(SessionState {
            id: session.id.to_string(),
            status: map_session_status(session.status),
            paid,
            payment_intent,
        })
    }

    async fn list_catalog_entries(
        &self,
        crm_product_id: i64,
    ) -> Result<Vec<CatalogEntry>, PaymentProviderError> {
        // Stripe's list API cannot filter by metadata; filter client-side over
        // the active catalog page.
        let mut params = stripe::ListProducts::new();
        params.active = Some(true);
        params.limit = Some(100);
        let products = stripe::Product::list(&self.client, &params).await?;

        let tag = crm_product_id.to_string();
        Ok(products
            .data
            .iter()
            .map(entry_from_product)
            .filter(|entry| {
                entry
                    .crm_product_id
                    .map(|id| id.to_string() == tag)
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn create_catalog_entry(
        &self,
        req: CreateCatalogEntry,
    ) -> Result<CatalogEntry, PaymentProviderError> {
        let mut params = stripe::CreateProduct::new(&req.name);
        params.metadata = Some(
            [(CRM_PRODUCT_ID_TAG.to_string(), req.crm_product_id.to_string())]
                .into_iter()
                .collect(),
        );
        let product = stripe::Product::create(&self.client, params).await?;
        Ok(entry_from_product(&product))
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), PaymentProviderError> {
        let id = session_id
            .parse::<stripe::CheckoutSessionId>()
            .map_err(|e| PaymentProviderError::Serde(e.to_string()))?;
        let _session: stripe::CheckoutSession = self
            .client
            .post(&format!("/checkout/sessions/{}/expire", id))
            .await?;
        Ok(())
    }

    async fn create_refund(
        &self,
        payment_intent_id: &str,
    ) -> Result<RefundOutcome, PaymentProviderError> {
        let pi = payment_intent_id
            .parse::<stripe::PaymentIntentId>()
            .map_err(|e| PaymentProviderError::Serde(e.to_string()))?;
        let mut params = stripe::CreateRefund::new();
        params.payment_intent = Some(pi);
        let refund = stripe::Refund::create(&self.client, params).await?;
        Ok(RefundOutcome {
            id: refund.id.to_string(),
            status: refund
                .status
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".into()),
        })
    }
}
