use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::payment_store::{NewPaymentRecord, PaymentStore};
use chrono::Utc;

use crate::engine::amount::compute_slot_amount;
use crate::engine::error::OrchestrationError;
use crate::engine::schedule::{determine_schedule, parse_close_date, ScheduleDecision};
use crate::models::payment_record::{PaymentRecord, PaymentSlot};
use crate::models::product_link::ProductLink;
use crate::services::crm::{CrmService, DealLineItem};
use crate::services::payments::{
    CheckoutLineItem, CreateCatalogEntry, CreateSessionRequest, PaymentProvider,
};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub slot: PaymentSlot,
    /// Overrides the schedule decision; derived from the deal's close date
    /// when absent.
    pub decision: Option<ScheduleDecision>,
    /// Overrides the computed slot amount; used for remainder payments.
    pub custom_amount: Option<Decimal>,
    pub trigger: String,
    pub run_id: String,
}

/// Creates one checkout session end to end: deal context, amount, catalog
/// resolution, provider call, local record, CRM write-back. Every failure
/// before the provider call is side-effect free.
pub struct SessionCreator {
    crm: Arc<dyn CrmService>,
    provider: Arc<dyn PaymentProvider>,
    store: Arc<dyn PaymentStore>,
    config: Arc<Config>,
}

impl SessionCreator {
    pub fn new(
        crm: Arc<dyn CrmService>,
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn PaymentStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            crm,
            provider,
            store,
            config,
        }
    }

    pub async fn create_session(
        &self,
        deal_id: i64,
        options: SessionOptions,
    ) -> Result<PaymentRecord, OrchestrationError> {
        let contacts = self
            .crm
            .get_deal_with_contacts(deal_id)
            .await
            .map_err(|source| OrchestrationError::DealFetchFailed { deal_id, source })?;
        let deal = &contacts.deal;

        let decision = options.decision.clone().unwrap_or_else(|| {
            determine_schedule(
                parse_close_date(deal.expected_close_date.as_deref()),
                Utc::now().date_naive(),
            )
        });

        let line_items = self.crm.get_deal_line_items(deal_id).await?;
        let lead_item = line_items
            .first()
            .ok_or(OrchestrationError::NoLineItems { deal_id })?
            .clone();

        let amount = compute_slot_amount(
            deal,
            &line_items,
            decision.schedule,
            options.slot,
            options.custom_amount,
        )?;
        if amount <= Decimal::ZERO {
            return Err(OrchestrationError::AmountUndetermined { deal_id });
        }
        let unit_amount_minor = to_minor_units(amount)
            .ok_or(OrchestrationError::AmountUndetermined { deal_id })?;

        let customer_email = contacts
            .customer_email()
            .ok_or(OrchestrationError::NoCustomerEmail { deal_id })?
            .to_string();

        let provider_product_id = self.resolve_catalog_entry(&lead_item).await?;

        let mut metadata = BTreeMap::new();
        metadata.insert("deal_id".to_string(), deal_id.to_string());
        metadata.insert("product_id".to_string(), lead_item.product_id.to_string());
        metadata.insert("slot".to_string(), options.slot.as_str().to_string());
        metadata.insert(
            "schedule".to_string(),
            decision.schedule.label().to_string(),
        );
        metadata.insert(
            "payment_part".to_string(),
            options.slot.payment_part().to_string(),
        );

        let session = self
            .provider
            .create_checkout_session(CreateSessionRequest {
                line_item: CheckoutLineItem {
                    product_id: provider_product_id,
                    unit_amount_minor,
                    currency: deal.currency.to_lowercase(),
                    quantity: 1,
                },
                success_url: expand_url(&self.config.stripe.success_url, deal_id),
                cancel_url: expand_url(&self.config.stripe.cancel_url, deal_id),
                customer_email,
                client_reference_id: Some(deal_id.to_string()),
                metadata,
            })
            .await?;

        let record = self
            .store
            .create_payment_record(NewPaymentRecord {
                deal_id,
                session_id: session.id.clone(),
                slot: options.slot,
                schedule: decision.schedule,
                amount,
                currency: deal.currency.clone(),
                checkout_url: session.url.clone(),
                trigger: options.trigger,
                run_id: options.run_id,
                second_payment_date: decision.second_payment_date,
            })
            .await?;

        info!(
            deal_id,
            session_id = %record.session_id,
            slot = options.slot.as_str(),
            %amount,
            "checkout session created"
        );

        self.write_back_checkout_url(deal_id, session.url.as_deref())
            .await;

        Ok(record)
    }

    /// Provider-side product for a CRM line item: stored link (verified to
    /// still exist on the provider), then a tag lookup over the provider
    /// catalog, creating the product only as a last resort. A link pointing
    /// at a product that was deleted provider-side is re-resolved instead of
    /// failing the checkout.
    async fn resolve_catalog_entry(
        &self,
        item: &DealLineItem,
    ) -> Result<String, OrchestrationError> {
        let entries = self.provider.list_catalog_entries(item.product_id).await?;

        if let Some(link) = self.store.find_product_link(item.product_id).await? {
            if entries.iter().any(|e| e.id == link.provider_product_id) {
                return Ok(link.provider_product_id);
            }
            warn!(
                crm_product_id = item.product_id,
                provider_product_id = %link.provider_product_id,
                "linked product no longer on the provider; re-resolving"
            );
        }

        let entry = match entries.into_iter().next() {
            Some(entry) => entry,
            None => {
                info!(
                    crm_product_id = item.product_id,
                    name = %item.name,
                    "no provider product tagged for crm product; creating one"
                );
                self.provider
                    .create_catalog_entry(CreateCatalogEntry {
                        name: item.name.clone(),
                        crm_product_id: item.product_id,
                    })
                    .await?
            }
        };

        self.store
            .upsert_product_link(ProductLink {
                crm_product_id: item.product_id,
                provider_product_id: entry.id.clone(),
            })
            .await?;

        Ok(entry.id)
    }

    /// Best effort: a failed CRM write-back never fails the orchestration,
    /// the session already exists and is recorded locally.
    async fn write_back_checkout_url(&self, deal_id: i64, url: Option<&str>) {
        let (Some(field), Some(url)) = (self.config.crm.checkout_url_field.as_deref(), url)
        else {
            return;
        };
        if let Err(err) = self
            .crm
            .update_deal_field(deal_id, field, serde_json::Value::String(url.to_string()))
            .await
        {
            warn!(?err, deal_id, "failed to write checkout url back to crm");
        }
    }
}

fn expand_url(template: &str, deal_id: i64) -> String {
    template.replace("{deal_id}", &deal_id.to_string())
}

/// Two-decimal major amount to the currency's minor unit.
fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * dec!(100)).round().to_i64()
}
