use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use super::{
    CrmError, CrmService, Deal, DealContacts, DealLineItem, DiscountKind,
};
use crate::config::CrmSettings;

/// Pipedrive-style REST client. All custom-field keys (invoice classifier,
/// cash pre-payment) are configured, not hard-coded, so downstream code only
/// ever sees the canonical `Deal` shape.
pub struct LiveCrmService {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    invoice_type_field: String,
    cash_prepaid_field: String,
}

impl LiveCrmService {
    pub fn from_settings(settings: &CrmSettings) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| CrmError::Api(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            invoice_type_field: settings.invoice_type_field.clone(),
            cash_prepaid_field: settings.cash_prepaid_field.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}?api_token={}",
            self.base_url,
            path.trim_start_matches('/'),
            self.api_token
        )
    }

    async fn get_data(&self, path: &str) -> Result<Value, CrmError> {
        let resp = self.client.get(self.url(path)).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() || !body.get("success").and_then(Value::as_bool).unwrap_or(false) {
            return Err(CrmError::Api(format!(
                "GET {} failed with status {}",
                path, status
            )));
        }
        match body.get("data") {
            Some(Value::Null) | None => Err(CrmError::NotFound(path.to_string())),
            Some(data) => Ok(data.clone()),
        }
    }

    fn parse_deal(&self, data: &Value) -> Result<Deal, CrmError> {
        let id = data
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| CrmError::Serde("deal payload missing id".into()))?;
        Ok(Deal {
            id,
            title: data
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            value: decimal_field(data.get("value")),
            currency: data
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or("EUR")
                .to_string(),
            status: data
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("open")
                .to_string(),
            stage_id: data.get("stage_id").and_then(Value::as_i64),
            expected_close_date: data
                .get("expected_close_date")
                .and_then(Value::as_str)
                .map(str::to_string),
            invoice_type: data
                .get(&self.invoice_type_field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            lost_reason: data
                .get("lost_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            cash_prepaid: decimal_field(data.get(&self.cash_prepaid_field)),
            person_id: entity_id(data.get("person_id")),
            org_id: entity_id(data.get("org_id")),
        })
    }
}

/// Amounts arrive as numbers or strings depending on the field type.
fn decimal_field(value: Option<&Value>) -> Option<Decimal> {
    let value = value?;
    match value {
        Value::String(s) if !s.is_empty() => s.parse().ok(),
        Value::Number(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

/// Related-entity fields come back either as a bare id or as an embedded
/// object carrying `value`.
fn entity_id(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value
        .as_i64()
        .or_else(|| value.get("value").and_then(Value::as_i64))
}

fn primary_email(data: &Value) -> Option<String> {
    match data.get("email") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Array(entries)) => entries
            .iter()
            .find(|e| e.get("primary").and_then(Value::as_bool).unwrap_or(false))
            .or_else(|| entries.first())
            .and_then(|e| e.get("value").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl CrmService for LiveCrmService {
    async fn get_deal(&self, deal_id: i64) -> Result<Deal, CrmError> {
        let data = self.get_data(&format!("deals/{}", deal_id)).await?;
        self.parse_deal(&data)
    }

    async fn get_deal_with_contacts(&self, deal_id: i64) -> Result<DealContacts, CrmError> {
        let deal = self.get_deal(deal_id).await?;

        let mut person_name = None;
        let mut person_email = None;
        if let Some(person_id) = deal.person_id {
            match self.get_data(&format!("persons/{}", person_id)).await {
                Ok(person) => {
                    person_name = person
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    person_email = primary_email(&person);
                }
                Err(err) => {
                    tracing::warn!(?err, deal_id, person_id, "failed to load deal person");
                }
            }
        }

        let mut org_email = None;
        if let Some(org_id) = deal.org_id {
            match self.get_data(&format!("organizations/{}", org_id)).await {
                Ok(org) => org_email = primary_email(&org),
                Err(err) => {
                    tracing::warn!(?err, deal_id, org_id, "failed to load deal organization");
                }
            }
        }

        Ok(DealContacts {
            deal,
            person_name,
            person_email,
            org_email,
        })
    }

    async fn get_deal_line_items(&self, deal_id: i64) -> Result<Vec<DealLineItem>, CrmError> {
        let data = match self.get_data(&format!("deals/{}/products", deal_id)).await {
            Ok(data) => data,
            // No attached products comes back as an empty data payload
            Err(CrmError::NotFound(_)) => return Ok(vec![]),
            Err(err) => return Err(err),
        };
        let entries = data.as_array().cloned().unwrap_or_default();
        let items = entries
            .iter()
            .filter_map(|entry| {
                let product_id = entry.get("product_id").and_then(Value::as_i64)?;
                Some(DealLineItem {
                    product_id,
                    name: entry
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    quantity: entry
                        .get("quantity")
                        .and_then(Value::as_u64)
                        .unwrap_or(1),
                    unit_price: decimal_field(entry.get("item_price")),
                    total: decimal_field(entry.get("sum")),
                    discount: decimal_field(entry.get("discount")),
                    discount_kind: entry.get("discount_type").and_then(Value::as_str).map(
                        |kind| match kind {
                            "amount" => DiscountKind::Amount,
                            _ => DiscountKind::Percentage,
                        },
                    ),
                })
            })
            .collect();
        Ok(items)
    }

    async fn update_deal_field(
        &self,
        deal_id: i64,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), CrmError> {
        let body = serde_json::json!({ field: value });
        let resp = self
            .client
            .put(self.url(&format!("deals/{}", deal_id)))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CrmError::Api(format!(
                "updating deal {} field {} failed with status {}",
                deal_id,
                field,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn create_note(&self, deal_id: i64, content: &str) -> Result<(), CrmError> {
        let body = serde_json::json!({ "deal_id": deal_id, "content": content });
        let resp = self.client.post(self.url("notes")).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(CrmError::Api(format!(
                "creating note on deal {} failed with status {}",
                deal_id,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn create_task(&self, deal_id: i64, subject: &str, note: &str) -> Result<(), CrmError> {
        let body = serde_json::json!({
            "deal_id": deal_id,
            "subject": subject,
            "note": note,
            "type": "task",
        });
        let resp = self
            .client
            .post(self.url("activities"))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CrmError::Api(format!(
                "creating task on deal {} failed with status {}",
                deal_id,
                resp.status()
            )));
        }
        Ok(())
    }
}
