#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{CrmError, CrmService, Deal, DealContacts, DealLineItem};

/// Capturing CRM double for tests. Seed deals, line items and contact
/// emails; every write is recorded for assertions.
#[derive(Clone, Default)]
pub struct MockCrmService {
    pub deals: Arc<Mutex<HashMap<i64, Deal>>>,
    pub line_items: Arc<Mutex<HashMap<i64, Vec<DealLineItem>>>>,
    pub person_emails: Arc<Mutex<HashMap<i64, String>>>,
    pub org_emails: Arc<Mutex<HashMap<i64, String>>>,
    pub field_updates: Arc<Mutex<Vec<(i64, String, serde_json::Value)>>>,
    pub notes: Arc<Mutex<Vec<(i64, String)>>>,
    pub tasks: Arc<Mutex<Vec<(i64, String, String)>>>,
    pub fail_deal_fetch: Arc<Mutex<bool>>,
    latency: Arc<Mutex<Option<std::time::Duration>>>,
}

impl MockCrmService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_deal(&self, deal: Deal) {
        self.deals.lock().unwrap().insert(deal.id, deal);
    }

    pub fn seed_line_items(&self, deal_id: i64, items: Vec<DealLineItem>) {
        self.line_items.lock().unwrap().insert(deal_id, items);
    }

    pub fn seed_person_email(&self, deal_id: i64, email: &str) {
        self.person_emails
            .lock()
            .unwrap()
            .insert(deal_id, email.to_string());
    }

    pub fn seed_org_email(&self, deal_id: i64, email: &str) {
        self.org_emails
            .lock()
            .unwrap()
            .insert(deal_id, email.to_string());
    }

    pub fn set_fail_deal_fetch(&self, fail: bool) {
        *self.fail_deal_fetch.lock().unwrap() = fail;
    }

    /// Delays every deal fetch, for tests that need overlapping requests
    /// to actually interleave.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }
}

#[async_trait]
impl CrmService for MockCrmService {
    async fn get_deal(&self, deal_id: i64) -> Result<Deal, CrmError> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if *self.fail_deal_fetch.lock().unwrap() {
            return Err(CrmError::Api("simulated crm outage".into()));
        }
        self.deals
            .lock()
            .unwrap()
            .get(&deal_id)
            .cloned()
            .ok_or_else(|| CrmError::NotFound(format!("deal {}", deal_id)))
    }

    async fn get_deal_with_contacts(&self, deal_id: i64) -> Result<DealContacts, CrmError> {
        let deal = self.get_deal(deal_id).await?;
        Ok(DealContacts {
            deal,
            person_name: None,
            person_email: self.person_emails.lock().unwrap().get(&deal_id).cloned(),
            org_email: self.org_emails.lock().unwrap().get(&deal_id).cloned(),
        })
    }

    async fn get_deal_line_items(&self, deal_id: i64) -> Result<Vec<DealLineItem>, CrmError> {
        Ok(self
            .line_items
            .lock()
            .unwrap()
            .get(&deal_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_deal_field(
        &self,
        deal_id: i64,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), CrmError> {
        self.field_updates
            .lock()
            .unwrap()
            .push((deal_id, field.to_string(), value));
        Ok(())
    }

    async fn create_note(&self, deal_id: i64, content: &str) -> Result<(), CrmError> {
        self.notes.lock().unwrap().push((deal_id, content.to_string()));
        Ok(())
    }

    async fn create_task(&self, deal_id: i64, subject: &str, note: &str) -> Result<(), CrmError> {
        self.tasks
            .lock()
            .unwrap()
            .push((deal_id, subject.to_string(), note.to_string()));
        Ok(())
    }
}
