#![allow(dead_code)]
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::payment_store::{
    NewPaymentRecord, PaymentRecordFilter, PaymentRecordUpdate, PaymentStore,
};
use crate::models::payment_record::{PaymentRecord, PaymentStatus};
use crate::models::product_link::ProductLink;

/// In-memory store for tests. Captures every write so assertions can inspect
/// exactly what the engine persisted.
#[derive(Clone, Default)]
pub struct MockPaymentStore {
    pub records: Arc<Mutex<Vec<PaymentRecord>>>,
    pub product_links: Arc<Mutex<Vec<ProductLink>>>,
    pub fail_writes: Arc<Mutex<bool>>,
}

impl MockPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_record(&self, record: PaymentRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn seed_link(&self, link: ProductLink) {
        self.product_links.lock().unwrap().push(link);
    }

    pub fn mark_paid(&self, record_id: Uuid) {
        let mut records = self.records.lock().unwrap();
        if let Some(rec) = records.iter_mut().find(|r| r.id == record_id) {
            rec.status = PaymentStatus::Paid;
            rec.updated_at = OffsetDateTime::now_utc();
        }
    }
}

#[async_trait]
impl PaymentStore for MockPaymentStore {
    async fn list_payment_records(
        &self,
        filter: PaymentRecordFilter,
    ) -> Result<Vec<PaymentRecord>, sqlx::Error> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| filter.deal_id.map(|d| r.deal_id == d).unwrap_or(true))
            .filter(|r| filter.slot.map(|s| r.slot == s).unwrap_or(true))
            .filter(|r| filter.status.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn create_payment_record(
        &self,
        record: NewPaymentRecord,
    ) -> Result<PaymentRecord, sqlx::Error> {
        if *self.fail_writes.lock().unwrap() {
            return Err(sqlx::Error::PoolClosed);
        }
        let now = OffsetDateTime::now_utc();
        let stored = PaymentRecord {
            id: Uuid::new_v4(),
            deal_id: record.deal_id,
            session_id: record.session_id,
            slot: record.slot,
            schedule: record.schedule,
            amount: record.amount,
            currency: record.currency,
            status: PaymentStatus::Unpaid,
            checkout_url: record.checkout_url,
            trigger: record.trigger,
            run_id: record.run_id,
            second_payment_date: record.second_payment_date,
            created_at: now,
            updated_at: now,
        };
        self.records.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn update_payment_record(
        &self,
        id: Uuid,
        update: PaymentRecordUpdate,
    ) -> Result<PaymentRecord, sqlx::Error> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(url) = update.checkout_url {
            record.checkout_url = Some(url);
        }
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    async fn find_product_link(
        &self,
        crm_product_id: i64,
    ) -> Result<Option<ProductLink>, sqlx::Error> {
        let links = self.product_links.lock().unwrap();
        Ok(links
            .iter()
            .find(|l| l.crm_product_id == crm_product_id)
            .cloned())
    }

    async fn upsert_product_link(&self, link: ProductLink) -> Result<(), sqlx::Error> {
        let mut links = self.product_links.lock().unwrap();
        if let Some(existing) = links
            .iter_mut()
            .find(|l| l.crm_product_id == link.crm_product_id)
        {
            existing.provider_product_id = link.provider_product_id;
        } else {
            links.push(link);
        }
        Ok(())
    }
}
