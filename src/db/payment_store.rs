use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::payment_record::{
    PaymentRecord, PaymentSchedule, PaymentSlot, PaymentStatus,
};
use crate::models::product_link::ProductLink;

#[derive(Debug, Clone, Default)]
pub struct PaymentRecordFilter {
    pub deal_id: Option<i64>,
    pub slot: Option<PaymentSlot>,
    pub status: Option<PaymentStatus>,
}

impl PaymentRecordFilter {
    pub fn for_deal(deal_id: i64) -> Self {
        Self {
            deal_id: Some(deal_id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub deal_id: i64,
    pub session_id: String,
    pub slot: PaymentSlot,
    pub schedule: PaymentSchedule,
    pub amount: Decimal,
    pub currency: String,
    pub checkout_url: Option<String>,
    pub trigger: String,
    pub run_id: String,
    pub second_payment_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentRecordUpdate {
    pub status: Option<PaymentStatus>,
    pub checkout_url: Option<String>,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn list_payment_records(
        &self,
        filter: PaymentRecordFilter,
    ) -> Result<Vec<PaymentRecord>, sqlx::Error>;

    async fn create_payment_record(
        &self,
        record: NewPaymentRecord,
    ) -> Result<PaymentRecord, sqlx::Error>;

    async fn update_payment_record(
        &self,
        id: Uuid,
        update: PaymentRecordUpdate,
    ) -> Result<PaymentRecord, sqlx::Error>;

    async fn find_product_link(
        &self,
        crm_product_id: i64,
    ) -> Result<Option<ProductLink>, sqlx::Error>;

    async fn upsert_product_link(&self, link: ProductLink) -> Result<(), sqlx::Error>;
}
