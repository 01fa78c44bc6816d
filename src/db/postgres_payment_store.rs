use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::payment_store::{
    NewPaymentRecord, PaymentRecordFilter, PaymentRecordUpdate, PaymentStore,
};
use crate::models::payment_record::PaymentRecord;
use crate::models::product_link::ProductLink;

pub struct PostgresPaymentStore {
    pub pool: PgPool,
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn list_payment_records(
        &self,
        filter: PaymentRecordFilter,
    ) -> Result<Vec<PaymentRecord>, sqlx::Error> {
        sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT id, deal_id, session_id, slot, schedule, amount, currency,
                   status, checkout_url, trigger, run_id, second_payment_date,
                   created_at, updated_at
            FROM payment_records
            WHERE ($1::bigint IS NULL OR deal_id = $1)
              AND ($2::payment_slot IS NULL OR slot = $2)
              AND ($3::payment_status IS NULL OR status = $3)
            ORDER BY created_at ASC
            "#,
        )
        .bind(filter.deal_id)
        .bind(filter.slot)
        .bind(filter.status)
        .fetch_all(&self.pool)
        .await
    }

    async fn create_payment_record(
        &self,
        record: NewPaymentRecord,
    ) -> Result<PaymentRecord, sqlx::Error> {
        sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payment_records
                (id, deal_id, session_id, slot, schedule, amount, currency,
                 status, checkout_url, trigger, run_id, second_payment_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'unpaid', $8, $9, $10, $11)
            RETURNING id, deal_id, session_id, slot, schedule, amount, currency,
                      status, checkout_url, trigger, run_id, second_payment_date,
                      created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.deal_id)
        .bind(&record.session_id)
        .bind(record.slot)
        .bind(record.schedule)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.checkout_url)
        .bind(&record.trigger)
        .bind(&record.run_id)
        .bind(record.second_payment_date)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_payment_record(
        &self,
        id: Uuid,
        update: PaymentRecordUpdate,
    ) -> Result<PaymentRecord, sqlx::Error> {
        sqlx::query_as::<_, PaymentRecord>(
            r#"
            UPDATE payment_records
            SET status = COALESCE($2, status),
                checkout_url = COALESCE($3, checkout_url),
                updated_at = now()
            WHERE id = $1
            RETURNING id, deal_id, session_id, slot, schedule, amount, currency,
                      status, checkout_url, trigger, run_id, second_payment_date,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(update.checkout_url)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_product_link(
        &self,
        crm_product_id: i64,
    ) -> Result<Option<ProductLink>, sqlx::Error> {
        sqlx::query_as::<_, ProductLink>(
            "SELECT crm_product_id, provider_product_id FROM product_links WHERE crm_product_id = $1",
        )
        .bind(crm_product_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn upsert_product_link(&self, link: ProductLink) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO product_links (crm_product_id, provider_product_id)
            VALUES ($1, $2)
            ON CONFLICT (crm_product_id)
            DO UPDATE SET provider_product_id = EXCLUDED.provider_product_id
            "#,
        )
        .bind(link.crm_product_id)
        .bind(&link.provider_product_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
