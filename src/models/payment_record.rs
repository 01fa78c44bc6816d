use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// The semantic role a payment fills on a deal. `Deposit` and `Rest` together
/// cover a two-part schedule; `Single` covers a one-part schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_slot", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentSlot {
    Deposit,
    Rest,
    Single,
}

impl PaymentSlot {
    /// Descriptor embedded in provider session metadata, e.g. "1 of 2".
    pub fn payment_part(&self) -> &'static str {
        match self {
            PaymentSlot::Deposit => "1 of 2",
            PaymentSlot::Rest => "2 of 2",
            PaymentSlot::Single => "1 of 1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSlot::Deposit => "deposit",
            PaymentSlot::Rest => "rest",
            PaymentSlot::Single => "single",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_schedule", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentSchedule {
    /// Two payments of half each ("50/50").
    Split,
    /// One payment of the full amount ("100%").
    Full,
}

impl PaymentSchedule {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentSchedule::Split => "50/50",
            PaymentSchedule::Full => "100%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

/// A persisted payment-collection session. Never hard-deleted; refunds only
/// flip the status to `Refunded`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub deal_id: i64,
    pub session_id: String,
    pub slot: PaymentSlot,
    pub schedule: PaymentSchedule,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub checkout_url: Option<String>,
    pub trigger: String,
    pub run_id: String,
    pub second_payment_date: Option<NaiveDate>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
