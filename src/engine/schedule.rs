use chrono::{Duration, Months, NaiveDate};

use crate::models::payment_record::PaymentSchedule;

/// Deals closing at least this many days out are split into two payments.
pub const SPLIT_THRESHOLD_DAYS: i64 = 30;

/// Derived payment plan for a deal. Ephemeral: recomputed on demand, never
/// persisted on its own (the second date is echoed into record metadata).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDecision {
    pub schedule: PaymentSchedule,
    pub second_payment_date: Option<NaiveDate>,
    pub days_until_close: Option<i64>,
}

impl ScheduleDecision {
    pub fn full() -> Self {
        Self {
            schedule: PaymentSchedule::Full,
            second_payment_date: None,
            days_until_close: None,
        }
    }

    /// Whether the second payment is due, compared at day granularity.
    pub fn second_payment_due(&self, today: NaiveDate) -> bool {
        self.second_payment_date
            .map(|date| date <= today)
            .unwrap_or(false)
    }
}

/// Pure schedule rule. A missing target date fails open to the one-part
/// plan; a far-enough target splits 50/50 with the second payment due one
/// calendar month before the target.
pub fn determine_schedule(target_date: Option<NaiveDate>, reference: NaiveDate) -> ScheduleDecision {
    let Some(target) = target_date else {
        return ScheduleDecision::full();
    };

    let days_until_close = (target - reference).num_days();

    if days_until_close >= SPLIT_THRESHOLD_DAYS {
        let second_payment_date = target
            .checked_sub_months(Months::new(1))
            .unwrap_or(target - Duration::days(SPLIT_THRESHOLD_DAYS));
        ScheduleDecision {
            schedule: PaymentSchedule::Split,
            second_payment_date: Some(second_payment_date),
            days_until_close: Some(days_until_close),
        }
    } else {
        ScheduleDecision {
            schedule: PaymentSchedule::Full,
            second_payment_date: None,
            days_until_close: Some(days_until_close),
        }
    }
}

/// Lenient yyyy-mm-dd parsing for CRM date strings; anything unparsable is
/// treated as absent.
pub fn parse_close_date(raw: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw?.trim(), "%Y-%m-%d").ok()
}
