use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use crate::db::payment_store::{PaymentRecordFilter, PaymentStore};
use crate::engine::error::OrchestrationError;
use crate::engine::schedule::ScheduleDecision;
use crate::models::payment_record::{PaymentRecord, PaymentSchedule, PaymentSlot, PaymentStatus};
use crate::services::payments::{PaymentProvider, PaymentProviderError, SessionStatus};

/// Classification of a single payment slot after reconciling the local
/// record with the live provider session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotState {
    pub exists: bool,
    pub paid: bool,
    pub active: bool,
    pub expired: bool,
    pub canceled: bool,
}

impl SlotState {
    fn terminal_unpaid(&self) -> bool {
        !self.paid && (self.expired || self.canceled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentState {
    pub deposit: SlotState,
    pub rest: SlotState,
    pub single: SlotState,
    pub needs_deposit: bool,
    pub needs_rest: bool,
    pub needs_single: bool,
}

impl PaymentState {
    pub fn nothing_needed(&self) -> bool {
        !self.needs_deposit && !self.needs_rest && !self.needs_single
    }
}

/// Single source of truth consulted before any session is created. Local
/// records and provider-side session lifecycles diverge (expiry, manual
/// cancellation), so both are consulted and merged per slot.
pub struct PaymentAnalyzer {
    store: Arc<dyn PaymentStore>,
    provider: Arc<dyn PaymentProvider>,
}

impl PaymentAnalyzer {
    pub fn new(store: Arc<dyn PaymentStore>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self { store, provider }
    }

    pub async fn analyze(
        &self,
        deal_id: i64,
        decision: &ScheduleDecision,
        today: NaiveDate,
    ) -> Result<PaymentState, OrchestrationError> {
        let records = self
            .store
            .list_payment_records(PaymentRecordFilter::for_deal(deal_id))
            .await?;

        let deposit = self
            .classify_slot(deal_id, latest_for_slot(&records, PaymentSlot::Deposit))
            .await;
        let rest = self
            .classify_slot(deal_id, latest_for_slot(&records, PaymentSlot::Rest))
            .await;
        let single = self
            .classify_slot(deal_id, latest_for_slot(&records, PaymentSlot::Single))
            .await;

        let mut state = PaymentState {
            deposit,
            rest,
            single,
            ..Default::default()
        };

        match decision.schedule {
            PaymentSchedule::Full => {
                let missing_or_dead = !single.exists || single.terminal_unpaid();
                // A deposit without a rest means the plan changed from
                // two-part to one-part mid-flight; the single still covers
                // what is owed.
                let orphaned_deposit = deposit.exists && !rest.exists;
                state.needs_single = !single.paid && (missing_or_dead || orphaned_deposit);
            }
            PaymentSchedule::Split => {
                state.needs_deposit = !deposit.exists || deposit.terminal_unpaid();
                state.needs_rest = deposit.paid
                    && (!rest.exists || rest.terminal_unpaid())
                    && decision.second_payment_due(today);
            }
        }

        Ok(state)
    }

    async fn classify_slot(&self, deal_id: i64, record: Option<&PaymentRecord>) -> SlotState {
        let Some(record) = record else {
            return SlotState::default();
        };

        let mut state = SlotState {
            exists: true,
            ..Default::default()
        };

        match record.status {
            PaymentStatus::Paid => {
                state.paid = true;
                return state;
            }
            PaymentStatus::Refunded => {
                state.canceled = true;
                return state;
            }
            PaymentStatus::Unpaid => {}
        }

        match self.provider.retrieve_session(&record.session_id).await {
            Ok(session) if session.paid => state.paid = true,
            Ok(session) => match session.status {
                SessionStatus::Expired => state.expired = true,
                SessionStatus::Open | SessionStatus::Complete => state.active = true,
            },
            Err(PaymentProviderError::NotFound(_)) => state.canceled = true,
            Err(err) => {
                // Degraded read: prefer not creating a duplicate session
                warn!(
                    ?err,
                    deal_id,
                    session_id = %record.session_id,
                    "provider read failed during analysis; treating slot as active"
                );
                state.active = true;
            }
        }

        state
    }
}

fn latest_for_slot(records: &[PaymentRecord], slot: PaymentSlot) -> Option<&PaymentRecord> {
    records
        .iter()
        .filter(|r| r.slot == slot)
        .max_by_key(|r| r.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_payment_store::MockPaymentStore;
    use crate::engine::schedule::determine_schedule;
    use crate::services::payments::{MockPaymentProvider, SessionState};
    use rust_decimal_macros::dec;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn record(deal_id: i64, slot: PaymentSlot, status: PaymentStatus) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            deal_id,
            session_id: format!("cs_{}_{}", deal_id, slot.as_str()),
            slot,
            schedule: PaymentSchedule::Split,
            amount: dec!(1000),
            currency: "PLN".into(),
            status,
            checkout_url: Some("https://pay.example.test/c/1".into()),
            trigger: "webhook".into(),
            run_id: "run-1".into(),
            second_payment_date: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn analyzer(
        store: &MockPaymentStore,
        provider: &MockPaymentProvider,
    ) -> PaymentAnalyzer {
        PaymentAnalyzer::new(Arc::new(store.clone()), Arc::new(provider.clone()))
    }

    #[tokio::test]
    async fn empty_deal_under_split_needs_only_deposit() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        let decision = determine_schedule(Some(date(2026, 10, 1)), date(2026, 8, 1));

        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 8, 1))
            .await
            .unwrap();

        assert!(state.needs_deposit);
        assert!(!state.needs_rest);
        assert!(!state.needs_single);
    }

    #[tokio::test]
    async fn paid_deposit_with_due_second_date_needs_rest() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        store.seed_record(record(1, PaymentSlot::Deposit, PaymentStatus::Paid));

        let decision = determine_schedule(Some(date(2026, 10, 1)), date(2026, 8, 1));
        // second payment date is 2026-09-01; analyze after it
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 9, 2))
            .await
            .unwrap();

        assert!(!state.needs_deposit);
        assert!(state.needs_rest);
        assert!(!state.needs_single);
    }

    #[tokio::test]
    async fn paid_deposit_before_second_date_needs_nothing() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        store.seed_record(record(1, PaymentSlot::Deposit, PaymentStatus::Paid));

        let decision = determine_schedule(Some(date(2026, 10, 1)), date(2026, 8, 1));
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 8, 15))
            .await
            .unwrap();

        assert!(state.nothing_needed());
    }

    #[tokio::test]
    async fn paid_single_needs_nothing() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        let mut rec = record(1, PaymentSlot::Single, PaymentStatus::Paid);
        rec.schedule = PaymentSchedule::Full;
        store.seed_record(rec);

        let decision = ScheduleDecision::full();
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 8, 1))
            .await
            .unwrap();

        assert!(state.nothing_needed());
        assert!(state.single.paid);
    }

    #[tokio::test]
    async fn expired_unpaid_deposit_is_needed_again() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        let rec = record(1, PaymentSlot::Deposit, PaymentStatus::Unpaid);
        provider.script_session_state(SessionState {
            id: rec.session_id.clone(),
            status: SessionStatus::Expired,
            paid: false,
            payment_intent: None,
        });
        store.seed_record(rec);

        let decision = determine_schedule(Some(date(2026, 10, 1)), date(2026, 8, 1));
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 8, 1))
            .await
            .unwrap();

        assert!(state.deposit.expired);
        assert!(state.needs_deposit);
    }

    #[tokio::test]
    async fn open_unpaid_deposit_is_not_recreated() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        let rec = record(1, PaymentSlot::Deposit, PaymentStatus::Unpaid);
        provider.script_session_state(SessionState {
            id: rec.session_id.clone(),
            status: SessionStatus::Open,
            paid: false,
            payment_intent: None,
        });
        store.seed_record(rec);

        let decision = determine_schedule(Some(date(2026, 10, 1)), date(2026, 8, 1));
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 8, 1))
            .await
            .unwrap();

        assert!(state.deposit.active);
        assert!(!state.needs_deposit);
    }

    #[tokio::test]
    async fn provider_outage_degrades_to_no_new_session() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        store.seed_record(record(1, PaymentSlot::Deposit, PaymentStatus::Unpaid));
        provider.set_fail_retrieve(true);

        let decision = determine_schedule(Some(date(2026, 10, 1)), date(2026, 8, 1));
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 8, 1))
            .await
            .unwrap();

        assert!(state.deposit.active);
        assert!(!state.needs_deposit);
    }

    #[tokio::test]
    async fn session_paid_provider_side_counts_as_paid() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        let rec = record(1, PaymentSlot::Deposit, PaymentStatus::Unpaid);
        provider.script_session_state(SessionState {
            id: rec.session_id.clone(),
            status: SessionStatus::Complete,
            paid: true,
            payment_intent: Some("pi_1".into()),
        });
        store.seed_record(rec);

        let decision = determine_schedule(Some(date(2026, 10, 1)), date(2026, 8, 1));
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 9, 2))
            .await
            .unwrap();

        assert!(state.deposit.paid);
        assert!(!state.needs_deposit);
        // provider-confirmed deposit unlocks the rest once due
        assert!(state.needs_rest);
    }

    #[tokio::test]
    async fn orphaned_deposit_under_full_schedule_needs_single() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        store.seed_record(record(1, PaymentSlot::Deposit, PaymentStatus::Paid));

        let decision = ScheduleDecision::full();
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 8, 1))
            .await
            .unwrap();

        assert!(state.needs_single);
        assert!(!state.needs_deposit);
        assert!(!state.needs_rest);
    }

    #[tokio::test]
    async fn refunded_single_is_treated_as_canceled() {
        let store = MockPaymentStore::new();
        let provider = MockPaymentProvider::new();
        let mut rec = record(1, PaymentSlot::Single, PaymentStatus::Refunded);
        rec.schedule = PaymentSchedule::Full;
        store.seed_record(rec);

        let decision = ScheduleDecision::full();
        let state = analyzer(&store, &provider)
            .analyze(1, &decision, date(2026, 8, 1))
            .await
            .unwrap();

        assert!(state.single.canceled);
        assert!(state.needs_single);
    }
}
