use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::payment_store::{PaymentRecordFilter, PaymentStore};
use crate::engine::amount::compute_deal_amount;
use crate::engine::analyzer::PaymentAnalyzer;
use crate::engine::error::OrchestrationError;
use crate::engine::refunds::{CancelSummary, RefundProcessor, RefundSummary};
use crate::engine::schedule::{determine_schedule, parse_close_date, ScheduleDecision};
use crate::engine::session::{SessionCreator, SessionOptions};
use crate::models::payment_record::{PaymentRecord, PaymentSlot, PaymentStatus};
use crate::services::crm::CrmService;
use crate::services::messaging::{Messenger, NotificationSession, PaymentNotification};
use crate::services::payments::{PaymentProvider, PaymentProviderError};

/// What one orchestration run did, for the caller's response and logs.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub decision: ScheduleDecision,
    pub created: Vec<PaymentRecord>,
    pub notified: bool,
}

/// Ties schedule, analysis, session creation and tear-down together. One
/// instance per process; the per-deal lock around it lives at the route
/// layer.
pub struct PaymentOrchestrator {
    crm: Arc<dyn CrmService>,
    provider: Arc<dyn PaymentProvider>,
    store: Arc<dyn PaymentStore>,
    messenger: Arc<dyn Messenger>,
    analyzer: PaymentAnalyzer,
    creator: SessionCreator,
    refunds: RefundProcessor,
}

impl PaymentOrchestrator {
    pub fn new(
        crm: Arc<dyn CrmService>,
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn PaymentStore>,
        messenger: Arc<dyn Messenger>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            crm: Arc::clone(&crm),
            provider: Arc::clone(&provider),
            store: Arc::clone(&store),
            messenger,
            analyzer: PaymentAnalyzer::new(Arc::clone(&store), Arc::clone(&provider)),
            creator: SessionCreator::new(
                Arc::clone(&crm),
                Arc::clone(&provider),
                Arc::clone(&store),
                config,
            ),
            refunds: RefundProcessor::new(crm, provider, store),
        }
    }

    pub async fn run_payment(
        &self,
        deal_id: i64,
        trigger: &str,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        self.run_payment_at(deal_id, trigger, Utc::now().date_naive())
            .await
    }

    /// Re-runnable without double-charging: every decision is re-derived
    /// from the CRM deal, the local records and the live session states.
    pub async fn run_payment_at(
        &self,
        deal_id: i64,
        trigger: &str,
        today: NaiveDate,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        let deal = self
            .crm
            .get_deal(deal_id)
            .await
            .map_err(|source| OrchestrationError::DealFetchFailed { deal_id, source })?;

        let decision = determine_schedule(
            parse_close_date(deal.expected_close_date.as_deref()),
            today,
        );
        let state = self.analyzer.analyze(deal_id, &decision, today).await?;

        let run_id = Uuid::new_v4().to_string();
        info!(
            deal_id,
            run_id = %run_id,
            trigger,
            schedule = decision.schedule.label(),
            needs_deposit = state.needs_deposit,
            needs_rest = state.needs_rest,
            needs_single = state.needs_single,
            "orchestration run"
        );

        let mut created = Vec::new();

        if state.needs_deposit {
            created.push(
                self.creator
                    .create_session(
                        deal_id,
                        SessionOptions {
                            slot: PaymentSlot::Deposit,
                            decision: Some(decision.clone()),
                            custom_amount: None,
                            trigger: trigger.to_string(),
                            run_id: run_id.clone(),
                        },
                    )
                    .await?,
            );
        }

        if state.needs_rest {
            match self.outstanding_amount(deal_id).await? {
                Some(remainder) => created.push(
                    self.creator
                        .create_session(
                            deal_id,
                            SessionOptions {
                                slot: PaymentSlot::Rest,
                                decision: Some(decision.clone()),
                                custom_amount: Some(remainder),
                                trigger: trigger.to_string(),
                                run_id: run_id.clone(),
                            },
                        )
                        .await?,
                ),
                None => info!(deal_id, "nothing outstanding; skipping rest payment"),
            }
        }

        if state.needs_single {
            // A schedule can flip from two-part to one-part when the close
            // date moves inside the split window; money already collected
            // under the old plan still counts.
            let prior_paid = state.deposit.paid || state.rest.paid;
            let custom = if prior_paid {
                self.outstanding_amount(deal_id).await?
            } else {
                None
            };
            if prior_paid && custom.is_none() {
                info!(deal_id, "nothing outstanding; skipping single payment");
            } else {
                created.push(
                    self.creator
                        .create_session(
                            deal_id,
                            SessionOptions {
                                slot: PaymentSlot::Single,
                                decision: Some(decision.clone()),
                                custom_amount: custom,
                                trigger: trigger.to_string(),
                                run_id,
                            },
                        )
                        .await?,
                );
            }
        }

        let notified = self.notify(deal_id, &decision, &created).await;

        Ok(OrchestrationOutcome {
            decision,
            created,
            notified,
        })
    }

    /// Owed minus already collected; the second payment covers whatever is
    /// left rather than a recomputed half, so cash adjustments made after
    /// the deposit land in the final amount.
    ///
    /// "Collected" is the reconciled view: a session the provider reports
    /// paid counts even while the local record still says unpaid, matching
    /// how the analyzer decides a slot is paid.
    async fn outstanding_amount(
        &self,
        deal_id: i64,
    ) -> Result<Option<Decimal>, OrchestrationError> {
        let deal = self
            .crm
            .get_deal(deal_id)
            .await
            .map_err(|source| OrchestrationError::DealFetchFailed { deal_id, source })?;
        let line_items = self.crm.get_deal_line_items(deal_id).await?;
        let owed = compute_deal_amount(&deal, &line_items)?;

        let records = self
            .store
            .list_payment_records(PaymentRecordFilter::for_deal(deal_id))
            .await?;

        let mut collected = Decimal::ZERO;
        for record in &records {
            match record.status {
                PaymentStatus::Paid => collected += record.amount,
                PaymentStatus::Refunded => {}
                PaymentStatus::Unpaid => {
                    match self.provider.retrieve_session(&record.session_id).await {
                        Ok(session) if session.paid => collected += record.amount,
                        Ok(_) | Err(PaymentProviderError::NotFound(_)) => {}
                        // Do not risk overcharging on a degraded read
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }

        let remainder = owed - collected;
        Ok((remainder > Decimal::ZERO).then_some(remainder))
    }

    /// Newly created sessions are announced; when nothing was created but
    /// unpaid links still exist, the existing links are re-announced so a
    /// re-trigger still reaches the customer.
    async fn notify(
        &self,
        deal_id: i64,
        decision: &ScheduleDecision,
        created: &[PaymentRecord],
    ) -> bool {
        let records: Vec<PaymentRecord> = if created.is_empty() {
            match self
                .store
                .list_payment_records(PaymentRecordFilter {
                    deal_id: Some(deal_id),
                    status: Some(PaymentStatus::Unpaid),
                    ..Default::default()
                })
                .await
            {
                Ok(records) => records,
                Err(err) => {
                    warn!(?err, deal_id, "could not load records for notification");
                    return false;
                }
            }
        } else {
            created.to_vec()
        };

        if records.is_empty() {
            return false;
        }

        let notification = PaymentNotification {
            schedule: decision.schedule.label().to_string(),
            currency: records[0].currency.clone(),
            total_amount: records.iter().map(|r| r.amount).sum(),
            sessions: records
                .iter()
                .map(|r| NotificationSession {
                    slot: r.slot.as_str().to_string(),
                    checkout_url: r.checkout_url.clone(),
                    amount: r.amount,
                })
                .collect(),
        };

        match self
            .messenger
            .send_payment_notification(deal_id, notification)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(?err, deal_id, "payment notification failed");
                false
            }
        }
    }

    pub async fn run_refund(
        &self,
        deal_id: i64,
        reason: &str,
    ) -> Result<RefundSummary, OrchestrationError> {
        self.refunds.refund_deal(deal_id, reason).await
    }

    pub async fn run_deletion(&self, deal_id: i64) -> Result<CancelSummary, OrchestrationError> {
        self.refunds.cancel_open_sessions(deal_id).await
    }
}
