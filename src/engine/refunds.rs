use std::sync::Arc;

use tracing::{info, warn};

use crate::db::payment_store::{PaymentRecordFilter, PaymentRecordUpdate, PaymentStore};
use crate::engine::error::OrchestrationError;
use crate::models::payment_record::{PaymentRecord, PaymentStatus};
use crate::services::crm::CrmService;
use crate::services::payments::{PaymentProvider, SessionStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefundSummary {
    pub refunded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelSummary {
    pub expired: usize,
    pub failed: usize,
}

/// Tear-down paths: refunds for lost-with-refund deals, session expiry for
/// deleted deals. Both are per-record best effort; one bad record must not
/// strand the others.
pub struct RefundProcessor {
    crm: Arc<dyn CrmService>,
    provider: Arc<dyn PaymentProvider>,
    store: Arc<dyn PaymentStore>,
}

impl RefundProcessor {
    pub fn new(
        crm: Arc<dyn CrmService>,
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn PaymentStore>,
    ) -> Self {
        Self {
            crm,
            provider,
            store,
        }
    }

    /// Refunds every paid record on the deal through its session's payment
    /// intent and marks it refunded locally. Leaves a CRM note with the
    /// tally.
    pub async fn refund_deal(
        &self,
        deal_id: i64,
        reason: &str,
    ) -> Result<RefundSummary, OrchestrationError> {
        let records = self
            .store
            .list_payment_records(PaymentRecordFilter {
                deal_id: Some(deal_id),
                status: Some(PaymentStatus::Paid),
                ..Default::default()
            })
            .await?;

        let mut summary = RefundSummary::default();
        for record in &records {
            match self.refund_record(record).await {
                Ok(()) => summary.refunded += 1,
                Err(err) => {
                    warn!(
                        ?err,
                        deal_id,
                        session_id = %record.session_id,
                        "refund failed for record; continuing with the rest"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(deal_id, refunded = summary.refunded, failed = summary.failed, reason, "refund run finished");

        let note = format!(
            "Automatic refund ({}): {} payment(s) refunded, {} failed.",
            reason, summary.refunded, summary.failed
        );
        if let Err(err) = self.crm.create_note(deal_id, &note).await {
            warn!(?err, deal_id, "failed to leave refund note on deal");
        }

        Ok(summary)
    }

    async fn refund_record(&self, record: &PaymentRecord) -> Result<(), OrchestrationError> {
        let session = self.provider.retrieve_session(&record.session_id).await?;
        let payment_intent = session.payment_intent.ok_or_else(|| {
            OrchestrationError::ProviderUnavailable(format!(
                "session {} has no payment intent to refund",
                record.session_id
            ))
        })?;

        self.provider.create_refund(&payment_intent).await?;

        self.store
            .update_payment_record(
                record.id,
                PaymentRecordUpdate {
                    status: Some(PaymentStatus::Refunded),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Expires any still-open session on the deal so stale checkout links
    /// stop being payable. Unpaid records stay unpaid; expiry is visible on
    /// the provider side.
    pub async fn cancel_open_sessions(
        &self,
        deal_id: i64,
    ) -> Result<CancelSummary, OrchestrationError> {
        let records = self
            .store
            .list_payment_records(PaymentRecordFilter {
                deal_id: Some(deal_id),
                status: Some(PaymentStatus::Unpaid),
                ..Default::default()
            })
            .await?;

        let mut summary = CancelSummary::default();
        for record in &records {
            match self.expire_if_open(record).await {
                Ok(true) => summary.expired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        ?err,
                        deal_id,
                        session_id = %record.session_id,
                        "failed to expire session; continuing with the rest"
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary.expired > 0 {
            let note = format!(
                "Deal removed from payment flow: {} open checkout link(s) expired.",
                summary.expired
            );
            if let Err(err) = self.crm.create_note(deal_id, &note).await {
                warn!(?err, deal_id, "failed to leave expiry note on deal");
            }
        }

        Ok(summary)
    }

    async fn expire_if_open(&self, record: &PaymentRecord) -> Result<bool, OrchestrationError> {
        let session = self.provider.retrieve_session(&record.session_id).await?;
        if session.status != SessionStatus::Open {
            return Ok(false);
        }
        self.provider.expire_session(&record.session_id).await?;
        Ok(true)
    }
}
