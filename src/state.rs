use std::sync::Arc;

use crate::config::Config;
use crate::db::payment_store::PaymentStore;
use crate::engine::orchestrator::PaymentOrchestrator;
use crate::services::crm::CrmService;
use crate::services::messaging::Messenger;
use crate::services::payments::PaymentProvider;
use crate::utils::deal_lock::DealLocks;
use crate::utils::fingerprint::FingerprintCache;

/// Shared handle threaded through every route. All collaborators sit behind
/// trait objects so tests swap in capturing doubles.
#[derive(Clone)]
pub struct AppState {
    pub crm: Arc<dyn CrmService>,
    pub payments: Arc<dyn PaymentProvider>,
    pub store: Arc<dyn PaymentStore>,
    pub messenger: Arc<dyn Messenger>,
    pub fingerprints: Arc<FingerprintCache>,
    pub deal_locks: Arc<DealLocks>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        crm: Arc<dyn CrmService>,
        payments: Arc<dyn PaymentProvider>,
        store: Arc<dyn PaymentStore>,
        messenger: Arc<dyn Messenger>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            crm,
            payments,
            store,
            messenger,
            fingerprints: Arc::new(FingerprintCache::default()),
            deal_locks: Arc::new(DealLocks::default()),
            config,
        }
    }

    pub fn orchestrator(&self) -> PaymentOrchestrator {
        PaymentOrchestrator::new(
            Arc::clone(&self.crm),
            Arc::clone(&self.payments),
            Arc::clone(&self.store),
            Arc::clone(&self.messenger),
            Arc::clone(&self.config),
        )
    }
}
