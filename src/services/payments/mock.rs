#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    CatalogEntry, CreateCatalogEntry, CreateSessionRequest, PaymentProvider,
    PaymentProviderError, ProviderSession, RefundOutcome, SessionState, SessionStatus,
};

/// Capturing provider double. Session states can be scripted per id to drive
/// the analyzer; `fail_retrieve` simulates a provider outage on reads.
#[derive(Clone, Default)]
pub struct MockPaymentProvider {
    pub created_sessions: Arc<Mutex<Vec<ProviderSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateSessionRequest>>>,
    pub session_states: Arc<Mutex<HashMap<String, SessionState>>>,
    pub catalog: Arc<Mutex<Vec<CatalogEntry>>>,
    pub created_catalog_entries: Arc<Mutex<Vec<CreateCatalogEntry>>>,
    pub refunds: Arc<Mutex<Vec<String>>>,
    pub expired_sessions: Arc<Mutex<Vec<String>>>,
    pub fail_retrieve: Arc<Mutex<bool>>,
    counter: Arc<AtomicU64>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}_{}", prefix, n)
    }

    pub fn script_session_state(&self, state: SessionState) {
        self.session_states
            .lock()
            .unwrap()
            .insert(state.id.clone(), state);
    }

    pub fn seed_catalog_entry(&self, entry: CatalogEntry) {
        self.catalog.lock().unwrap().push(entry);
    }

    pub fn set_fail_retrieve(&self, fail: bool) {
        *self.fail_retrieve.lock().unwrap() = fail;
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(
        &self,
        req: CreateSessionRequest,
    ) -> Result<ProviderSession, PaymentProviderError> {
        self.last_create_requests.lock().unwrap().push(req.clone());

        let session = ProviderSession {
            id: self.make_id("cs_test"),
            url: Some(format!("https://pay.example.test/c/{}", req.line_item.product_id)),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        // Newly created sessions are open and unpaid until scripted otherwise
        self.session_states.lock().unwrap().insert(
            session.id.clone(),
            SessionState {
                id: session.id.clone(),
                status: SessionStatus::Open,
                paid: false,
                payment_intent: Some(self.make_id("pi_test")),
            },
        );
        Ok(session)
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<SessionState, PaymentProviderError> {
        if *self.fail_retrieve.lock().unwrap() {
            return Err(PaymentProviderError::Unavailable(
                "simulated provider outage".into(),
            ));
        }
        self.session_states
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| PaymentProviderError::NotFound(format!("session {}", session_id)))
    }

    async fn list_catalog_entries(
        &self,
        crm_product_id: i64,
    ) -> Result<Vec<CatalogEntry>, PaymentProviderError> {
        Ok(self
            .catalog
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.crm_product_id == Some(crm_product_id))
            .cloned()
            .collect())
    }

    async fn create_catalog_entry(
        &self,
        req: CreateCatalogEntry,
    ) -> Result<CatalogEntry, PaymentProviderError> {
        self.created_catalog_entries.lock().unwrap().push(req.clone());
        let entry = CatalogEntry {
            id: self.make_id("prod_test"),
            name: req.name,
            crm_product_id: Some(req.crm_product_id),
        };
        self.catalog.lock().unwrap().push(entry.clone());
        Ok(entry)
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), PaymentProviderError> {
        self.expired_sessions
            .lock()
            .unwrap()
            .push(session_id.to_string());
        if let Some(state) = self.session_states.lock().unwrap().get_mut(session_id) {
            state.status = SessionStatus::Expired;
        }
        Ok(())
    }

    async fn create_refund(
        &self,
        payment_intent_id: &str,
    ) -> Result<RefundOutcome, PaymentProviderError> {
        self.refunds.lock().unwrap().push(payment_intent_id.to_string());
        Ok(RefundOutcome {
            id: self.make_id("re_test"),
            status: "succeeded".into(),
        })
    }
}
