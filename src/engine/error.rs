use crate::services::crm::CrmError;
use crate::services::payments::PaymentProviderError;

/// Terminal failures of a single orchestration attempt. Each carries enough
/// context (deal, slot, trigger) to be actionable without re-deriving state.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("could not determine a positive amount for deal {deal_id}")]
    AmountUndetermined { deal_id: i64 },

    #[error("deal {deal_id} has no line items to attach a payment to")]
    NoLineItems { deal_id: i64 },

    #[error("no customer email on deal {deal_id} (person or organization)")]
    NoCustomerEmail { deal_id: i64 },

    #[error("failed to fetch deal {deal_id}: {source}")]
    DealFetchFailed {
        deal_id: i64,
        #[source]
        source: CrmError,
    },

    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("crm error: {0}")]
    Crm(#[from] CrmError),

    #[error("payment provider error: {0}")]
    Provider(PaymentProviderError),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<PaymentProviderError> for OrchestrationError {
    fn from(err: PaymentProviderError) -> Self {
        match err {
            PaymentProviderError::Unavailable(msg) => OrchestrationError::ProviderUnavailable(msg),
            other => OrchestrationError::Provider(other),
        }
    }
}
