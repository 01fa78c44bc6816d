use serde::{Deserialize, Serialize};

/// Canonical shape every inbound webhook payload is normalized into at the
/// ingress boundary. Downstream code never re-parses raw payload fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSnapshot {
    pub deal_id: i64,
    pub event: String,
    pub status: Option<String>,
    pub stage_id: Option<i64>,
    pub invoice_type: Option<String>,
    pub lost_reason: Option<String>,
}

impl DealSnapshot {
    /// Deduplication key for repeated webhook deliveries carrying the same
    /// deal state.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.deal_id,
            self.event,
            self.stage_id.map(|s| s.to_string()).unwrap_or_default(),
            self.status.as_deref().unwrap_or(""),
            self.invoice_type.as_deref().unwrap_or(""),
        )
    }
}
