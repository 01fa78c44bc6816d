use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Mapping from a CRM product to the catalog entry created for it on the
/// payment provider, so repeated runs reuse one entry per product.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProductLink {
    pub crm_product_id: i64,
    pub provider_product_id: String,
}
