use serde::{Deserialize, Serialize};

/// Storefront order as seen by the webhook pipeline.
///
/// The pipeline only flips the paid flag when a completed payment arrives;
/// order creation and the rest of the checkout flow live elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOrder {
    pub id: String,
    pub payment_id: Option<String>,
    pub paid: bool,
    pub paid_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}
