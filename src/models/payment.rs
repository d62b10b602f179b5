use serde::{Deserialize, Serialize};

/// Local mirror of a provider payment, keyed by the provider's payment id.
///
/// Rows reflect the provider's reported state, not the inverse: handlers
/// upsert last-writer-wins by `state_updated_at` so out-of-order delivery
/// cannot roll a newer state back to an older one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: Option<String>,
    pub customer_id: Option<String>,
    /// Provider status string, e.g. "pending", "completed", "failed".
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    /// Provider-side state timestamp used for last-writer-wins.
    pub state_updated_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Payment object as carried in the webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentObject {
    pub id: String,
    pub order_id: Option<String>,
    pub customer_id: Option<String>,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub updated_at: i64,
}

/// Local mirror of a provider refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub payment_id: String,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub state_updated_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Refund object as carried in the webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundObject {
    pub id: String,
    pub payment_id: String,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub updated_at: i64,
}
