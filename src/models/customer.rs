use serde::{Deserialize, Serialize};

/// Local mirror of a provider customer record.
///
/// Deletion is a soft flag: the provider reports the deletion, we keep the
/// row so later out-of-order updates for the same customer don't resurrect
/// it with stale data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub deleted: bool,
    pub state_updated_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Customer object as carried in the webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerObject {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub updated_at: i64,
}
