//! BridgeQuery: the shadow record tracking a single in-flight AI call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BridgeStatus, Urgency};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeQuery {
    pub id: Uuid,
    /// The patient query this AI call belongs to (1:1).
    pub query_id: Uuid,
    pub status: BridgeStatus,
    pub safety_score: Option<u8>,
    pub urgency: Option<Urgency>,
    pub response: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeQuery {
    pub fn new(query_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            query_id,
            status: BridgeStatus::Pending,
            safety_score: None,
            urgency: None,
            response: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bridge_query_is_pending() {
        let b = BridgeQuery::new(Uuid::new_v4());
        assert_eq!(b.status, BridgeStatus::Pending);
        assert!(b.response.is_none());
        assert!(b.error_message.is_none());
    }
}
