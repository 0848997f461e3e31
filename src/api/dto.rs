//! API Data Transfer Objects
//!
//! Request and response types for the hub's HTTP surface. Wire field names
//! follow the envelope convention (camelCase where clients expect it).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// POST /api/v1/fallback request body
#[derive(Debug, Deserialize)]
pub struct FallbackRequest {
    /// The message to echo; required.
    pub message: Option<Value>,
    /// Optional caller identity carried back in the response.
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// POST /api/v1/broadcast response body
#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    /// Number of server-push streams the message reached.
    pub recipients: usize,
}

/// GET /health response body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub connections: TierCounts,
}

/// GET /api/v1/stats response body
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub connections: TierCounts,
}

/// Live connection counts per transport tier.
#[derive(Debug, Serialize)]
pub struct TierCounts {
    /// Per-endpoint counts for the persistent-socket tier.
    pub websocket: HashMap<String, usize>,
    pub overlay: usize,
    pub sse: usize,
}

impl TierCounts {
    pub fn total(&self) -> usize {
        self.websocket.values().sum::<usize>() + self.overlay + self.sse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fallback_request_accepts_camel_case() {
        let body = json!({"message": {"a": 1}, "clientId": "c1"});
        let request: FallbackRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.client_id.as_deref(), Some("c1"));
        assert_eq!(request.message.unwrap()["a"], 1);
    }

    #[test]
    fn test_fallback_request_fields_optional() {
        let request: FallbackRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.message.is_none());
        assert!(request.client_id.is_none());
    }

    #[test]
    fn test_tier_counts_total() {
        let counts = TierCounts {
            websocket: HashMap::from([("/ws".to_string(), 3), ("/ws/agents".to_string(), 2)]),
            overlay: 1,
            sse: 4,
        };
        assert_eq!(counts.total(), 10);
    }
}
