//! Event type and the event names emitted by the router.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Emitted when a cacheable tool call is answered from the cache.
pub const TOOL_CACHE_HIT: &str = "tool:cache:hit";
pub const TOOL_EXECUTION_SUCCESS: &str = "tool:execution:success";
pub const TOOL_EXECUTION_FAILURE: &str = "tool:execution:failure";
pub const AGENT_EXECUTION_SUCCESS: &str = "agent:execution:success";
pub const AGENT_EXECUTION_FAILURE: &str = "agent:execution:failure";
pub const ROUTER_INITIALIZED: &str = "router:initialized";
pub const ROUTER_SHUTDOWN: &str = "router:shutdown";

/// A single notification delivered to matching subscribers. Never stored.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_timestamp() {
        let event = Event::new(TOOL_CACHE_HIT, json!({"toolName": "get_bitcoin_price"}));
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["name"], "tool:cache:hit");
        assert_eq!(v["payload"]["toolName"], "get_bitcoin_price");
        assert!(v["timestamp"].is_string());
    }
}
