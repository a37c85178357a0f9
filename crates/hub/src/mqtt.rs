use serde::Deserialize;

pub(crate) const CLIMATE_TOPIC: &str = "tele/+/climate";

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Payload published by a climate node.
#[derive(Debug, Deserialize)]
pub(crate) struct ClimateMsg {
    /// Unix seconds at which the node sampled.
    pub(crate) ts: i64,
    pub(crate) temperature: f64,
    pub(crate) humidity: f64,
}

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

/// Extract node_id from "tele/<node_id>/climate".
pub(crate) fn extract_node_id(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("tele"), Some(node), Some("climate"), None) if !node.is_empty() => Some(node),
        _ => None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
