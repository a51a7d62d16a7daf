//! Structured span definitions for tracing.

use tracing::{Level, Span, span};

/// Span covering one staged plugin execution.
pub fn execution_span(plugin_id: &str, event: Option<&str>) -> Span {
    span!(
        Level::INFO,
        "plugin.execute",
        plugin_id = plugin_id,
        event = event.unwrap_or(""),
    )
}

/// Span covering one lazy or eager plugin load.
pub fn load_span(plugin_id: &str) -> Span {
    span!(Level::DEBUG, "plugin.load", plugin_id = plugin_id)
}

/// Span covering a fan-out of one event.
pub fn fire_span(event: &str) -> Span {
    span!(Level::DEBUG, "event.fire", event = event)
}
