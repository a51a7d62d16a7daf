//! Observability for the plugin runtime.
//!
//! - **Metrics**: atomic counters for fired events, executions, loads and
//!   message deliveries
//! - **Spans**: one span per staged execution, load and event fan-out
//!
//! Enable the `tracing-init` feature to install a console subscriber
//! filtered by `RUST_LOG`:
//!
//! ```toml
//! plugin-runtime = { version = "0.1", features = ["tracing-init"] }
//! ```

mod metrics;
mod spans;

pub use metrics::{Counter, Gauge, MetricsSummary, RuntimeMetrics};
pub use spans::{execution_span, fire_span, load_span};

/// Install a fmt subscriber; `default_filter` applies when `RUST_LOG` is unset.
#[cfg(feature = "tracing-init")]
pub fn init_tracing(default_filter: &str) -> Result<(), crate::Error> {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Failed to init subscriber: {}", e)))
}
