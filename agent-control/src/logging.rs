//! Diagnostic tracing for the control core.
//!
//! Output goes to stderr so stdout stays reserved for outbound payloads.
//! Nothing here is persisted; delegation records are the only durable state.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=agent_control=debug agent-control run --input events.jsonl
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
