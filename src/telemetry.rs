//! Structured logging setup (§1.1). Mirrors the sibling Kubernetes
//! controller's `tracing` + `tracing-subscriber` wiring, switched between
//! text and JSON formatting by `Config::json_logs`.

use tracing_subscriber::{EnvFilter, fmt};

pub fn init(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs {
        fmt().with_env_filter(filter).json().with_current_span(true).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
