//! Structured logging setup
//!
//! Emits JSON log lines filtered by `RUST_LOG`, falling back to a filter that
//! keeps Trellis at debug and the Kubernetes client stack quieter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::Error;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,trellis=debug,kube=info,tower=warn,hyper=warn";

/// Install the global JSON tracing subscriber
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<(), Error> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::internal_with_context("telemetry", e.to_string()))
}
