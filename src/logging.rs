//! Structured logging: env-driven verbosity plus wire-frame tracing.
//!
//! `NODE_INSPECT_VERBOSE=1` or `DEBUG=inspect` turns on the `cdbg::wire`
//! target, which the protocol client logs every outbound `>` and inbound
//! `<` frame payload to at `trace` level. Everything else defaults to
//! `info` unless `RUST_LOG` overrides it.
use tracing_subscriber::EnvFilter;

pub fn init() {
    let verbose = std::env::var("NODE_INSPECT_VERBOSE").as_deref() == Ok("1")
        || std::env::var("DEBUG").as_deref() == Ok("inspect");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,cdbg::wire=trace")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();
}

/// Logs one outbound frame payload at the `cdbg::wire` target, `>` prefix.
pub fn trace_sent(payload: &str) {
    tracing::trace!(target: "cdbg::wire", "> {payload}");
}

/// Logs one inbound frame payload at the `cdbg::wire` target, `<` prefix.
pub fn trace_received(payload: &str) {
    tracing::trace!(target: "cdbg::wire", "< {payload}");
}
