//! Telemetry initialization.
//!
//! Human-readable compact output on an interactive terminal; newline-delimited JSON
//! when running non-interactively, so log lines stay machine-parseable alongside the
//! structured error lines required of every entry point.
//!
//! No network exporter: concrete network protocols are out of scope for this
//! substrate, so there is no OTLP/otel stack here, only `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

/// Holds the installed subscriber alive for the life of the process.
///
/// Returned from [`init`]; dropping it does not tear down logging (the global
/// subscriber set by `tracing` cannot be uninstalled), it exists so call sites have an
/// explicit handle to hold rather than relying on a hidden global.
pub struct TelemetryGuard;

/// Install the process-wide `tracing` subscriber.
///
/// Respects `RUST_LOG` (falling back to `SAFE_MOVE_LOG`, falling back to `info`).
pub fn init(non_interactive: bool) -> TelemetryGuard {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("SAFE_MOVE_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    if non_interactive {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.compact().try_init();
    }

    TelemetryGuard
}
