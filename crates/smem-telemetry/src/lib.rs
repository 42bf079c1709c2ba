//! Structured logging for the shared-memory fabric.
//!
//! Grounded on the teacher's `ioi-telemetry::init`: `tracing` +
//! `tracing-subscriber` with an `EnvFilter`, JSON formatting to stderr,
//! and a `tracing-log` bridge so any dependency still emitting through
//! the `log` facade is captured too. `smem_set_log_level` and
//! `smem_set_extern_logger` from spec.md §6 are modeled here as
//! `set_log_level` (backed by a `reload::Handle` so the filter can change
//! after `init` without re-installing a subscriber) and
//! `set_extern_logger` (which swaps in a caller-supplied `Subscriber`,
//! e.g. to forward into a host application's own log pipeline).

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, reload, EnvFilter, Registry};

type ReloadHandle = reload::Handle<EnvFilter, Registry>;

static RELOAD_HANDLE: OnceLock<ReloadHandle> = OnceLock::new();

/// Severity levels the fabric accepts from callers, mirroring the
/// `smem_set_log_level` C ABI's small integer enum rather than exposing
/// `tracing::Level` (and its `FromStr` quirks) directly at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Installs the global `tracing` subscriber: JSON lines to stderr, level
/// from `RUST_LOG` (defaulting to `info`), `log`-facade bridging. Safe to
/// call once per process; a second call is a no-op that logs a warning
/// rather than panicking, since embedding contexts (tests, the CLI, a
/// caller's own `main`) may all try to initialize it.
pub fn init_tracing() -> anyhow::Result<()> {
    if RELOAD_HANDLE.get().is_some() {
        return Ok(());
    }
    let default_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(default_filter);
    let fmt_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let subscriber = Registry::default().with(filter).with(fmt_layer);

    // LogTracer::init can only succeed once process-wide; ignore a second
    // caller's failure instead of propagating it as fatal.
    let _ = tracing_log::LogTracer::init();
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = RELOAD_HANDLE.set(handle);
    Ok(())
}

/// Changes the active log level after `init_tracing`. Returns an error if
/// called before `init_tracing` (spec.md's `NotInitialized` taxonomy —
/// surfaced here as a plain string since `smem-telemetry` sits below
/// `smem-types` in the dependency order and must not depend back on it).
pub fn set_log_level(level: LogLevel) -> Result<(), String> {
    let handle = RELOAD_HANDLE.get().ok_or("smem-telemetry not initialized")?;
    handle
        .modify(|filter| *filter = EnvFilter::new(level.as_filter_str()))
        .map_err(|e| e.to_string())
}

/// Installs a caller-supplied subscriber in place of the default JSON
/// stderr one, e.g. so a host application can route fabric logs into its
/// own pipeline. Must be called instead of, not after, `init_tracing`.
pub fn set_extern_logger<S>(subscriber: S) -> anyhow::Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
