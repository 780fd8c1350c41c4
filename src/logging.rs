//! src/logging.rs
//! Logging initialization and runtime filter updates, via a reload layer
//! so the operator surface can change verbosity without a restart.

use std::sync::{Mutex, OnceLock};

use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::EnvFilter, fmt, reload::Handle};

type ReloadHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

static RELOAD_HANDLE: OnceLock<Mutex<ReloadHandle>> = OnceLock::new();

/// Installs the global subscriber with `default` as the initial filter
/// (an `EnvFilter` directive string, e.g. `"info"` or `"debug,tokio=warn"`).
/// Idempotent beyond the first call within a process.
pub fn init_logging(default: &str) {
    if RELOAD_HANDLE.get().is_some() {
        return;
    }
    let filter = EnvFilter::new(default);
    let (reload_layer, handle) = tracing_subscriber::reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer());
    let _ = tracing::subscriber::set_global_default(subscriber);
    let _ = RELOAD_HANDLE.set(Mutex::new(handle));
}

/// Replaces the active filter directive. Returns an error description if
/// logging hasn't been initialized yet or the directive fails to parse.
pub fn set_filter(directive: &str) -> Result<(), String> {
    let handle = RELOAD_HANDLE.get().ok_or("logging not initialized")?;
    let filter = EnvFilter::try_new(directive).map_err(|e| e.to_string())?;
    handle
        .lock()
        .unwrap()
        .reload(filter)
        .map_err(|e| e.to_string())
}
