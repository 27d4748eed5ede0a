//! Logging setup shared by the `input` and `controller` binaries.
//!
//! `config.debug` in the distilled protocol is a legacy numeric debug
//! level (0 = quiet, increasing verbosity). We map it onto a `tracing`
//! level and keep a reload handle so the controller's `config.debug`
//! dispatch command can swap the live filter instead of mutating a raw
//! global, while preserving the "update process-wide level" behavior the
//! spec calls for.

use once_cell::sync::OnceCell;
use tracing_subscriber::{filter, reload, Registry};

pub type ReloadHandle = reload::Handle<filter::LevelFilter, Registry>;

static RELOAD_HANDLE: OnceCell<ReloadHandle> = OnceCell::new();

/// Map the legacy numeric debug level onto a `tracing` level. `0` is the
/// quietest (errors only); each step up adds a level of verbosity.
pub fn level_for_debug(debug_level: i64) -> filter::LevelFilter {
    match debug_level {
        i64::MIN..=0 => filter::LevelFilter::ERROR,
        1 => filter::LevelFilter::WARN,
        2 => filter::LevelFilter::INFO,
        3 => filter::LevelFilter::DEBUG,
        _ => filter::LevelFilter::TRACE,
    }
}

/// Initialize the global tracing subscriber once. Safe to call more than
/// once (e.g. from tests); only the first call takes effect.
pub fn init(initial_debug_level: i64) {
    let (filter, handle) = reload::Layer::new(level_for_debug(initial_debug_level));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = RELOAD_HANDLE.set(handle);
    }
}

/// Apply a new `config.debug` level to the running process, if logging has
/// been initialized.
pub fn set_debug_level(debug_level: i64) {
    if let Some(handle) = RELOAD_HANDLE.get() {
        let _ = handle.modify(|filter| *filter = level_for_debug(debug_level));
        tracing::info!(debug_level, "debug level updated");
    }
}

use tracing_subscriber::layer::SubscriberExt as _;
