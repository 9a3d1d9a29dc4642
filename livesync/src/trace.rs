//! Logging for livesync.
//!
//! Logging is on by default through the `tracing` feature. With the feature
//! disabled every log macro used inside the crate expands to nothing, so a
//! value referenced only by a log call should be bound with a leading
//! underscore.

/// Directive used when neither `LIVESYNC_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_DIRECTIVE: &str = "livesync=info";

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "LIVESYNC_LOG";

/// Installs a subscriber filtered by [`DEFAULT_DIRECTIVE`].
///
/// See [`init_tracing_with`].
pub fn init_tracing() {
    init_tracing_with(DEFAULT_DIRECTIVE);
}

/// Installs a `tracing` subscriber writing to stderr with uptime timestamps.
///
/// The filter comes from `LIVESYNC_LOG`, then `RUST_LOG`, then `directive`.
/// Stdout is left to the caller, which the `livesync` binary uses for
/// timecode output. Only the first call installs anything.
#[cfg(feature = "tracing")]
pub fn init_tracing_with(directive: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(directive));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub fn init_tracing_with(_directive: &str) {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! log_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {
    log_noop as debug, log_noop as error, log_noop as info, log_noop as trace, log_noop as warn,
};
