//! Logging setup for herblink.
//!
//! Library code logs through `tracing`; the binary installs a subscriber
//! here. `RUST_LOG` takes precedence over the verbosity flags.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the binary logs, picked from `-q` and `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Queue lifecycle and pass summaries.
    #[default]
    Normal,
    /// Per-record upload detail.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// Verbosity from `-q` and the number of `-v` flags. `-q` wins.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Most detailed level shown for herblink's own events.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directive used when `RUST_LOG` is unset.
    ///
    /// Dependencies stay at `warn` so HTTP and database internals don't
    /// drown out queue activity.
    #[must_use]
    pub fn default_directive(&self) -> String {
        let level = self.to_level_filter();
        if *self == Self::Quiet {
            format!("{level}")
        } else {
            format!("warn,herblink={level}")
        }
    }
}

/// Install the global subscriber, writing to stderr.
///
/// Only the first call has an effect.
///
/// # Examples
///
/// ```no_run
/// use herblink::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity != Verbosity::Normal)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // Already installed is fine.
    let _ = subscriber.try_init();
}

/// Subscriber for unit tests, warnings and up.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
