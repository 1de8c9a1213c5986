//! Logging setup for providers using this crate.
//!
//! Waiters and tag reconciliation emit `tracing` events: one `debug` event per
//! poll, `info` on convergence, and `warn` on failure states, timeouts and
//! drift. Each wait runs inside a `waiter.wait` span carrying the resource
//! identifier, and each tag update inside a `tags.apply` span.
//!
//! All logs are written to **stderr**, since the host engine reads stdout.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `hemmer_provider_convergence=debug`)
//!
//! ```bash
//! # Show every poll made by the waiters
//! RUST_LOG=hemmer_provider_convergence::waiter=debug ./my-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the default logging subscriber at `info` unless `RUST_LOG` is set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level, used when `RUST_LOG` is not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if a subscriber was already set.
///
/// Useful in tests, where several cases may race to install a subscriber.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so only the
    // idempotent entry point is exercised here.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("hemmer_provider_convergence=debug").is_ok());
        assert!(EnvFilter::try_new("warn,hemmer_provider_convergence::waiter=debug").is_ok());
    }

    #[test]
    fn test_try_init_is_idempotent() {
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
