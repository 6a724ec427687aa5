//! Logging setup for tests: one `EnvFilter` subscriber per test binary.

use std::sync::Once;

use tracing::debug;
use tracing_subscriber::{
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

static TEST_SETUP: Once = Once::new();

/// Targets too chatty to be useful in test output
const NOISY_TARGETS: [&str; 1] = ["walkdir"];

/// Install the test subscriber once; `RUST_LOG` overrides the `debug` default.
pub fn init_test_setup() {
    TEST_SETUP.call_once(|| {
        let target_filter = filter_fn(|metadata| {
            !NOISY_TARGETS
                .iter()
                .any(|name| metadata.target().starts_with(name))
        });
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_test_writer()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(target_filter)
                .with_filter(env_filter),
        );

        if tracing::dispatcher::has_been_set() {
            debug!("Tracing subscriber already set");
        } else if let Err(e) = subscriber.try_init() {
            eprintln!("Error: Failed to set up logging: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_repeated_calls_when_initializing_then_second_is_noop() {
        init_test_setup();
        init_test_setup();
    }
}
