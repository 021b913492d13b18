use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Env var selecting the log line format; `json` or anything else for text.
pub const LOG_FORMAT_VAR: &str = "GRPC_MOCKSERVER_LOG_FORMAT";

/// Install the tracing subscriber used by test sessions.
///
/// Output goes through the test harness writer so it is captured per test.
/// The filter comes from `RUST_LOG` and defaults to `warn`. Only the first
/// call in a process has an effect.
pub fn init_test_tracing() {
    let json = std::env::var(LOG_FORMAT_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        tracing_subscriber::registry()
            .with(default_filter())
            .with(fmt::layer().json().with_test_writer())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(default_filter())
            .with(fmt::layer().with_test_writer())
            .try_init()
    };
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}
