// Tracing setup shared by the daemon and the watch CLI
// Logs go to stderr so the CLI can keep stdout for its own rendering

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "DEADLINE_NOTIFY_LOG";
const LOG_FORMAT_ENV: &str = "DEADLINE_NOTIFY_LOG_FORMAT";

/// Install the global subscriber.
///
/// `DEADLINE_NOTIFY_LOG` takes an `EnvFilter` directive and wins over
/// `verbose`. `DEADLINE_NOTIFY_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "deadline_notify_lib=debug,deadline_daemon=debug,deadline_watch=debug,info"
        } else {
            "info"
        })
    });

    let format = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    // try_init: tests and embedders may have installed a subscriber already
    let _ = match format.as_str() {
        "json" => registry
            .with(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };
}
