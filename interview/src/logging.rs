//! Diagnostic tracing for the engine and CLI.
//!
//! Two separate channels exist:
//!
//! - **Tracing (this module)**: stderr diagnostics filtered by `RUST_LOG` or the
//!   CLI's `-v` count. Never stored with a session.
//! - **Session events (`session::Event`)**: the append-only trace carried by
//!   every `SessionState`. Always recorded, whatever the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive for a `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "interview=info,warn",
        _ => "interview=debug,info",
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `verbosity`.
///
/// ```bash
/// RUST_LOG=interview::turn=debug interview replay --answers answers.txt
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    // Tests and embedders may have installed a subscriber already.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity > 1)
                .compact(),
        )
        .try_init();
}
