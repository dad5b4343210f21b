//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   stdout stays reserved for protocol traffic and command output.
//!
//! - **Call log (`io/call_log`)**: Product artifact written by `sandbox run --log`.
//!   Always written when requested, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "warn";

/// `RUST_LOG` if it parses, otherwise [`DEFAULT_FILTER`].
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the stderr subscriber. Compact format, no ANSI when stderr is piped.
///
/// Script output from `ctx_log` uses the `agent` target:
///
/// ```bash
/// RUST_LOG=sandbox=debug,agent=info sandbox run agent.py
/// ```
pub fn init() {
    let stderr_is_terminal = std::io::IsTerminal::is_terminal(&std::io::stderr());
    // Tests may initialize more than once; the first subscriber stays.
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(stderr_is_terminal)
                .compact(),
        )
        .try_init();
}
