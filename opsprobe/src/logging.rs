//! Diagnostic tracing for opsprobe.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the product output.
//!
//! - **Session output (`main`)**: answers go to stdout, progress lines and
//!   approval prompts to stderr. Always shown, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset, or `opsprobe=debug` when
/// `debug` is true.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=opsprobe::session=debug opsprobe ask "why is my pod pending?"
/// ```
pub fn init(debug: bool) {
    let fallback = if debug { "warn,opsprobe=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
