//! Shared pieces of the `devdock` binary: logging setup and terminal rendering.

pub mod render;

use devdock_config::constants;
use tracing_subscriber::EnvFilter;

/// Install the tracing subscriber.
///
/// Logs go to stderr so server output and tables on stdout stay clean.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "devdock_preview=debug,devdock_cli=debug"
    } else {
        "devdock_preview=info,devdock_cli=info"
    };

    let filter = std::env::var(constants::RUST_LOG)
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
