use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a global subscriber printing engine events to stderr.
///
/// The filter comes from `RUST_LOG` and defaults to `info`; use
/// `RUST_LOG=plugwork=debug` to see every compute and dirty propagation.
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()
}
