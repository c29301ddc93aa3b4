//! Tracing setup for hosts embedding the market core.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "civic_market_core=info";

/// Install a global subscriber. `RUST_LOG` wins over `default_filter`;
/// `LOG_FORMAT=json` switches to JSON lines.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_filter: Option<&str>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.unwrap_or(DEFAULT_FILTER).into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}
