use anyhow::Result;
use chrono::Utc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use confluence_scalper::bot::ConfluenceBot;
use confluence_scalper::config::Config;
use confluence_scalper::exchange::{ForexFactoryFeed, YahooFeed};
use confluence_scalper::trading::{ExecutionPort, LiveExecution, SimulatedExecution};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.to_lowercase()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let feed = Box::new(YahooFeed::new(&cfg)?);
    let news = Box::new(ForexFactoryFeed::new(&cfg)?);
    let port: Box<dyn ExecutionPort> = if cfg.live_trading {
        Box::new(LiveExecution::new(&cfg)?)
    } else {
        Box::new(SimulatedExecution::new(&cfg))
    };
    info!("Execution: {}", port.name());

    let mut bot = ConfluenceBot::new(cfg, feed, news, port, Utc::now());
    bot.run().await?;

    Ok(())
}
