use clap::Parser;

use coffer_daemon::config::Config;
use coffer_daemon::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    telemetry::init();
    coffer_daemon::run(config).await
}
