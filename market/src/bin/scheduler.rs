use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use common::config::Config;
use market::jobs::{Initiator, Materializer, Watchdog};
use market::lifecycle::Lifecycle;
use market::notify::LogNotifier;
use market::store::init_schema;
use sqlx::sqlite::SqlitePoolOptions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "market/config/scheduler.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.scheduler.log_level),
    )
    .init();

    let pool = SqlitePoolOptions::new()
        .connect(&config.common.database_url)
        .await?;
    init_schema(&pool).await?;

    let lifecycle = Lifecycle::new(pool, Arc::new(LogNotifier));

    let watchdog = Watchdog::new(lifecycle.clone(), config.scheduler.watchdog_interval_secs);
    let initiator = Initiator::new(lifecycle.clone(), config.scheduler.initiator_interval_secs);
    let materializer = Materializer::new(lifecycle, config.scheduler.materializer_hour);

    log::info!("{} scheduler starting", config.common.project_name);

    let handles = vec![
        tokio::spawn(watchdog.run()),
        tokio::spawn(initiator.run()),
        tokio::spawn(materializer.run()),
    ];
    for handle in handles {
        handle.await?;
    }

    Ok(())
}
