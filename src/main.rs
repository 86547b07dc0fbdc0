mod config;
mod error;
mod models;
mod notify;
mod reconcile;
mod runner;
mod scrapers;
mod store;
mod validate;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::notify::{HttpMailer, HttpSms, MailChannel, SmsChannel};
use crate::runner::Runner;
use crate::scrapers::ChromeFetcher;
use crate::store::MySqlStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    info!("🏠 Listing Scout - {} sources configured", config.source_urls.len());

    let store = MySqlStore::connect(&config.database_url)
        .await
        .context("Failed to connect to the listing store")?;

    let mailer: Arc<dyn MailChannel> = Arc::new(HttpMailer::new(config.mail.clone()));
    let sms: Arc<dyn SmsChannel> = Arc::new(HttpSms::new(config.sms.clone()));
    let fetcher = Arc::new(ChromeFetcher::new(&config, mailer.clone())?);

    let runner = Runner::new(fetcher, Arc::new(store), mailer, sms, config)?;
    if let Err(err) = runner.run().await {
        // the death alert has already been attempted inside the runner
        error!("Exiting after unrecoverable failure: {err}");
        std::process::exit(1);
    }

    Ok(())
}
