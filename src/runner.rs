use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::models::{Listing, Source};
use crate::notify::{MailChannel, SmsChannel};
use crate::reconcile::{reconcile, ValidationBudget};
use crate::scrapers::browser::Fetcher;
use crate::scrapers::crawl::crawl_source;
use crate::store::ListingStore;
use crate::validate::validate;

/// SMS attempts for the death alert before giving up.
const CRASH_ALERT_ATTEMPTS: u32 = 5;

/// Drives the crawl cycle over all configured sources, forever. Owns every
/// collaborator handle; nothing in here is process-global.
pub struct Runner {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn ListingStore>,
    mailer: Arc<dyn MailChannel>,
    sms: Arc<dyn SmsChannel>,
    config: AppConfig,
    sources: Vec<Source>,
}

impl Runner {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn ListingStore>,
        mailer: Arc<dyn MailChannel>,
        sms: Arc<dyn SmsChannel>,
        config: AppConfig,
    ) -> Result<Self> {
        let sources = config
            .source_urls
            .iter()
            .map(|url| Source::from_url(url, &config.base_url, &config.category_pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            fetcher,
            store,
            mailer,
            sms,
            config,
            sources,
        })
    }

    /// Run until something unrecoverable happens, then alert the operators
    /// and hand the failure back. Process exit is the caller's move.
    pub async fn run(&self) -> Result<()> {
        if let Err(err) = self.run_cycles().await {
            error!("Crawler died: {err}");
            self.send_crash_alert().await;
            return Err(err);
        }
        Ok(())
    }

    async fn run_cycles(&self) -> Result<()> {
        loop {
            for (index, source) in self.sources.iter().enumerate() {
                info!("Started crawling {}!", source.url);
                self.process_source(source).await?;
                info!("Stopped crawling!");

                if index + 1 < self.sources.len() {
                    tokio::time::sleep(self.config.source_delay).await;
                }
            }

            info!(
                "Waiting {} minutes until the next cycle!",
                self.config.recrawl_delay.as_secs() / 60
            );
            tokio::time::sleep(self.config.recrawl_delay).await;
        }
    }

    async fn process_source(&self, source: &Source) -> Result<()> {
        let crawled = crawl_source(self.fetcher.as_ref(), source, &self.config).await?;

        let ids: Vec<u64> = crawled.iter().map(|listing| listing.external_id).collect();
        let known = match self.store.existing_ids(&ids).await {
            Ok(known) => known,
            Err(e) => {
                // degraded: crawl on as if nothing were known yet
                error!("Existing-ids lookup failed, treating the batch as all new: {e}");
                HashSet::new()
            }
        };

        let budget = ValidationBudget::new(self.config.validation_budget, self.config.budget_mode);
        let reconciled = reconcile(crawled, &known, budget);

        if reconciled.to_insert.is_empty() {
            info!("No new listings found!");
        } else {
            info!("Validating {} listings!", reconciled.to_insert.len());
        }

        let valid = validate(
            self.fetcher.as_ref(),
            reconciled.to_insert,
            self.config.validation_delay,
        )
        .await?;

        if !valid.is_empty() {
            if let Err(e) = self.store.insert(&valid).await {
                error!("Could not persist new listings: {e}");
            }
            self.notify_new(&valid).await;
        }

        if !reconciled.to_refresh.is_empty() {
            if let Err(e) = self
                .store
                .touch_last_seen(&reconciled.to_refresh, Utc::now())
                .await
            {
                error!("Could not refresh last-seen timestamps: {e}");
            }
        }

        Ok(())
    }

    /// Routine discovery notification; failures are logged, never retried.
    async fn notify_new(&self, listings: &[Listing]) {
        let urls: Vec<&str> = listings.iter().map(|listing| listing.url.as_str()).collect();
        let message = format!("New ads:\n{}", urls.join("\n"));
        info!("SENDING MESSAGE: {message}");

        if let Err(e) = self.sms.send(&message).await {
            warn!("SMS notification failed: {e}");
        }
        if let Err(e) = self.mailer.send(&message).await {
            warn!("Mail notification failed: {e}");
        }
    }

    /// Bounded-retry death alert: the SMS is the operator's only signal that
    /// the process is gone, so it gets its own retry loop. Returns the number
    /// of attempts made.
    async fn send_crash_alert(&self) -> u32 {
        let mut attempts = 0;

        while attempts < CRASH_ALERT_ATTEMPTS {
            attempts += 1;
            info!("Crawler died, attempt {attempts} of sending SMS!");

            match self.sms.send("The crawler has died unexpectedly!").await {
                Ok(()) => {
                    info!("The SMS has been sent!");
                    return attempts;
                }
                Err(e) => {
                    warn!("Death-alert SMS attempt {attempts} failed: {e}");
                    if attempts < CRASH_ALERT_ATTEMPTS {
                        tokio::time::sleep(self.config.sms_retry_delay).await;
                    }
                }
            }
        }

        error!("SMS could not be sent!");
        attempts
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::error::ScoutError;

    const BASE: &str = "https://www.nepremicnine.net";

    struct FakeFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| ScoutError::FetchFailed {
                    url: url.to_string(),
                    attempts: 4,
                    reason: "connection refused".to_string(),
                })
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        known: HashSet<u64>,
        inserted: Mutex<Vec<Listing>>,
        touched: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ListingStore for MemoryStore {
        async fn existing_ids(&self, ids: &[u64]) -> Result<HashSet<u64>> {
            Ok(ids.iter().copied().filter(|id| self.known.contains(id)).collect())
        }

        async fn insert(&self, listings: &[Listing]) -> Result<()> {
            self.inserted.lock().unwrap().extend_from_slice(listings);
            Ok(())
        }

        async fn touch_last_seen(&self, ids: &[u64], _seen_at: DateTime<Utc>) -> Result<()> {
            self.touched.lock().unwrap().extend_from_slice(ids);
            Ok(())
        }
    }

    /// Records sends; fails the first `failures` calls.
    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
        failures: AtomicU32,
    }

    impl RecordingChannel {
        fn failing(failures: u32) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failures: AtomicU32::new(failures),
            }
        }

        fn send_or_fail(&self, text: &str) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ScoutError::Notify("gateway unavailable".to_string()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailChannel for RecordingChannel {
        async fn send(&self, text: &str) -> Result<()> {
            self.send_or_fail(text)
        }
    }

    #[async_trait]
    impl SmsChannel for RecordingChannel {
        async fn send(&self, text: &str) -> Result<()> {
            self.send_or_fail(text)
        }
    }

    fn listing_page() -> String {
        r#"<html><body><div class="property-grid">
          <div>
            <div class="property-image"><a href="/oglasi-prodaja/stanovanje-a_100/"><h2>a</h2></a></div>
            <div class="property-details"><a>Stanovanje A</a><h6>100.000 €</h6></div>
          </div>
          <div>
            <div class="property-image"><a href="/oglasi-prodaja/stanovanje-b_200/"><h2>b</h2></a></div>
            <div class="property-details"><a>Stanovanje B</a><h6>200.000 €</h6></div>
          </div>
        </div>
        <div id="pagination"><ul><li class="paging_prev"></li></ul></div>
        </body></html>"#
            .to_string()
    }

    fn runner_with(
        pages: HashMap<String, String>,
        known: HashSet<u64>,
        sms_failures: u32,
    ) -> (Runner, Arc<MemoryStore>, Arc<RecordingChannel>, Arc<RecordingChannel>) {
        let mut config = AppConfig::test_defaults();
        config.source_urls = vec![format!("{BASE}/oglasi-prodaja/stanovanja/")];

        let store = Arc::new(MemoryStore {
            known,
            ..MemoryStore::default()
        });
        let mailer = Arc::new(RecordingChannel::default());
        let sms = Arc::new(RecordingChannel::failing(sms_failures));

        let runner = Runner::new(
            Arc::new(FakeFetcher { pages }),
            store.clone(),
            mailer.clone(),
            sms.clone(),
            config,
        )
        .unwrap();

        (runner, store, mailer, sms)
    }

    #[tokio::test]
    async fn new_listing_is_validated_inserted_and_notified() {
        let pages = HashMap::from([
            (format!("{BASE}/oglasi-prodaja/stanovanja/"), listing_page()),
            (
                format!("{BASE}/oglasi-prodaja/stanovanje-b_200/"),
                r#"<div class="cena"><span>200.000 €</span></div>"#.to_string(),
            ),
        ]);
        let (runner, store, mailer, sms) = runner_with(pages, HashSet::from([100]), 0);

        runner.process_source(&runner.sources[0]).await.unwrap();

        let inserted = store.inserted.lock().unwrap().clone();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].external_id, 200);

        assert_eq!(store.touched.lock().unwrap().clone(), vec![100]);

        let sms_messages = sms.messages();
        assert_eq!(sms_messages.len(), 1);
        assert!(sms_messages[0].contains("/oglasi-prodaja/stanovanje-b_200/"));
        assert!(!sms_messages[0].contains("_100"));
        assert_eq!(mailer.messages().len(), 1);
    }

    #[tokio::test]
    async fn inactive_listing_is_neither_inserted_nor_notified() {
        let pages = HashMap::from([
            (format!("{BASE}/oglasi-prodaja/stanovanja/"), listing_page()),
            (
                format!("{BASE}/oglasi-prodaja/stanovanje-b_200/"),
                "<html><body>404</body></html>".to_string(),
            ),
        ]);
        let (runner, store, _mailer, sms) = runner_with(pages, HashSet::from([100]), 0);

        runner.process_source(&runner.sources[0]).await.unwrap();

        assert!(store.inserted.lock().unwrap().is_empty());
        assert_eq!(store.touched.lock().unwrap().clone(), vec![100]);
        assert!(sms.messages().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_propagates_out_of_the_source() {
        let (runner, store, _mailer, _sms) = runner_with(HashMap::new(), HashSet::new(), 0);

        let result = runner.process_source(&runner.sources[0]).await;

        assert!(matches!(result, Err(ScoutError::FetchFailed { .. })));
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_sends_the_death_alert_and_reports_the_failure() {
        let (runner, _store, _mailer, sms) = runner_with(HashMap::new(), HashSet::new(), 1);

        let result = runner.run().await;

        assert!(matches!(result, Err(ScoutError::FetchFailed { .. })));
        // first alert attempt failed, second got through
        assert_eq!(
            sms.messages(),
            vec!["The crawler has died unexpectedly!".to_string()]
        );
    }

    #[tokio::test]
    async fn crash_alert_stops_after_the_first_successful_send() {
        let (runner, _store, _mailer, sms) = runner_with(HashMap::new(), HashSet::new(), 1);

        let attempts = runner.send_crash_alert().await;

        assert_eq!(attempts, 2);
        assert_eq!(
            sms.messages(),
            vec!["The crawler has died unexpectedly!".to_string()]
        );
    }

    #[tokio::test]
    async fn crash_alert_gives_up_after_five_attempts() {
        let (runner, _store, _mailer, sms) = runner_with(HashMap::new(), HashSet::new(), 10);

        let attempts = runner.send_crash_alert().await;

        assert_eq!(attempts, 5);
        assert!(sms.messages().is_empty());
    }
}
