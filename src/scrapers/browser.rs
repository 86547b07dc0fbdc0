use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{Result, ScoutError};
use crate::notify::MailChannel;

/// Total navigation attempts before a fetch is abandoned.
const NAV_ATTEMPTS: u32 = 4;

/// Locates the checkbox inside the challenge frame and ticks it. Returns
/// whether a checkbox was found; cross-origin frames come back empty-handed.
const CHALLENGE_CLICK_JS: &str = r#"
    (() => {
        const frame = document.querySelector('iframe');
        const doc = frame && (frame.contentDocument
            || (frame.contentWindow && frame.contentWindow.document));
        const checkbox = doc && doc.querySelector('input[type="checkbox"]');
        if (checkbox) checkbox.click();
        return !!checkbox;
    })()
"#;

/// Obtains final rendered markup for a URL. The seam between the pipeline
/// and whatever transport renders pages; tests substitute canned documents.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Browser-backed fetcher using headless Chrome.
///
/// Each fetch opens a fresh tab and closes it on every exit path, so a day
/// of crawling cannot pile up render resources.
pub struct ChromeFetcher {
    browser: Browser,
    mailer: Arc<dyn MailChannel>,
    user_agent: String,
    challenge_phrase: String,
    challenge_delay: Duration,
}

impl ChromeFetcher {
    pub fn new(config: &AppConfig, mailer: Arc<dyn MailChannel>) -> anyhow::Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .path(config.browser_path.clone())
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

        Ok(Self {
            browser,
            mailer,
            user_agent: config.user_agent.clone(),
            challenge_phrase: config.challenge_phrase.clone(),
            challenge_delay: config.challenge_delay,
        })
    }

    async fn fetch_inner(&self, tab: &Arc<Tab>, url: &str) -> Result<String> {
        if let Err(e) = tab.set_user_agent(&self.user_agent, None, None) {
            warn!("Could not set user agent: {e}");
        }

        let attempts = self.navigate(tab, url)?;
        let mut html = self.page_html(tab).map_err(|reason| ScoutError::FetchFailed {
            url: url.to_string(),
            attempts,
            reason,
        })?;

        if html.contains(&self.challenge_phrase) {
            self.resolve_challenge(tab).await?;
            html = self.page_html(tab).map_err(|reason| ScoutError::FetchFailed {
                url: url.to_string(),
                attempts,
                reason,
            })?;
        }

        Ok(html)
    }

    /// Bounded navigation retry: transient blips are steady-state noise for
    /// a scraper, so a page gets `NAV_ATTEMPTS` tries before the source is
    /// given up.
    fn navigate(&self, tab: &Arc<Tab>, url: &str) -> Result<u32> {
        let mut last_error = None;

        for attempt in 1..=NAV_ATTEMPTS {
            let outcome = tab
                .navigate_to(url)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ());
            match outcome {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("Navigation to {url} recovered on attempt {attempt}");
                    }
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!("Navigation attempt {attempt}/{NAV_ATTEMPTS} failed for {url}: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(ScoutError::FetchFailed {
            url: url.to_string(),
            attempts: NAV_ATTEMPTS,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown navigation failure".to_string()),
        })
    }

    fn page_html(&self, tab: &Arc<Tab>) -> Result<String, String> {
        let rendered = tab
            .evaluate("document.documentElement.outerHTML", false)
            .map_err(|e| format!("could not read rendered markup: {e}"))?;

        rendered
            .value
            .as_ref()
            .and_then(|value| value.as_str())
            .map(|html| html.to_string())
            .ok_or_else(|| "rendered markup was empty".to_string())
    }

    /// Best-effort pass through a bot-challenge interstitial: wait, find the
    /// embedded frame, tick its checkbox. One shot; anything missing fails
    /// the fetch as `ChallengeUnresolved`.
    async fn resolve_challenge(&self, tab: &Arc<Tab>) -> Result<()> {
        warn!("Crawler was blocked by a challenge page!");
        tokio::time::sleep(self.challenge_delay).await;

        tab.wait_for_element("iframe")
            .map_err(|e| ScoutError::ChallengeUnresolved(format!("challenge frame not found: {e}")))?;

        let clicked = tab
            .evaluate(CHALLENGE_CLICK_JS, false)
            .map_err(|e| ScoutError::ChallengeUnresolved(format!("checkbox lookup failed: {e}")))?
            .value
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        if !clicked {
            return Err(ScoutError::ChallengeUnresolved(
                "challenge checkbox not found".to_string(),
            ));
        }

        if let Err(e) = self.mailer.send("Crawler was blocked!").await {
            warn!("Could not send blocked-crawler mail: {e}");
        }

        Ok(())
    }
}

#[async_trait]
impl Fetcher for ChromeFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!("Fetching {url}");

        let tab = self.browser.new_tab().map_err(|e| ScoutError::FetchFailed {
            url: url.to_string(),
            attempts: 0,
            reason: format!("could not open a page: {e}"),
        })?;

        let result = self.fetch_inner(&tab, url).await;

        // the render resource is released no matter how the fetch went
        if let Err(e) = tab.close(true) {
            warn!("Could not close tab for {url}: {e}");
        }

        result
    }
}
