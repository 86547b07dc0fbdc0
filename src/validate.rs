use std::time::Duration;

use tracing::info;

use crate::error::Result;
use crate::models::Listing;
use crate::scrapers::browser::Fetcher;
use crate::scrapers::extract;

/// Re-fetch each candidate's detail page and keep the ones still on the
/// market. Strictly sequential: validation fetches count against the same
/// abuse thresholds as crawling. A failed fetch aborts the whole pass.
pub async fn validate(
    fetcher: &dyn Fetcher,
    candidates: Vec<Listing>,
    delay: Duration,
) -> Result<Vec<Listing>> {
    let mut valid = Vec::new();

    for listing in candidates {
        info!("Validating listing: {}", listing.url);
        tokio::time::sleep(delay).await;

        let html = fetcher.fetch(&listing.url).await?;
        if extract::is_listing_active(&html) {
            info!("Listing was valid!");
            valid.push(listing);
        } else {
            info!("Listing was invalid!");
        }
    }

    Ok(valid)
}
