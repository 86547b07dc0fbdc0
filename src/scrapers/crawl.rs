use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::models::{category_token, Listing, Source};
use crate::scrapers::browser::Fetcher;
use crate::scrapers::extract;

/// Crawl every listing page of a source, first page to last.
///
/// Results keep document order within a page and page order across pages.
/// Pagination is driven by the next-page control alone; `max_pages_per_source`
/// bounds a malformed control that never disappears.
pub async fn crawl_source(
    fetcher: &dyn Fetcher,
    source: &Source,
    config: &AppConfig,
) -> Result<Vec<Listing>> {
    let mut listings = Vec::new();
    let mut page = 1usize;

    loop {
        let url = page_url(source, &config.base_url, page);
        let html = fetcher.fetch(&url).await?;

        let mut skipped = 0usize;
        for listing in extract::extract_listings(&html, &config.base_url, &config.id_pattern) {
            match category_token(&listing.path, &config.category_pattern) {
                Some(category) if category == source.category => {
                    info!(
                        "Listing found: {}, {}, {}, {}",
                        listing.title, listing.price, listing.size, listing.path
                    );
                    listings.push(listing);
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("Page {page} of {}: {skipped} listings outside category", source.url);
        }

        if !extract::has_next_page(&html) {
            break;
        }
        if page >= config.max_pages_per_source {
            warn!(
                "Stopping {} at page {page}: page cap reached while a next-page control is still present",
                source.url
            );
            break;
        }

        info!("Parsing next page!");
        tokio::time::sleep(config.page_delay).await;
        page += 1;
    }

    Ok(listings)
}

/// Page 1 is the source URL itself; deeper pages append `<n>/` to it.
fn page_url(source: &Source, base_url: &str, page: usize) -> String {
    if page > 1 {
        format!("{}{}{}/", base_url, source.path, page)
    } else {
        format!("{}{}", base_url, source.path)
    }
}
