use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::Listing;

/// Collapse whitespace the way the site renders it: newlines dropped, runs
/// of spaces reduced to one, ends trimmed.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold accented characters to base Latin so listing URLs compare stably
/// across encodings. The site occasionally emits `¡` where an `i` belongs.
pub fn normalize_url(url: &str) -> String {
    url.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c == '¡' { 'i' } else { c })
        .collect()
}

/// Extract every listing container of a rendered category page, in document
/// order. Containers without a detail link or a parsable identifier are
/// skipped; missing optional fields come back as empty strings, never as an
/// error.
pub fn extract_listings(html: &str, base_url: &str, id_pattern: &Regex) -> Vec<Listing> {
    let document = Html::parse_document(html);

    let container_sel = Selector::parse(".property-grid > div").unwrap();
    let details_sel = Selector::parse(".property-details").unwrap();
    let link_sel = Selector::parse(".property-image > a").unwrap();
    let title_sel = Selector::parse(".property-details > a").unwrap();
    let price_sel = Selector::parse(".property-details > h6").unwrap();
    let item_sel = Selector::parse(".property-details > ul > li").unwrap();
    let icon_sel = Selector::parse("img").unwrap();
    let desc_sel = Selector::parse(".property-details > span").unwrap();

    let mut listings = Vec::new();

    for container in document.select(&container_sel) {
        // grid decoration and ad slots carry no details block
        if container.select(&details_sel).next().is_none() {
            continue;
        }

        let Some(href) = container
            .select(&link_sel)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            debug!("Listing container without a detail link, skipping");
            continue;
        };

        let absolute = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{base_url}{href}")
        };
        let url = normalize_url(&absolute);
        let path = path_of(&url).to_string();

        let Some(external_id) = extract_id(&path, id_pattern) else {
            debug!("Listing path without an identifier, skipping: {path}");
            continue;
        };

        let mut size = String::new();
        let mut year = String::new();
        let mut floors = String::new();
        for item in container.select(&item_sel) {
            let Some(icon) = item
                .select(&icon_sel)
                .next()
                .and_then(|img| img.value().attr("src"))
            else {
                continue;
            };
            let text = item.text().collect::<String>();
            if icon.ends_with("velikost.svg") {
                size = text;
            } else if icon.ends_with("leto.svg") {
                year = text;
            } else if icon.ends_with("nadstropje.svg") {
                floors = text;
            }
        }

        listings.push(Listing {
            title: clean_text(&text_of(container, &title_sel)),
            price: text_of(container, &price_sel),
            size,
            year,
            floors,
            description: clean_text(&text_of(container, &desc_sel)),
            url,
            path,
            external_id,
            scraped_at: Utc::now(),
        });
    }

    listings
}

/// True iff the next-page control is the first child of the pagination list.
pub fn has_next_page(html: &str) -> bool {
    let document = Html::parse_document(html);
    let first_item = Selector::parse("#pagination > ul > li:first-child").unwrap();

    document
        .select(&first_item)
        .next()
        .map(|item| item.value().classes().any(|class| class == "paging_next"))
        .unwrap_or(false)
}

/// True iff a detail page still shows a price with the currency symbol.
/// The site exposes no explicit sold/removed marker; a missing price is the
/// only liveness signal there is.
pub fn is_listing_active(html: &str) -> bool {
    let document = Html::parse_document(html);
    let price = Selector::parse(".cena > span").unwrap();

    document
        .select(&price)
        .any(|element| element.text().collect::<String>().contains('€'))
}

fn text_of(container: ElementRef<'_>, selector: &Selector) -> String {
    container
        .select(selector)
        .next()
        .map(|element| element.text().collect::<String>())
        .unwrap_or_default()
}

fn extract_id(path: &str, id_pattern: &Regex) -> Option<u64> {
    id_pattern
        .captures(path)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

fn path_of(url: &str) -> &str {
    let rest = url.splitn(2, "://").nth(1).unwrap_or(url);
    match rest.find('/') {
        Some(index) => &rest[index..],
        None => "",
    }
}
