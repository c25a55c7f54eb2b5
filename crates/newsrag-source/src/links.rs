//! Result-page link extraction and selection.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use newsrag_core::{Error, Result};

const RESULT_SELECTOR: &str = "a.result__a";
const REDIRECT_PARAM: &str = "uddg";

/// Raw `href`s of result anchors, in page order. Falls back to every
/// anchor when the page carries no result markup.
pub fn extract_result_hrefs(html: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let results = Selector::parse(RESULT_SELECTOR).map_err(|e| Error::config(format!("bad selector: {e}")))?;
    let anchors = Selector::parse("a[href]").map_err(|e| Error::config(format!("bad selector: {e}")))?;

    let mut hrefs: Vec<String> =
        document.select(&results).filter_map(|a| a.value().attr("href")).map(str::to_string).collect();
    if hrefs.is_empty() {
        hrefs = document.select(&anchors).filter_map(|a| a.value().attr("href")).map(str::to_string).collect();
    }
    Ok(hrefs)
}

/// Resolve a result href to the target page: protocol-relative links get
/// `https:`, redirect wrappers are unwrapped. Only http(s) URLs survive.
pub fn normalize_link(href: &str) -> Option<Url> {
    let href = href.trim();
    let absolute = if href.starts_with("//") { format!("https:{href}") } else { href.to_string() };
    let mut url = Url::parse(&absolute).ok()?;
    if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == REDIRECT_PARAM) {
        url = Url::parse(&target).ok()?;
    }
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url),
        _ => None,
    }
}

/// Normalize, drop excluded hosts and duplicates, keep at most `max_links`.
pub fn select_links<'a>(hrefs: impl IntoIterator<Item = &'a str>, exclude_hosts: &[String], max_links: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    hrefs
        .into_iter()
        .filter_map(normalize_link)
        .filter(|url| {
            let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
            !exclude_hosts.iter().any(|ex| host.contains(&ex.to_ascii_lowercase()))
        })
        .map(String::from)
        .filter(|link| seen.insert(link.clone()))
        .take(max_links)
        .collect()
}
