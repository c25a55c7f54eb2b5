use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use newsrag_core::config::SourceSettings;
use newsrag_core::traits::DocumentSource;
use newsrag_core::types::Document;
use newsrag_core::{Error, Result};

use crate::links::{extract_result_hrefs, select_links};

pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = concat!("newsrag/", env!("CARGO_PKG_VERSION"));
const TEXT_WIDTH: usize = 120;

/// Web search through an HTML results page plus page fetching.
pub struct WebSource {
    client: reqwest::Client,
    search_url: Url,
    settings: SourceSettings,
}

impl WebSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("http client: {e}")))?;
        let search_url = Url::parse(DEFAULT_SEARCH_URL).map_err(|e| Error::config(e.to_string()))?;
        Ok(Self { client, search_url, settings })
    }

    /// Point searches at another results page (a mirror or a local stub).
    pub fn with_search_url(mut self, search_url: &str) -> Result<Self> {
        self.search_url =
            Url::parse(search_url).map_err(|e| Error::config(format!("invalid search url '{search_url}': {e}")))?;
        Ok(self)
    }

    async fn get_text(&self, url: Url) -> Result<(String, bool)> {
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Source { message: format!("HTTP {status}"), retryable: retryable_status(status) });
        }
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.contains("html"));
        let body = response.text().await.map_err(transport)?;
        Ok((body, is_html))
    }

    async fn fetch_one(&self, url: &str) -> Result<Document> {
        let parsed = Url::parse(url).map_err(|e| Error::Source { message: format!("invalid url: {e}"), retryable: false })?;
        let (body, is_html) = self.get_text(parsed.clone()).await?;
        let text = if is_html { html_to_text(&body) } else { body };
        Ok(Document::new(document_id(&parsed), url, text))
    }
}

fn transport(e: reqwest::Error) -> Error {
    Error::Source { message: e.to_string(), retryable: e.is_timeout() || e.is_connect() || e.is_request() }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), TEXT_WIDTH).unwrap_or_else(|_| html.to_string())
}

/// Readable `host_path` slug plus a hash of the full URL, so pages that
/// differ only in their query string get distinct ids.
fn document_id(url: &Url) -> String {
    let raw = format!("{}{}", url.host_str().unwrap_or("page"), url.path());
    let slug: String = raw.chars().map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' }).collect();
    let digest = blake3::hash(url.as_str().as_bytes()).to_hex();
    format!("{}-{}", slug.trim_end_matches('_'), &digest.as_str()[..12])
}

#[async_trait]
impl DocumentSource for WebSource {
    async fn search(&self, topic: &str) -> Result<Vec<String>> {
        let mut url = self.search_url.clone();
        url.query_pairs_mut().append_pair("q", topic);
        let (body, _) = self.get_text(url).await?;
        let hrefs = extract_result_hrefs(&body)?;
        let raw: Vec<&str> = hrefs.iter().map(String::as_str).take(self.settings.max_results.max(1) * 4).collect();
        let links = select_links(raw, &self.settings.exclude_hosts, self.settings.max_results);
        info!(topic, results = links.len(), "web search");
        Ok(links)
    }

    /// Fetches concurrently; a page that fails is logged and skipped.
    async fn fetch(&self, urls: &[String]) -> Result<Vec<Document>> {
        let results = join_all(urls.iter().map(|u| self.fetch_one(u))).await;
        let mut documents = Vec::with_capacity(urls.len());
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(doc) if doc.raw_text.trim().is_empty() => warn!(url = %url, "page has no text"),
                Ok(doc) => {
                    debug!(url = %url, chars = doc.raw_text.chars().count(), "fetched page");
                    documents.push(doc);
                }
                Err(e) => warn!(url = %url, error = %e, "fetch failed"),
            }
        }
        Ok(documents)
    }
}
