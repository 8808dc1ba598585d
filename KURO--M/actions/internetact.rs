use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use thiserror::Error;

use crate::{
    actions::{Arguments, ToolResult},
    actuator::Actuator,
    arguments::{optional_text, required_text},
    capabilities::{CapabilityHandler, HandlerError},
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = "Mozilla/5.0";

static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex is valid"));

const COMMON_SITES: &[(&str, &str)] = &[
    ("youtube", "https://www.youtube.com"),
    ("google", "https://www.google.com"),
    ("wikipedia", "https://www.wikipedia.org"),
    ("github", "https://github.com"),
    ("reddit", "https://www.reddit.com"),
    ("stackoverflow", "https://stackoverflow.com"),
    ("bbc", "https://www.bbc.com/news"),
];

/// Page fetch failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport or decoding failure.
    #[error("fetch failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success status.
    #[error("fetch returned status {0}")]
    Status(u16),
}

/// Downloads HTML for `web_scrape`.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Returns the body of `url`.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// [`PageFetcher`] over reqwest with a short timeout.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    /// Creates the fetcher.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

fn google_search_url(query: &str) -> String {
    format!("https://www.google.com/search?q={}", urlencoding::encode(query))
}

/// `web_search`: opens a Google search in the browser.
pub struct WebSearchHandler {
    actuator: Arc<dyn Actuator>,
}

impl WebSearchHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }
}

#[async_trait]
impl CapabilityHandler for WebSearchHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let query = required_text(&arguments, "query")?;
        Ok(match self.actuator.open_url(&google_search_url(&query)).await {
            Ok(()) => ToolResult::success(format!("Searching for: {query}"))
                .with_natural_response("Let me search that for you! Opening browser..."),
            Err(err) => ToolResult::failure(err.to_string())
                .with_natural_response("Couldn't open the browser for search."),
        })
    }
}

/// `web_scrape`: opens a site (or searches within it) and reads its title.
pub struct WebScrapeHandler {
    actuator: Arc<dyn Actuator>,
    fetcher: Arc<dyn PageFetcher>,
}

impl WebScrapeHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { actuator, fetcher }
    }

    async fn search_site(&self, url: &str, query: &str) -> ToolResult {
        let (search_url, reply) = if url.contains("youtube") {
            (
                format!("{url}/results?search_query={}", urlencoding::encode(query)),
                format!("Opening YouTube search for '{query}'"),
            )
        } else {
            let domain = domain_of(url);
            (
                google_search_url(&format!("site:{domain} {query}")),
                format!("Searching {domain} for '{query}'"),
            )
        };
        match self.actuator.open_url(&search_url).await {
            Ok(()) => ToolResult::success(format!("Opened {search_url}")).with_natural_response(reply),
            Err(err) => ToolResult::failure(err.to_string())
                .with_natural_response("Couldn't open the browser for search."),
        }
    }
}

#[async_trait]
impl CapabilityHandler for WebScrapeHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let target = required_text(&arguments, "target")?;
        let url = resolve_site(&target);
        if let Some(query) = optional_text(&arguments, "query") {
            return Ok(self.search_site(&url, &query).await);
        }

        if let Err(err) = self.actuator.open_url(&url).await {
            tracing::warn!(error = %err, url = %url, "browser launch failed");
        }
        Ok(match self.fetcher.fetch(&url).await {
            Ok(body) => {
                let title = page_title(&body).unwrap_or_else(|| "the website".to_string());
                ToolResult::success(format!("Opened {url}"))
                    .with_data(json!({ "title": title, "url": url }))
                    .with_natural_response(format!("Opened {title} ({url})"))
            }
            Err(err) => ToolResult::failure(format!("Opened browser, but scrape failed: {err}"))
                .with_natural_response(format!("Opening {target} for you.")),
        })
    }
}

/// Maps a site name to a URL; full URLs pass through.
fn resolve_site(target: &str) -> String {
    if target.starts_with("http") {
        return target.to_string();
    }
    let lowered = target.to_lowercase();
    COMMON_SITES
        .iter()
        .find(|(name, _)| *name == lowered)
        .map_or_else(|| format!("https://www.{target}.com"), |(_, url)| (*url).to_string())
}

fn domain_of(url: &str) -> &str {
    let without_scheme = url.rsplit("//").next().unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

fn page_title(html: &str) -> Option<String> {
    let raw = TITLE.captures(html)?.get(1)?.as_str();
    let title = decode_entities(raw.split_whitespace().collect::<Vec<_>>().join(" ").as_str());
    (!title.is_empty()).then_some(title)
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offlineact::fakes::RecordingActuator;
    use serde_json::Value;

    struct StaticPage(Option<&'static str>);

    #[async_trait]
    impl PageFetcher for StaticPage {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            self.0.map(str::to_string).ok_or(FetchError::Status(503))
        }
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn resolves_common_sites_and_bare_names() {
        assert_eq!(resolve_site("YouTube"), "https://www.youtube.com");
        assert_eq!(resolve_site("bbc"), "https://www.bbc.com/news");
        assert_eq!(resolve_site("example"), "https://www.example.com");
        assert_eq!(resolve_site("https://docs.rs/x"), "https://docs.rs/x");
        assert_eq!(domain_of("https://www.bbc.com/news"), "www.bbc.com");
    }

    #[test]
    fn extracts_and_decodes_titles() {
        let html = "<html><head><TITLE lang=\"en\">\n  Rust &amp; Friends </TITLE></head></html>";
        assert_eq!(page_title(html).as_deref(), Some("Rust & Friends"));
        assert_eq!(page_title("<html></html>"), None);
    }

    #[tokio::test]
    async fn web_search_opens_encoded_query() {
        let actuator = Arc::new(RecordingActuator::default());
        let result = WebSearchHandler::new(actuator.clone())
            .invoke(args(json!({ "query": "rust async" })))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            actuator.calls(),
            vec!["open_url:https://www.google.com/search?q=rust%20async".to_string()]
        );
    }

    #[tokio::test]
    async fn scrape_with_query_searches_within_site() {
        let actuator = Arc::new(RecordingActuator::default());
        let handler = WebScrapeHandler::new(actuator.clone(), Arc::new(StaticPage(None)));
        let youtube = handler
            .invoke(args(json!({ "target": "youtube", "query": "lofi beats" })))
            .await
            .unwrap();
        assert_eq!(youtube.reply_text(), "Opening YouTube search for 'lofi beats'");
        let reddit = handler
            .invoke(args(json!({ "target": "reddit", "query": "rust" })))
            .await
            .unwrap();
        assert_eq!(reddit.reply_text(), "Searching www.reddit.com for 'rust'");
        assert_eq!(
            actuator.calls(),
            vec![
                "open_url:https://www.youtube.com/results?search_query=lofi%20beats".to_string(),
                "open_url:https://www.google.com/search?q=site%3Awww.reddit.com%20rust".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn scrape_without_query_reports_title() {
        let actuator = Arc::new(RecordingActuator::default());
        let page = StaticPage(Some("<title>GitHub</title>"));
        let result = WebScrapeHandler::new(actuator, Arc::new(page))
            .invoke(args(json!({ "target": "github" })))
            .await
            .unwrap();
        assert_eq!(result.reply_text(), "Opened GitHub (https://github.com)");
        assert_eq!(result.data.unwrap()["title"], "GitHub");
    }

    #[tokio::test]
    async fn scrape_fetch_failure_still_answers() {
        let actuator = Arc::new(RecordingActuator::default());
        let result = WebScrapeHandler::new(actuator, Arc::new(StaticPage(None)))
            .invoke(args(json!({ "target": "example" })))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.reply_text(), "Opening example for you.");
    }
}
