//! Media link extraction from third-party embed pages.
//!
//! Scraping is kept apart from the relay core: an [`Extractor`] turns a page
//! URL into a media URL, and the relay only ever sees the result.

use crate::error::{RelayError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::HeaderMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Absolute `.m3u8` URLs, optionally with a query string.
static M3U8_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>\\]+?\.m3u8(?:\?[^\s"'<>\\]*)?"#).expect("static regex")
});

/// Something that can find a media URL behind a web page.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn id(&self) -> &'static str;

    /// Whether this extractor knows how to handle `page`.
    fn handles(&self, page: &Url) -> bool;

    /// Fetch `page` with `headers` and return the media URL it embeds.
    async fn extract(&self, client: &Client, page: &Url, headers: HeaderMap) -> Result<Url>;
}

/// Ordered set of extractors; the first one that handles a page wins.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in extractors.
    pub fn with_defaults(timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmbeddedManifestExtractor::new(timeout)));
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    pub fn find(&self, page: &Url) -> Option<Arc<dyn Extractor>> {
        self.extractors.iter().find(|e| e.handles(page)).cloned()
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

/// Finds the first absolute `.m3u8` link in a page's HTML or inline scripts.
#[derive(Debug, Clone)]
pub struct EmbeddedManifestExtractor {
    timeout: Duration,
}

impl EmbeddedManifestExtractor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Extractor for EmbeddedManifestExtractor {
    fn id(&self) -> &'static str {
        "embedded-manifest"
    }

    fn handles(&self, page: &Url) -> bool {
        matches!(page.scheme(), "http" | "https")
    }

    async fn extract(&self, client: &Client, page: &Url, headers: HeaderMap) -> Result<Url> {
        info!("Extracting media link from {}", page);

        let response = client
            .get(page.clone())
            .headers(headers)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamStatus(status));
        }

        let html = response.text().await?;
        let media = find_manifest_url(&html)
            .ok_or_else(|| RelayError::Extraction(format!("no media link found in {page}")))?;

        debug!("Found media link {} in {}", media, page);
        Ok(media)
    }
}

/// First absolute `.m3u8` URL in `html`, accepting JSON-escaped slashes.
pub fn find_manifest_url(html: &str) -> Option<Url> {
    let html = html.replace("\\/", "/");
    M3U8_URL
        .find_iter(&html)
        .find_map(|m| Url::parse(m.as_str()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn finds_plain_link() {
        let html = r#"<video><source src="https://cdn.example/hls/master.m3u8?t=1&e=2" type="application/x-mpegURL"></video>"#;
        assert_eq!(
            find_manifest_url(html).unwrap().as_str(),
            "https://cdn.example/hls/master.m3u8?t=1&e=2"
        );
    }

    #[test]
    fn finds_link_in_escaped_json() {
        let html = r#"<script>var player = {"file":"https:\/\/edge.example\/v\/index.m3u8"};</script>"#;
        assert_eq!(
            find_manifest_url(html).unwrap().as_str(),
            "https://edge.example/v/index.m3u8"
        );
    }

    #[test]
    fn first_link_wins() {
        let html = "sources: ['https://a.example/1.m3u8', 'https://b.example/2.m3u8']";
        assert_eq!(find_manifest_url(html).unwrap().host_str(), Some("a.example"));
    }

    #[test]
    fn no_link_is_none() {
        assert!(find_manifest_url("<html><body>video.mp4</body></html>").is_none());
        assert!(find_manifest_url("/relative/index.m3u8").is_none());
    }

    #[test]
    fn registry_picks_first_handler() {
        let registry = ExtractorRegistry::with_defaults(Duration::from_secs(5));
        assert_eq!(registry.len(), 1);

        let page = Url::parse("https://embed.example/e/abc").unwrap();
        assert_eq!(registry.find(&page).unwrap().id(), "embedded-manifest");

        let ftp = Url::parse("ftp://embed.example/e/abc").unwrap();
        assert!(registry.find(&ftp).is_none());
    }

    #[tokio::test]
    async fn extracts_from_served_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/e/abc"))
            .and(header("referer", "https://embed.example/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<script>sources:[{file:"https://cdn.example/x/master.m3u8"}]</script>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("referer", "https://embed.example/".parse().unwrap());

        let page = Url::parse(&format!("{}/e/abc", server.uri())).unwrap();
        let media = EmbeddedManifestExtractor::new(Duration::from_secs(5))
            .extract(&Client::new(), &page, headers)
            .await
            .unwrap();
        assert_eq!(media.as_str(), "https://cdn.example/x/master.m3u8");
    }

    #[tokio::test]
    async fn page_without_media_is_extraction_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>removed</p>"))
            .mount(&server)
            .await;

        let page = Url::parse(&format!("{}/e/gone", server.uri())).unwrap();
        let err = EmbeddedManifestExtractor::new(Duration::from_secs(5))
            .extract(&Client::new(), &page, HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Extraction(_)));
    }
}
