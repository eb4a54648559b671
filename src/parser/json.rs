use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use url::Url;

use crate::app::{NovelSyncError, Result};
use crate::config::SiteConfig;
use crate::domain::ProxyConfig;
use crate::parser::{ParsedNovel, SiteParser};

/// Fetches novels from an endpoint that already serves them as JSON
/// (`{"title": ..., "chapters": [{"title": ..., "content": ...}]}`).
///
/// The site's `url` is a template; `{id}` is replaced with the novel id.
pub struct JsonSiteParser {
    client: Client,
    url_template: String,
    requests_for_book: AtomicUsize,
}

impl JsonSiteParser {
    pub fn new(site: &SiteConfig, proxy: &ProxyConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("novelsync/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy_url) = proxy.active_url() {
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            url_template: site.url.clone(),
            requests_for_book: AtomicUsize::new(0),
        })
    }

    pub fn detail_url(&self, novel_id: &str) -> Result<Url> {
        let raw = if self.url_template.contains("{id}") {
            self.url_template.replace("{id}", novel_id)
        } else {
            format!("{}/{}", self.url_template.trim_end_matches('/'), novel_id)
        };
        Ok(Url::parse(&raw)?)
    }
}

#[async_trait]
impl SiteParser for JsonSiteParser {
    fn name(&self) -> &str {
        "json"
    }

    fn reset_per_book_state(&self) {
        self.requests_for_book.store(0, Ordering::SeqCst);
    }

    async fn parse_novel_detail(&self, novel_id: &str) -> Result<ParsedNovel> {
        let url = self.detail_url(novel_id)?;
        let attempt = self.requests_for_book.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Fetching {} (request {} for this book)", url, attempt);

        let response = self.client.get(url).send().await?;
        response.error_for_status_ref()?;

        let body = response.text().await?;
        decode_novel(novel_id, &body)
    }
}

fn decode_novel(novel_id: &str, body: &str) -> Result<ParsedNovel> {
    let novel: ParsedNovel = serde_json::from_str(body)?;
    if novel.title.trim().is_empty() {
        return Err(NovelSyncError::Parser(format!(
            "novel {} has no title",
            novel_id
        )));
    }
    Ok(novel)
}
