use std::collections::HashSet;
use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use feed_rs::parser;
use log::{debug, warn};
use reqwest::Client;

use crate::config::FeedConfig;
use crate::error::{DigestError, Result};
use crate::models::Article;

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Total per-request timeout in seconds. Keeps a stalled remote host from
/// blocking future scheduled firings.
const TOTAL_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = concat!("newsdigest/", env!("CARGO_PKG_VERSION"));

/// Fetches and parses one feed source. Seam for deterministic tests.
pub trait FeedFetch {
    fn fetch(
        &self,
        feed: &FeedConfig,
    ) -> impl Future<Output = Result<feed_rs::model::Feed>> + Send;
}

/// HTTP-backed fetcher with bounded timeouts.
pub struct Collector {
    client: Client,
}

impl Collector {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(StdDuration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(StdDuration::from_secs(TOTAL_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DigestError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }
}

impl FeedFetch for Collector {
    async fn fetch(&self, feed: &FeedConfig) -> Result<feed_rs::model::Feed> {
        debug!("Fetching feed {}", feed.url);
        let fetch_err = |reason: String| DigestError::Fetch {
            url: feed.url.clone(),
            reason,
        };
        let response = self
            .client
            .get(&feed.url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP status {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        parser::parse(&bytes[..]).map_err(|e| fetch_err(e.to_string()))
    }
}

fn published_at(entry: &feed_rs::model::Entry) -> Option<DateTime<Utc>> {
    entry.published.or(entry.updated)
}

/// Fetch entries from the given feeds, keeping those published within the
/// lookback window.
///
/// A source that fails to fetch or parse is logged and skipped; partial
/// failure never fails the collection. Entries without a resolvable
/// timestamp or link are dropped, duplicates (by exact link) keep the first
/// occurrence in source order, and the result is sorted newest-first.
/// `now` defaults to the current instant; tests inject a fixed one.
pub async fn collect<F: FeedFetch>(
    fetcher: &F,
    feeds: &[&FeedConfig],
    window: Duration,
    now: Option<DateTime<Utc>>,
) -> Vec<Article> {
    let now = now.unwrap_or_else(Utc::now);
    let mut articles: Vec<Article> = Vec::new();
    let mut seen_links: HashSet<String> = HashSet::new();

    for feed in feeds {
        let parsed = match fetcher.fetch(feed).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping feed '{}': {}", feed.id, e);
                continue;
            }
        };
        for entry in parsed.entries {
            let Some(published) = published_at(&entry) else {
                continue;
            };
            if now.signed_duration_since(published) > window {
                continue;
            }
            let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
                continue;
            };
            if !seen_links.insert(link.clone()) {
                continue;
            }
            articles.push(Article {
                feed_id: feed.id.clone(),
                feed_name: feed.name.clone(),
                title: entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string()),
                link,
                summary: entry.summary.map(|t| t.content),
                published,
            });
        }
    }

    articles.sort_by(|a, b| b.published.cmp(&a.published));
    articles
}
