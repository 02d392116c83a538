//! # Hazard Feeds
//!
//! Each upstream feed is a [`Source`]: it knows its tag, its URL, where the
//! record array lives in the parsed document, and how to turn one record into
//! a [`CanonicalEvent`]. Malformed records normalize to `None` and are skipped;
//! nothing a feed sends can abort a batch.
//!
//! Fetching is behind [`FeedClient`] so the station can run against canned
//! documents in tests. [`FeedFetcher`] is the HTTPS implementation (feature
//! `feeds`).

pub mod eonet;
pub mod gdacs;
pub mod noaa;
pub mod usgs;

use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::FeedsConfig;
use crate::event::CanonicalEvent;
use crate::metrics;
use crate::system::Watchdog;

pub use eonet::EonetSource;
pub use gdacs::GdacsSource;
pub use noaa::NoaaSource;
pub use usgs::UsgsSource;

/// Hard ceiling on records taken from one source per fetch cycle.
pub const MAX_RECORDS_PER_SOURCE: usize = 5;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("payload of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no document for {0}")]
    NotFound(String),
}

/// One upstream feed.
pub trait Source: Send + Sync {
    /// Id prefix and log tag, e.g. `usgs`.
    fn tag(&self) -> &'static str;
    fn url(&self) -> &str;

    /// The record array inside a parsed document. GeoJSON `features` by default.
    fn records<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        doc.get("features")
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default()
    }

    fn normalize(&self, record: &Value) -> Option<CanonicalEvent>;
}

/// `"<tag>_<raw>"`, or `"<tag>_unknown"` when the record has no usable id.
/// Records without ids therefore alias each other.
pub(crate) fn source_id(tag: &str, raw: Option<String>) -> String {
    match raw {
        Some(raw) => format!("{}_{}", tag, raw),
        None => format!("{}_unknown", tag),
    }
}

/// Non-empty trimmed string, or a number rendered as text.
pub(crate) fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Normalize at most `cap` records (never more than [`MAX_RECORDS_PER_SOURCE`]).
/// Skipped records count against the cap.
pub fn normalize_batch(
    source: &dyn Source,
    doc: &Value,
    cap: usize,
    watchdog: &dyn Watchdog,
) -> Vec<CanonicalEvent> {
    let cap = cap.min(MAX_RECORDS_PER_SOURCE);
    let records = source.records(doc);
    debug!("[{}] {} records in document", source.tag().to_uppercase(), records.len());
    let mut events = Vec::with_capacity(cap);
    for record in records.into_iter().take(cap) {
        watchdog.feed();
        match source.normalize(record) {
            Some(event) => events.push(event),
            None => {
                metrics::inc_records_skipped();
                debug!("[{}] skipped malformed record", source.tag().to_uppercase());
            }
        }
    }
    events
}

/// Fetches a JSON document.
#[allow(async_fn_in_trait)]
pub trait FeedClient {
    async fn fetch_json(&mut self, url: &str) -> Result<Value, FetchError>;
}

/// Serves fixed documents by URL. Unknown URLs fail with `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct CannedFeeds {
    docs: HashMap<String, Value>,
    requests: Vec<String>,
}

impl CannedFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &str, doc: Value) {
        self.docs.insert(url.to_string(), doc);
    }

    pub fn remove(&mut self, url: &str) {
        self.docs.remove(url);
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> &[String] {
        &self.requests
    }
}

impl FeedClient for CannedFeeds {
    async fn fetch_json(&mut self, url: &str) -> Result<Value, FetchError> {
        self.requests.push(url.to_string());
        self.docs
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

/// HTTPS feed client with a request timeout, a limited redirect policy, a
/// body-size cap and a minimum gap between requests.
#[cfg(feature = "feeds")]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: u64,
    min_gap: Duration,
    last_request: Option<tokio::time::Instant>,
}

#[cfg(feature = "feeds")]
impl FeedFetcher {
    pub fn new(config: &FeedsConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.http_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent(concat!("disaster-alert/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self {
            client,
            timeout,
            max_body_bytes: config.max_body_bytes,
            min_gap: Duration::from_millis(config.min_request_gap_ms),
            last_request: None,
        })
    }
}

#[cfg(feature = "feeds")]
impl FeedClient for FeedFetcher {
    async fn fetch_json(&mut self, url: &str) -> Result<Value, FetchError> {
        if let Some(last) = self.last_request {
            let since = last.elapsed();
            if since < self.min_gap {
                tokio::time::sleep(self.min_gap - since).await;
            }
        }
        self.last_request = Some(tokio::time::Instant::now());
        debug!("[FEED] GET {}", url);

        let request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        let mut response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Http(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(FetchError::TooLarge {
                    size: len,
                    limit: self.max_body_bytes,
                });
            }
        }

        // Content-Length may be absent or wrong; enforce the cap while reading.
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                warn!("[FEED] {} body exceeded {} bytes, discarding", url, self.max_body_bytes);
                return Err(FetchError::TooLarge {
                    size: (body.len() + chunk.len()) as u64,
                    limit: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        debug!("[FEED] received {} bytes from {}", body.len(), url);
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Enabled sources in processing order: seismic, multi-hazard, catalogue,
/// space weather.
pub fn configured_sources(config: &FeedsConfig) -> Vec<Box<dyn Source>> {
    let mut sources: Vec<Box<dyn Source>> = Vec::new();
    if config.usgs.enabled {
        sources.push(Box::new(UsgsSource::new(config.usgs.url_or(usgs::DEFAULT_URL))));
    }
    if config.gdacs.enabled {
        sources.push(Box::new(GdacsSource::new(config.gdacs.url_or(gdacs::DEFAULT_URL))));
    }
    if config.eonet.enabled {
        sources.push(Box::new(EonetSource::new(config.eonet.url_or(eonet::DEFAULT_URL))));
    }
    if config.noaa.enabled {
        sources.push(Box::new(NoaaSource::new(config.noaa.url_or(noaa::DEFAULT_URL))));
    }
    sources
}
