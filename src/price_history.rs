//! Paginated spot-price-history extraction.
//!
//! The provider only reports price *changes*. A window is fetched by issuing
//! one query and following continuation tokens until the provider stops
//! returning one; pages are concatenated in provider order.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::window::PriceWindow;

pub const DEFAULT_INSTANCE_TYPE: &str = "c4.8xlarge";
pub const DEFAULT_AVAILABILITY_ZONE: &str = "us-west-2a";
pub const DEFAULT_PRODUCT_DESCRIPTION: &str = "Linux/UNIX";

/// One observed price change as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChangeEvent {
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Decimal string exactly as the provider returned it.
    #[serde(rename = "SpotPrice")]
    pub price: String,
    #[serde(rename = "InstanceType")]
    pub instance_class: String,
    #[serde(
        rename = "AvailabilityZone",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub availability_zone: Option<String>,
    #[serde(
        rename = "ProductDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub product_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistoryFilters {
    pub instance_type: String,
    pub availability_zone: String,
    pub product_description: String,
}

impl Default for PriceHistoryFilters {
    fn default() -> Self {
        Self {
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            availability_zone: DEFAULT_AVAILABILITY_ZONE.to_string(),
            product_description: DEFAULT_PRODUCT_DESCRIPTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    pub max_page_size: u32,
    /// Upper bound on followed pages; `None` trusts the provider to stop.
    pub max_pages: Option<u32>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_page_size: 1_000,
            max_pages: Some(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceHistoryQuery {
    pub filters: PriceHistoryFilters,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_page_size: u32,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistoryPage {
    #[serde(rename = "SpotPriceHistory")]
    pub events: Vec<PriceChangeEvent>,
    #[serde(rename = "NextToken", default)]
    pub next_token: Option<String>,
}

/// Everything the provider returned for one window, in provider order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWindow {
    pub window: PriceWindow,
    pub events: Vec<PriceChangeEvent>,
    pub pages: u32,
}

impl RawWindow {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Record list persisted as the audit trail, indented by four spaces.
    pub fn to_audit_json(&self) -> Result<String, serde_json::Error> {
        let mut out = Vec::with_capacity(self.events.len() * 192);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.events.serialize(&mut serializer)?;
        String::from_utf8(out).map_err(|err| {
            <serde_json::Error as serde::ser::Error>::custom(err.to_string())
        })
    }
}

#[derive(Debug, Error)]
pub enum PriceHistoryServiceError {
    #[error("HTTP client build error: {0}")]
    ClientBuild(String),
    #[error("invalid price history endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },
    #[error("HTTP request failed for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("price history gateway returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("unexpected price history payload: {0}")]
    Decode(String),
}

impl PriceHistoryServiceError {
    /// Transport failures, throttling and server errors; never client errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("price history extraction failed for window {start} - {end} on page {page}: {source}")]
    Extraction {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: u32,
        #[source]
        source: PriceHistoryServiceError,
    },
    #[error("price history extraction for window {start} - {end} exceeded {max_pages} pages")]
    PageLimitExceeded {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_pages: u32,
    },
}

/// The provider's paginated price-history query.
pub trait PriceHistoryService: Send + Sync {
    fn query(&self, query: &PriceHistoryQuery) -> Result<PriceHistoryPage, PriceHistoryServiceError>;
}

pub fn fetch_price_window(
    service: &dyn PriceHistoryService,
    filters: &PriceHistoryFilters,
    window: &PriceWindow,
    cfg: &FetchConfig,
) -> Result<RawWindow, FetchError> {
    info!(
        component = "price_history",
        event = "price_history.fetch.start",
        window_start = %window.start(),
        window_end = %window.end(),
        instance_type = %filters.instance_type,
        availability_zone = %filters.availability_zone
    );

    let mut query = PriceHistoryQuery {
        filters: filters.clone(),
        start: window.start(),
        end: window.end(),
        max_page_size: cfg.max_page_size,
        next_token: None,
    };
    let mut events = Vec::new();
    let mut pages = 0u32;

    loop {
        let page = service
            .query(&query)
            .map_err(|source| FetchError::Extraction {
                start: window.start(),
                end: window.end(),
                page: pages,
                source,
            })?;
        pages = pages.saturating_add(1);

        debug!(
            component = "price_history",
            event = "price_history.fetch.page",
            page = pages,
            records = page.events.len(),
            has_next = page.next_token.is_some()
        );

        let mut page_events = page.events;
        events.append(&mut page_events);

        // The provider marks the last page with an absent or empty token.
        let next_token = page.next_token.filter(|token| !token.is_empty());
        let Some(token) = next_token else {
            break;
        };

        if let Some(max_pages) = cfg.max_pages {
            if pages >= max_pages {
                warn!(
                    component = "price_history",
                    event = "price_history.fetch.page_limit",
                    window_start = %window.start(),
                    max_pages
                );
                return Err(FetchError::PageLimitExceeded {
                    start: window.start(),
                    end: window.end(),
                    max_pages,
                });
            }
        }
        query.next_token = Some(token);
    }

    if events.is_empty() {
        warn!(
            component = "price_history",
            event = "price_history.fetch.empty",
            window_start = %window.start(),
            window_end = %window.end()
        );
    }

    info!(
        component = "price_history",
        event = "price_history.fetch.finish",
        window_start = %window.start(),
        pages,
        records = events.len()
    );

    Ok(RawWindow {
        window: *window,
        events,
        pages,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpServiceConfig {
    pub endpoint: String,
    pub http_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl HttpServiceConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http_timeout_ms: 15_000,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

/// JSON-over-HTTP gateway in front of the provider's price-history API.
pub struct HttpPriceHistoryService {
    client: reqwest::blocking::Client,
    cfg: HttpServiceConfig,
}

impl HttpPriceHistoryService {
    pub fn new(cfg: HttpServiceConfig) -> Result<Self, PriceHistoryServiceError> {
        Url::parse(&cfg.endpoint).map_err(|err| PriceHistoryServiceError::InvalidEndpoint {
            endpoint: cfg.endpoint.clone(),
            message: err.to_string(),
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .map_err(|err| PriceHistoryServiceError::ClientBuild(err.to_string()))?;
        Ok(Self { client, cfg })
    }

    fn get_page(&self, url: &Url) -> Result<Vec<u8>, PriceHistoryServiceError> {
        let response =
            self.client
                .get(url.clone())
                .send()
                .map_err(|err| PriceHistoryServiceError::Transport {
                    url: url.to_string(),
                    message: err.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PriceHistoryServiceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| PriceHistoryServiceError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

impl PriceHistoryService for HttpPriceHistoryService {
    fn query(&self, query: &PriceHistoryQuery) -> Result<PriceHistoryPage, PriceHistoryServiceError> {
        let url = query_url(&self.cfg.endpoint, query)?;
        let body = retry(&self.cfg, || self.get_page(&url))?;
        decode_page(&body)
    }
}

fn query_url(endpoint: &str, query: &PriceHistoryQuery) -> Result<Url, PriceHistoryServiceError> {
    let mut params = vec![
        ("InstanceType", query.filters.instance_type.clone()),
        ("AvailabilityZone", query.filters.availability_zone.clone()),
        (
            "ProductDescription",
            query.filters.product_description.clone(),
        ),
        (
            "StartTime",
            query.start.to_rfc3339_opts(SecondsFormat::Micros, true),
        ),
        (
            "EndTime",
            query.end.to_rfc3339_opts(SecondsFormat::Micros, true),
        ),
        ("MaxResults", query.max_page_size.to_string()),
    ];
    if let Some(token) = &query.next_token {
        params.push(("NextToken", token.clone()));
    }

    Url::parse_with_params(endpoint, &params).map_err(|err| {
        PriceHistoryServiceError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    })
}

fn decode_page(body: &[u8]) -> Result<PriceHistoryPage, PriceHistoryServiceError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| PriceHistoryServiceError::Decode(err.to_string()))?;
    if !value.is_object() {
        return Err(PriceHistoryServiceError::Decode(
            "expected a JSON object with SpotPriceHistory".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|err| PriceHistoryServiceError::Decode(err.to_string()))
}

fn retry<T>(
    cfg: &HttpServiceConfig,
    mut f: impl FnMut() -> Result<T, PriceHistoryServiceError>,
) -> Result<T, PriceHistoryServiceError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries || !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                debug!(
                    component = "price_history",
                    event = "price_history.http.retry",
                    attempt,
                    sleep_ms,
                    error = %err
                );
                std::thread::sleep(Duration::from_millis(sleep_ms));
            }
        }
    }
}
