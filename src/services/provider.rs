use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use quick_xml::events::Event;
use reqwest::Client;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::retry::{retry_with_backoff, RetryPolicy};

const USER_AGENT: &str = concat!("plans-service/", env!("CARGO_PKG_VERSION"));
const ACCEPT_XML: &str = "application/xml, text/xml";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCause {
    Network,
    Timeout,
    Dns,
    /// 5xx from the provider.
    ServerError(u16),
    /// Any other non-success status (4xx, unexpected 3xx/1xx).
    HttpStatus(u16),
}

impl fmt::Display for FetchCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchCause::Network => write!(f, "network"),
            FetchCause::Timeout => write!(f, "timeout"),
            FetchCause::Dns => write!(f, "dns"),
            FetchCause::ServerError(status) => write!(f, "http {}", status),
            FetchCause::HttpStatus(status) => write!(f, "http {}", status),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider fetch failed ({cause}): {message}")]
    Fetch { cause: FetchCause, message: String },

    #[error("malformed provider feed: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Network, timeout, DNS and 5xx failures are worth another attempt.
    /// Client errors and malformed feeds are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Fetch { cause, .. } => !matches!(cause, FetchCause::HttpStatus(_)),
            ProviderError::Parse(_) => false,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let cause = if err.is_timeout() {
            FetchCause::Timeout
        } else if is_dns_failure(&err) {
            FetchCause::Dns
        } else {
            FetchCause::Network
        };

        ProviderError::Fetch {
            cause,
            message: err.to_string(),
        }
    }
}

/// reqwest has no dedicated flag for resolver failures; look through the source chain.
fn is_dns_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let msg = e.to_string().to_lowercase();
        if msg.contains("dns error") || msg.contains("failed to lookup address") {
            return true;
        }
        current = e.source();
    }
    false
}

// ============================================================================
// Raw feed types
// ============================================================================

/// Validated provider payload: the `planList.output.base_plan` collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFeed {
    pub base_plans: Vec<RawBasePlan>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawBasePlan {
    #[serde(rename = "@base_plan_id")]
    pub base_plan_id: Option<String>,
    #[serde(rename = "@sell_mode")]
    pub sell_mode: Option<String>,
    #[serde(rename = "@title")]
    pub title: Option<String>,
    #[serde(rename = "@organizer_company_id")]
    pub organizer_company_id: Option<String>,
    #[serde(rename = "plan", default)]
    pub plans: Vec<RawPlan>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPlan {
    #[serde(rename = "@plan_id")]
    pub plan_id: Option<String>,
    #[serde(rename = "@plan_start_date")]
    pub plan_start_date: Option<String>,
    #[serde(rename = "@plan_end_date")]
    pub plan_end_date: Option<String>,
    #[serde(rename = "@sell_from")]
    pub sell_from: Option<String>,
    #[serde(rename = "@sell_to")]
    pub sell_to: Option<String>,
    #[serde(rename = "@sold_out")]
    pub sold_out: Option<String>,
    #[serde(rename = "zone", default)]
    pub zones: Vec<RawZone>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawZone {
    #[serde(rename = "@zone_id")]
    pub zone_id: Option<String>,
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@capacity")]
    pub capacity: Option<String>,
    #[serde(rename = "@price")]
    pub price: Option<String>,
    #[serde(rename = "@numbered")]
    pub numbered: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlanListDocument {
    output: Option<OutputElement>,
}

#[derive(Debug, Deserialize)]
struct OutputElement {
    #[serde(rename = "base_plan", default)]
    base_plans: Vec<RawBasePlan>,
}

/// Parse and structurally validate a provider response body.
///
/// The document root must be `planList` with an `output` child. An `output`
/// without `base_plan` entries is a legitimate empty feed.
pub fn parse_feed(body: &str) -> Result<RawFeed, ProviderError> {
    let root = root_element_name(body)?;
    if root != "planList" {
        return Err(ProviderError::Parse(format!(
            "unexpected root element <{}>",
            root
        )));
    }

    let document: PlanListDocument =
        quick_xml::de::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let output = document.output.ok_or_else(|| {
        ProviderError::Parse("missing required planList.output element".to_string())
    })?;

    if output.base_plans.is_empty() {
        tracing::warn!("Provider response contains no plans");
    }

    Ok(RawFeed {
        base_plans: output.base_plans,
    })
}

fn root_element_name(body: &str) -> Result<String, ProviderError> {
    let mut reader = quick_xml::Reader::from_str(body);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => {
                return Err(ProviderError::Parse(
                    "document has no root element".to_string(),
                ))
            }
            Ok(_) => continue,
            Err(e) => return Err(ProviderError::Parse(e.to_string())),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Source of raw plan feeds. Implemented by the HTTP client; tests plug in
/// in-memory feeds.
#[async_trait]
pub trait PlanFeed: Send + Sync {
    async fn fetch(&self) -> Result<RawFeed, ProviderError>;

    /// Whether the upstream currently answers at all.
    async fn health_check(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ProviderClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        Self::with_settings(
            &config.provider.url,
            Duration::from_millis(config.provider.timeout_ms),
            RetryPolicy::new(
                config.provider.retries,
                Duration::from_millis(config.provider.backoff_base_ms),
            ),
        )
    }

    pub fn with_settings(url: &str, timeout: Duration, retry: RetryPolicy) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
            retry,
        })
    }

    /// Single GET, no retries. Non-success statuses become errors here so the
    /// retry wrapper can classify them.
    async fn fetch_body(&self) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, ACCEPT_XML)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let cause = if status.is_server_error() {
                FetchCause::ServerError(status.as_u16())
            } else {
                FetchCause::HttpStatus(status.as_u16())
            };
            return Err(ProviderError::Fetch {
                cause,
                message: format!("provider responded with status {}", status),
            });
        }

        response.text().await.map_err(ProviderError::from_reqwest)
    }
}

#[async_trait]
impl PlanFeed for ProviderClient {
    async fn fetch(&self) -> Result<RawFeed, ProviderError> {
        tracing::info!(
            url = %self.url,
            timeout_ms = self.timeout.as_millis() as u64,
            "Fetching plans from provider"
        );

        let started = Instant::now();
        let body = retry_with_backoff(
            "provider fetch",
            &self.retry,
            ProviderError::is_retryable,
            || self.fetch_body(),
        )
        .await
        .map_err(|e| {
            tracing::error!(url = %self.url, "Provider fetch failed: {}", e);
            e
        })?;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = body.len(),
            "Fetched provider feed"
        );

        parse_feed(&body)
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(&self.url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("Provider health check failed: {}", e);
                false
            }
        }
    }
}
