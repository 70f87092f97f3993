//! Image fetcher implementation
//!
//! This module turns a candidate's source URL into raw image bytes:
//! - Building the HTTP client with the configured user agent and timeout
//! - Decoding inline `data:` payloads without touching the network
//! - Downloading remote images with a single bounded attempt
//! - Classifying failures into candidate-local error kinds

use crate::config::FetchConfig;
use crate::dedup::ContentHash;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Candidate-local fetch & verify failures
///
/// None of these stop a harvest; the candidate is dropped and counted.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Inline payload could not be decoded: {0}")]
    Decode(String),

    #[error("Request for {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("Payload too small ({size} bytes, minimum {min})")]
    TooSmall { size: usize, min: usize },

    #[error("Payload too large (at least {size} bytes, maximum {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Not a valid image: {0}")]
    InvalidImage(String),

    #[error("Unsupported source: {0}")]
    Unsupported(String),
}

impl FetchError {
    /// Short machine-friendly label, used in logs and statistics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode_error",
            Self::Network { .. } => "network_error",
            Self::TooSmall { .. } => "too_small",
            Self::TooLarge { .. } => "too_large",
            Self::InvalidImage(_) => "invalid_image",
            Self::Unsupported(_) => "unsupported_source",
        }
    }
}

/// Raw image bytes and their content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub content_hash: ContentHash,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        let content_hash = ContentHash::of(&bytes);
        Self {
            bytes,
            content_hash,
        }
    }
}

/// Accepted payload sizes, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl From<&FetchConfig> for SizeLimits {
    fn from(config: &FetchConfig) -> Self {
        Self {
            min_bytes: config.min_image_bytes,
            max_bytes: config.max_image_bytes,
        }
    }
}

/// Where a source URL's bytes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `data:` URL carrying the payload itself
    Inline,
    /// `http` or `https` URL
    Remote,
}

/// Builds the HTTP client used for every image download
///
/// # Example
///
/// ```no_run
/// use sumi_harvest::config::FetchConfig;
/// use sumi_harvest::crawler::build_http_client;
///
/// let client = build_http_client(&FetchConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10).min(config.timeout()))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Decides how a source URL is fetched
pub fn classify_source(source_url: &str) -> Result<SourceKind, FetchError> {
    if source_url.starts_with("data:") {
        return Ok(SourceKind::Inline);
    }

    let url = Url::parse(source_url)
        .map_err(|e| FetchError::Unsupported(format!("{}: {}", abbreviate(source_url), e)))?;

    match url.scheme() {
        "http" | "https" => Ok(SourceKind::Remote),
        other => Err(FetchError::Unsupported(format!("scheme '{}'", other))),
    }
}

/// Fetches the bytes behind `source_url`
///
/// # Request Flow
///
/// 1. Inline `data:` URLs are base64-decoded locally
/// 2. Remote URLs get one GET bounded by the client timeout; retrying is the
///    orchestrator's concern, not this stage's
/// 3. Payloads under `limits.min_bytes` are rejected as placeholders
/// 4. Payloads over `limits.max_bytes` are rejected; remote bodies are
///    abandoned as soon as they pass the cap
///
/// Structural image verification happens separately in
/// [`verify_and_sign`](crate::crawler::verify_and_sign).
pub async fn fetch_source(
    client: &Client,
    source_url: &str,
    limits: SizeLimits,
) -> Result<RawImage, FetchError> {
    let bytes = match classify_source(source_url)? {
        SourceKind::Inline => decode_inline(source_url)?,
        SourceKind::Remote => download(client, source_url, limits.max_bytes).await?,
    };

    if bytes.len() < limits.min_bytes {
        return Err(FetchError::TooSmall {
            size: bytes.len(),
            min: limits.min_bytes,
        });
    }
    if bytes.len() > limits.max_bytes {
        return Err(FetchError::TooLarge {
            size: bytes.len(),
            max: limits.max_bytes,
        });
    }

    Ok(RawImage::new(bytes))
}

/// Decodes a `data:[<mime>][;base64],<payload>` URL
pub fn decode_inline(source_url: &str) -> Result<Vec<u8>, FetchError> {
    let rest = source_url
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::Decode("not a data: URL".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::Decode("missing ',' separator".to_string()))?;

    if !header
        .split(';')
        .any(|part| part.trim().eq_ignore_ascii_case("base64"))
    {
        return Err(FetchError::Decode("payload is not base64-encoded".to_string()));
    }

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| FetchError::Decode(e.to_string()))
}

async fn download(client: &Client, url: &str, max_bytes: usize) -> Result<Vec<u8>, FetchError> {
    let network = |message: String| FetchError::Network {
        url: url.to_string(),
        message,
    };

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| network(describe_error(&e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(network(format!("HTTP {}", status.as_u16())));
    }

    // Compressed responses carry no usable length; the stream check covers them
    if let Some(declared) = response.content_length() {
        let declared = usize::try_from(declared).unwrap_or(usize::MAX);
        if declared > max_bytes {
            return Err(FetchError::TooLarge {
                size: declared,
                max: max_bytes,
            });
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| network(describe_error(&e)))?
    {
        if body.len() + chunk.len() > max_bytes {
            return Err(FetchError::TooLarge {
                size: body.len() + chunk.len(),
                max: max_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

fn describe_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        "Connection refused".to_string()
    } else {
        error.to_string()
    }
}

/// Shortens a source URL for log output; inline payloads can be megabytes long
pub fn abbreviate(source_url: &str) -> String {
    const MAX: usize = 80;
    if source_url.len() <= MAX {
        return source_url.to_string();
    }
    let cut = (0..=MAX)
        .rev()
        .find(|i| source_url.is_char_boundary(*i))
        .unwrap_or(0);
    format!("{}...", &source_url[..cut])
}
