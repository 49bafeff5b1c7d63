//! HTTP client for the social platform's publish API.
//!
//! Wraps `reqwest` with platform-specific error handling. The one rule that
//! matters for correctness lives here: a 2xx response is only a success if
//! it carries a non-empty post identifier ([`PlatformError::MissingPostId`]
//! otherwise). Publish retries are scheduled by the worker with backoff,
//! never inline.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use crate::error::PlatformError;
use crate::types::{
    CarouselItem, CarouselPublishRequest, PublishOutcome, PublishResponse, SinglePublishRequest,
};

/// Minimum number of slides the platform accepts in one carousel.
pub const MIN_CAROUSEL_ITEMS: usize = 2;

/// Client for the platform publish API.
///
/// Use [`PlatformClient::new`] with the configured base URL and optional
/// bearer token; tests point it at a wiremock server.
pub struct PlatformClient {
    client: Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl PlatformClient {
    /// Creates a platform client with the configured timeout and token.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`PlatformError::InvalidBaseUrl`] if
    /// `base_url` does not parse.
    pub fn new(
        base_url: &str,
        bearer_token: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("sopub/0.1 (publish-scheduler)")
            .build()?;

        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| PlatformError::InvalidBaseUrl {
            base_url: base_url.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            bearer_token: bearer_token.map(ToOwned::to_owned),
        })
    }

    /// Publishes one image with its caption.
    ///
    /// # Errors
    ///
    /// - [`PlatformError::MissingPostId`] — 2xx without a verifiable id.
    /// - [`PlatformError::RateLimited`] — HTTP 429.
    /// - [`PlatformError::UnexpectedStatus`] — any other non-2xx status.
    /// - [`PlatformError::Http`] / [`PlatformError::Deserialize`] — network
    ///   failure or malformed response body.
    pub async fn publish_single(
        &self,
        image_ref: &str,
        caption: &str,
    ) -> Result<PublishOutcome, PlatformError> {
        let request = SinglePublishRequest {
            image_ref: image_ref.to_owned(),
            caption: caption.to_owned(),
        };
        self.post_publish("v1/media/single", &request, "publish_single")
            .await
    }

    /// Publishes a carousel of at least [`MIN_CAROUSEL_ITEMS`] slides with
    /// one combined caption.
    ///
    /// # Errors
    ///
    /// [`PlatformError::TooFewItems`] if fewer than two slides are given;
    /// otherwise the same error surface as [`PlatformClient::publish_single`].
    pub async fn publish_carousel(
        &self,
        items: Vec<CarouselItem>,
        combined_caption: &str,
    ) -> Result<PublishOutcome, PlatformError> {
        if items.len() < MIN_CAROUSEL_ITEMS {
            return Err(PlatformError::TooFewItems { got: items.len() });
        }

        let request = CarouselPublishRequest {
            items,
            combined_caption: combined_caption.to_owned(),
        };
        self.post_publish("v1/media/carousel", &request, "publish_carousel")
            .await
    }

    async fn post_publish<B: serde::Serialize>(
        &self,
        endpoint: &str,
        body: &B,
        context: &str,
    ) -> Result<PublishOutcome, PlatformError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| PlatformError::InvalidBaseUrl {
                base_url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;

        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(PlatformError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PlatformError::UnexpectedStatus {
                status: status.as_u16(),
                detail,
            });
        }

        let text = response.text().await?;
        let parsed = serde_json::from_str::<PublishResponse>(&text).map_err(|e| {
            PlatformError::Deserialize {
                context: context.to_owned(),
                source: e,
            }
        })?;

        // "ok" without an identifier is not a publish we can ever verify
        // or deduplicate against — treat it as a failed attempt.
        match parsed.platform_post_id {
            Some(id) if !id.trim().is_empty() => Ok(PublishOutcome {
                platform_post_id: id,
                platform_post_url: parsed.platform_post_url,
            }),
            _ => Err(PlatformError::MissingPostId),
        }
    }
}
