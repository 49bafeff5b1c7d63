//! HTTP client for the internal render service.
//!
//! Wraps `reqwest` with render-specific error handling: the service's 422
//! error envelope is decoded into the deterministic rejection kinds
//! ([`RenderError::MissingAsset`], [`RenderError::MalformedTemplate`]) so
//! the engine can tell "retrying won't help" apart from infrastructure
//! trouble. Retry policy lives in the engine, not here.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};

use crate::error::RenderError;
use crate::types::{RenderErrorEnvelope, RenderRequest, RenderResponse};

/// Client for the render service's `POST /v1/render` endpoint.
///
/// Use [`RenderClient::new`] with the configured base URL; tests point it
/// at a wiremock server.
pub struct RenderClient {
    client: Client,
    base_url: Url,
}

impl RenderClient {
    /// Creates a render client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`RenderError::InvalidBaseUrl`] if
    /// `base_url` does not parse.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, RenderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("sopub/0.1 (publish-scheduler)")
            .build()?;

        // Normalise: exactly one trailing slash so join() appends rather
        // than replacing the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| RenderError::InvalidBaseUrl {
            base_url: base_url.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(Self { client, base_url })
    }

    /// Renders one post's image and captions.
    ///
    /// # Errors
    ///
    /// - [`RenderError::MissingAsset`] / [`RenderError::MalformedTemplate`]
    ///   — deterministic rejections from the service's 422 envelope.
    /// - [`RenderError::UnexpectedStatus`] — any other non-2xx status.
    /// - [`RenderError::Http`] — network or TLS failure.
    /// - [`RenderError::Deserialize`] — a 2xx body that does not match the
    ///   expected shape.
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderResponse, RenderError> {
        let url = self
            .base_url
            .join("v1/render")
            .map_err(|e| RenderError::InvalidBaseUrl {
                base_url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;

        let response = self.client.post(url).json(request).send().await?;
        let status = response.status();

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let text = response.text().await?;
            return Err(Self::decode_rejection(request, &text));
        }

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RenderError::UnexpectedStatus {
                status: status.as_u16(),
                detail,
            });
        }

        let text = response.text().await?;
        serde_json::from_str::<RenderResponse>(&text).map_err(|e| RenderError::Deserialize {
            context: format!("render(forum_post_id={})", request.forum_post_id),
            source: e,
        })
    }

    /// Decode a 422 body into a typed rejection. An envelope that does not
    /// parse, or an unknown kind, is reported as `UnexpectedStatus` so it
    /// still fails the post rather than being dropped.
    fn decode_rejection(request: &RenderRequest, body: &str) -> RenderError {
        let Ok(envelope) = serde_json::from_str::<RenderErrorEnvelope>(body) else {
            return RenderError::UnexpectedStatus {
                status: 422,
                detail: body.to_owned(),
            };
        };

        match envelope.error.kind.as_str() {
            "missing_asset" => RenderError::MissingAsset {
                forum_post_id: request.forum_post_id,
                detail: envelope.error.message,
            },
            "malformed_template" => RenderError::MalformedTemplate {
                forum_post_id: request.forum_post_id,
                template_id: request.template_id,
                detail: envelope.error.message,
            },
            _ => RenderError::UnexpectedStatus {
                status: 422,
                detail: envelope.error.message,
            },
        }
    }
}
