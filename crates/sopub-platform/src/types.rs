//! Platform publish API request/response types.

use serde::{Deserialize, Serialize};

/// One slide of a carousel publish.
#[derive(Debug, Clone, Serialize)]
pub struct CarouselItem {
    pub image_ref: String,
    pub caption_fragment: String,
}

/// Body for `POST /v1/media/single`.
#[derive(Debug, Clone, Serialize)]
pub struct SinglePublishRequest {
    pub image_ref: String,
    pub caption: String,
}

/// Body for `POST /v1/media/carousel`.
#[derive(Debug, Clone, Serialize)]
pub struct CarouselPublishRequest {
    pub items: Vec<CarouselItem>,
    pub combined_caption: String,
}

/// Raw platform response; `platform_post_id` may be absent or empty on
/// degraded "ok" responses, which the client refuses to treat as success.
#[derive(Debug, Deserialize)]
pub struct PublishResponse {
    #[serde(default)]
    pub platform_post_id: Option<String>,
    #[serde(default)]
    pub platform_post_url: Option<String>,
}

/// A verified publish: the identifier is guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub platform_post_id: String,
    pub platform_post_url: Option<String>,
}
