//! Listing suggestions from a product photo via the Gemini `generateContent` API.
//!
//! Every failure collapses into an [`ExtractionError`]; callers turn that into a
//! single user-facing error while the variant is kept for logs.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use log::{info, warn};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

pub const LISTING_PROMPT: &str = "Analyze this product image.
Return ONLY valid JSON with exactly these fields:
- title: Product name
- category: One of (Electronics, Books, Furniture, Clothing, Other)
- description: Short description
- estimated_price: Number (in INR)
- price_reasoning: Short reason for the price";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("image analysis is not configured: {0}")]
    Configuration(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("unusable upstream response: {0}")]
    Malformed(String),
}

impl ExtractionError {
    /// Short label for logs.
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionError::Configuration(_) => "configuration",
            ExtractionError::Upstream(_) => "upstream",
            ExtractionError::Timeout => "timeout",
            ExtractionError::Malformed(_) => "malformed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ListingCategory {
    Electronics,
    Books,
    Furniture,
    Clothing,
    Other,
}

const CATEGORY_NAMES: &[&str] = &["Electronics", "Books", "Furniture", "Clothing", "Other"];

impl ListingCategory {
    const ALL: [ListingCategory; 5] = [
        ListingCategory::Electronics,
        ListingCategory::Books,
        ListingCategory::Furniture,
        ListingCategory::Clothing,
        ListingCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ListingCategory::Electronics => "Electronics",
            ListingCategory::Books => "Books",
            ListingCategory::Furniture => "Furniture",
            ListingCategory::Clothing => "Clothing",
            ListingCategory::Other => "Other",
        }
    }
}

// Models are loose about capitalisation; the set itself stays closed.
impl<'de> Deserialize<'de> for ListingCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let name = raw.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| de::Error::unknown_variant(name, CATEGORY_NAMES))
    }
}

/// Suggested listing fields. Absent fields are omitted from the output, but
/// at least one must be present; present ones are checked against the closed
/// category set and a non-negative price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ListingCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_reasoning: Option<String>,
}

impl ListingFields {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.estimated_price.is_none()
            && self.price_reasoning.is_none()
    }

    fn validate(self) -> Result<Self, ExtractionError> {
        if self.is_empty() {
            return Err(ExtractionError::Malformed("no listing fields in the answer".to_string()));
        }
        if let Some(price) = &self.estimated_price {
            match price.as_f64() {
                Some(p) if p.is_finite() && p >= 0.0 => {}
                _ => {
                    return Err(ExtractionError::Malformed(format!(
                        "estimated_price {} is not a non-negative number",
                        price
                    )))
                }
            }
        }
        Ok(self)
    }
}

/// An uploaded image with its MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Derives listing fields from a product image.
#[async_trait]
pub trait ListingAnalyzer: Send + Sync {
    async fn extract_listing_from_image(&self, image: ImageUpload) -> Result<ListingFields, ExtractionError>;
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

pub struct GeminiExtractor {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiExtractor {
    pub fn new(config: GeminiConfig) -> Result<Self, ExtractionError> {
        if config.api_key.trim().is_empty() {
            return Err(ExtractionError::Configuration("GEMINI_API_KEY is not set".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExtractionError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.config.base_url, self.config.model)
    }

    async fn generate(&self, image: &ImageUpload) -> Result<String, ExtractionError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: LISTING_PROMPT },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: &image.mime_type,
                            data: general_purpose::STANDARD.encode(&image.bytes),
                        },
                    },
                ],
            }],
        };

        // The key travels in a header so it never shows up in a logged URL.
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Upstream(format!("status {}", status)));
        }

        let body: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Timeout
            } else {
                ExtractionError::Malformed(format!("response body: {}", e))
            }
        })?;

        body.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| ExtractionError::Malformed("no candidate text".to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> ExtractionError {
    if err.is_timeout() {
        ExtractionError::Timeout
    } else {
        // Drop the URL so nothing request-specific reaches the logs.
        ExtractionError::Upstream(err.without_url().to_string())
    }
}

#[async_trait]
impl ListingAnalyzer for GeminiExtractor {
    async fn extract_listing_from_image(&self, image: ImageUpload) -> Result<ListingFields, ExtractionError> {
        info!(
            "Requesting listing analysis for {} byte {} image from {}",
            image.bytes.len(),
            image.mime_type,
            self.config.model
        );
        let result = match self.generate(&image).await {
            Ok(text) => parse_listing(&text),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Image analysis failed [{}]: {}", e.code(), e);
        }
        result
    }
}

/// Removes one markdown code fence wrapping the whole text.
///
/// The opening line must be ```` ``` ```` optionally followed by `json`, and
/// the text must end with ```` ``` ````. A fence on a single line is accepted
/// when its body is a JSON object or array. Anything else is returned trimmed
/// but otherwise untouched, so fence markers inside the content survive.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```").and_then(|rest| rest.strip_suffix("```")) else {
        return trimmed;
    };
    let Some((info, body)) = inner.split_once('\n') else {
        // Single-line fence: the body starts right after an optional `json` tag.
        let inner = inner.trim();
        let body = match inner.get(..4) {
            Some(tag) if tag.eq_ignore_ascii_case("json") => inner[4..].trim(),
            _ => inner,
        };
        return if body.starts_with('{') || body.starts_with('[') { body } else { trimmed };
    };
    let info = info.trim();
    if info.is_empty() || info.eq_ignore_ascii_case("json") {
        body.trim()
    } else {
        trimmed
    }
}

/// Parses model output into validated listing fields.
pub fn parse_listing(text: &str) -> Result<ListingFields, ExtractionError> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| ExtractionError::Malformed(format!("invalid JSON: {}", e)))?;
    let Some(object) = value.as_object() else {
        return Err(ExtractionError::Malformed("expected a JSON object".to_string()));
    };
    if let Some(reason) = object.get("error") {
        return Err(ExtractionError::Malformed(format!("model declined: {}", reason)));
    }
    let fields: ListingFields = serde_json::from_value(value)
        .map_err(|e| ExtractionError::Malformed(format!("unexpected shape: {}", e)))?;
    fields.validate()
}
