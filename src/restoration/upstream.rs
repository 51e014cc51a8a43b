use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use super::RestorationError;
use crate::config::ServerConfig;

/// Output size requested from the edit endpoint.
pub const EDIT_OUTPUT_SIZE: &str = "1024x1024";

/// Upper bound for a single edit call; image models routinely take 20-60s.
const UPSTREAM_TIMEOUT_SECS: u64 = 180;

/// One image-edit call.
#[derive(Debug, Clone)]
pub struct ImageEditRequest {
    /// Normalized RGBA PNG.
    pub image_png: Vec<u8>,
    pub file_name: String,
    pub prompt: String,
    pub size: String,
}

impl ImageEditRequest {
    pub fn new(
        image_png: Vec<u8>,
        file_name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            image_png,
            file_name: file_name.into(),
            prompt: prompt.into(),
            size: EDIT_OUTPUT_SIZE.to_string(),
        }
    }
}

/// What the upstream handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditedImage {
    /// Hosted result, fetched afterwards.
    Url(String),
    /// Result delivered in the response body (`b64_json`).
    Inline(Vec<u8>),
}

/// Hosted image-edit model.
#[async_trait]
pub trait ImageEditClient: Send + Sync {
    async fn edit(&self, request: ImageEditRequest) -> Result<EditedImage, RestorationError>;

    fn model(&self) -> &str;
}

/// Client for an OpenAI-compatible `/images/edits` endpoint.
pub struct OpenAiImageClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiImageClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
    ) -> Result<Self, RestorationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()
            .map_err(|e| RestorationError::UpstreamTransport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            client,
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, RestorationError> {
        Self::new(
            &config.openai_base_url,
            config.openai_api_key.clone(),
            &config.image_model,
        )
    }

    fn edits_url(&self) -> String {
        format!("{}/images/edits", self.base_url)
    }
}

/// Response body from `/images/edits`
#[derive(Deserialize)]
struct EditResponse {
    #[serde(default)]
    data: Vec<EditDatum>,
}

#[derive(Deserialize)]
struct EditDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Best human-readable message from an upstream error body.
pub fn upstream_error_message(status: u16, body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("Upstream returned status {status}")
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl ImageEditClient for OpenAiImageClient {
    async fn edit(&self, request: ImageEditRequest) -> Result<EditedImage, RestorationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(RestorationError::MissingApiKey)?;

        let image_part = reqwest::multipart::Part::bytes(request.image_png)
            .file_name(request.file_name)
            .mime_str("image/png")
            .map_err(|e| RestorationError::UpstreamTransport(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("image", image_part)
            .text("model", self.model.clone())
            .text("prompt", request.prompt)
            .text("n", "1")
            .text("size", request.size);

        let response = self
            .client
            .post(self.edits_url())
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RestorationError::UpstreamTransport(format!(
                        "Request timed out after {UPSTREAM_TIMEOUT_SECS}s"
                    ))
                } else {
                    RestorationError::UpstreamTransport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestorationError::UpstreamStatus {
                status: status.as_u16(),
                message: upstream_error_message(status.as_u16(), &body),
            });
        }

        let parsed: EditResponse = response
            .json()
            .await
            .map_err(|e| RestorationError::MalformedResponse(e.to_string()))?;

        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| RestorationError::MalformedResponse("No image in response".into()))?;

        match (datum.url, datum.b64_json) {
            (Some(url), _) => Ok(EditedImage::Url(url)),
            (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map(EditedImage::Inline)
                .map_err(|e| RestorationError::MalformedResponse(format!("Invalid b64_json: {e}"))),
            (None, None) => Err(RestorationError::MalformedResponse(
                "Response has neither url nor b64_json".into(),
            )),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

enum MockOutcome {
    Success(EditedImage),
    Failure { status: u16, message: String },
}

/// Mock edit client for testing: returns a fixed result and records requests.
pub struct MockImageEditClient {
    outcome: MockOutcome,
    requests: Mutex<Vec<ImageEditRequest>>,
}

impl MockImageEditClient {
    pub fn returning(image: EditedImage) -> Self {
        Self {
            outcome: MockOutcome::Success(image),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16, message: &str) -> Self {
        Self {
            outcome: MockOutcome::Failure {
                status,
                message: message.to_string(),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ImageEditRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl ImageEditClient for MockImageEditClient {
    async fn edit(&self, request: ImageEditRequest) -> Result<EditedImage, RestorationError> {
        match self.requests.lock() {
            Ok(mut log) => log.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        match &self.outcome {
            MockOutcome::Success(image) => Ok(image.clone()),
            MockOutcome::Failure { status, message } => Err(RestorationError::UpstreamStatus {
                status: *status,
                message: message.clone(),
            }),
        }
    }

    fn model(&self) -> &str {
        "mock-image-edit"
    }
}
