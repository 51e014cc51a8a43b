//! Submission client: what the mobile app sends, and how it reads the answer.
//!
//! Issues the ad token once the ad completes, posts the multipart form, and
//! decodes either the success body or the error body.

use serde::Deserialize;
use thiserror::Error;

use crate::ad_token::AdToken;
use crate::api::endpoints::restore::{AD_TOKEN_FIELD, IMAGE_FIELD};
use crate::restoration::RestorationOptions;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Server rejected request ({status}): {error}")]
    Rejected {
        status: u16,
        code: Option<String>,
        error: String,
        message: Option<String>,
    },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// One restore submission.
#[derive(Debug, Clone)]
pub struct RestoreSubmission {
    pub image: Vec<u8>,
    pub file_name: String,
    /// Content type for the image part. Guessed from `file_name` when `None`.
    pub mime_type: Option<String>,
    pub options: RestorationOptions,
    pub ad_token: String,
}

impl RestoreSubmission {
    /// Build a submission carrying a freshly issued ad token.
    pub fn new(image: Vec<u8>, file_name: impl Into<String>, options: RestorationOptions) -> Self {
        Self {
            image,
            file_name: file_name.into(),
            mime_type: None,
            options,
            ad_token: AdToken::issue().to_string(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.ad_token = token.into();
        self
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    fn content_type(&self) -> String {
        self.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.file_name)
                .first_or(mime_guess::mime::IMAGE_JPEG)
                .to_string()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub success: bool,
    pub restored_image_url: String,
    pub options: RestorationOptions,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
    code: Option<String>,
    message: Option<String>,
}

pub struct RestoreClient {
    base_url: String,
    http: reqwest::Client,
}

impl RestoreClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /restore`.
    pub async fn restore(
        &self,
        submission: RestoreSubmission,
    ) -> Result<RestoreOutcome, ClientError> {
        let content_type = submission.content_type();
        let image_part = reqwest::multipart::Part::bytes(submission.image)
            .file_name(submission.file_name)
            .mime_str(&content_type)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new().part(IMAGE_FIELD, image_part);
        for (name, value) in submission.options.form_fields() {
            form = form.text(name, value);
        }
        form = form.text(AD_TOKEN_FIELD, submission.ad_token);

        let response = self
            .http
            .post(format!("{}/restore", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if status.is_success() {
            let outcome: RestoreOutcome = serde_json::from_slice(&body)
                .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;
            if !outcome.success {
                return Err(ClientError::UnexpectedResponse(
                    "success flag not set on 2xx response".into(),
                ));
            }
            return Ok(outcome);
        }

        match serde_json::from_slice::<ErrorReply>(&body) {
            Ok(reply) => Err(ClientError::Rejected {
                status: status.as_u16(),
                code: reply.code,
                error: reply.error,
                message: reply.message,
            }),
            Err(_) => Err(ClientError::UnexpectedResponse(format!(
                "status {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            ))),
        }
    }

    /// Download a restored image (the app's save-to-device path).
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::UnexpectedResponse(format!(
                "status {} fetching {url}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
