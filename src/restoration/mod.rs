//! Photo restoration: normalize the upload, build the edit prompt, delegate to
//! the upstream image-edit service, and persist what comes back.
//!
//! There is no fallback path. Any failure aborts the request and is reported
//! to the caller as-is.

pub mod normalize;
pub mod options;
pub mod pipeline;
pub mod prompt;
pub mod upstream;

pub use normalize::{normalize_image, NormalizedImage, MAX_EDGE};
pub use options::RestorationOptions;
pub use pipeline::{RestorationPipeline, RestoredArtifact};
pub use prompt::build_prompt;
pub use upstream::{
    EditedImage, ImageEditClient, ImageEditRequest, MockImageEditClient, OpenAiImageClient,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestorationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(String),

    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,

    #[error("Upstream returned error (status {status}): {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Upstream request failed: {0}")]
    UpstreamTransport(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Failed to download restored image: {0}")]
    Download(String),

    #[error("Background task failed: {0}")]
    Task(String),
}
