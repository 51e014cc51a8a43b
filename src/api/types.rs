//! Shared state and response shapes for the restore API.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::ad_token::ConsumedTokens;
use crate::config::ServerConfig;
use crate::restoration::{
    ImageEditClient, OpenAiImageClient, RestorationError, RestorationOptions, RestorationPipeline,
};
use crate::uploads::{StorageLayout, UploadPolicy};

// ---------------------------------------------------------------------------
// API context: shared state for the router
// ---------------------------------------------------------------------------

/// Shared context for all routes. Cheap to clone.
#[derive(Clone)]
pub struct ApiContext {
    pub config: Arc<ServerConfig>,
    /// Process-wide consumed-token set. Check and consume under one lock.
    pub tokens: Arc<Mutex<ConsumedTokens>>,
    pub pipeline: Arc<RestorationPipeline>,
    pub storage: StorageLayout,
    pub upload_policy: UploadPolicy,
}

impl ApiContext {
    /// Build a context around an explicit edit client.
    pub fn new(config: ServerConfig, editor: Arc<dyn ImageEditClient>) -> Self {
        let storage = StorageLayout::new(config.uploads_dir(), config.restored_dir());
        let pipeline = RestorationPipeline::new(
            editor,
            storage.restored_dir.clone(),
            config.force_grayscale,
        );

        Self {
            config: Arc::new(config),
            tokens: Arc::new(Mutex::new(ConsumedTokens::new())),
            pipeline: Arc::new(pipeline),
            storage,
            upload_policy: UploadPolicy::default(),
        }
    }

    /// Build a context that talks to the configured OpenAI-compatible endpoint.
    pub fn from_config(config: ServerConfig) -> Result<Self, RestorationError> {
        let editor = OpenAiImageClient::from_config(&config)?;
        Ok(Self::new(config, Arc::new(editor)))
    }
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

/// `POST /restore` success body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    pub success: bool,
    pub restored_image_url: String,
    pub options: RestorationOptions,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: EndpointList,
}

#[derive(Debug, Serialize)]
pub struct EndpointList {
    pub restore: &'static str,
    pub health: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restoration::{EditedImage, MockImageEditClient};

    #[test]
    fn context_derives_storage_from_data_dir() {
        let config = ServerConfig {
            data_dir: "/srv/photo".into(),
            force_grayscale: true,
            ..ServerConfig::default()
        };
        let ctx = ApiContext::new(
            config,
            Arc::new(MockImageEditClient::returning(EditedImage::Inline(vec![]))),
        );

        assert_eq!(ctx.storage.uploads_dir, std::path::PathBuf::from("/srv/photo/uploads"));
        assert_eq!(ctx.storage.restored_dir, std::path::PathBuf::from("/srv/photo/restored"));
        assert_eq!(ctx.pipeline.output_dir(), ctx.storage.restored_dir.as_path());
        assert!(ctx.pipeline.force_grayscale());
        assert!(ctx.tokens.lock().unwrap().is_empty());
    }

    #[test]
    fn clones_share_token_set() {
        let ctx = ApiContext::from_config(ServerConfig::default()).unwrap();
        let clone = ctx.clone();
        assert!(Arc::ptr_eq(&ctx.tokens, &clone.tokens));
    }

    #[test]
    fn restore_response_uses_camel_case() {
        let json = serde_json::to_value(RestoreResponse {
            success: true,
            restored_image_url: "http://host/restored/x.jpg".into(),
            options: RestorationOptions::default(),
        })
        .unwrap();
        assert_eq!(json["restoredImageUrl"], "http://host/restored/x.jpg");
        assert_eq!(json["options"]["colorizePhoto"], false);
    }
}
