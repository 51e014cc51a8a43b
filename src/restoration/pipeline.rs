use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use uuid::Uuid;

use super::normalize::{normalize_image, MAX_EDGE};
use super::options::RestorationOptions;
use super::prompt::build_prompt;
use super::upstream::{EditedImage, ImageEditClient, ImageEditRequest};
use super::RestorationError;
use crate::uploads::TempFile;

/// Timeout for fetching a hosted result.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// A restored image written to the public output directory.
#[derive(Debug, Clone)]
pub struct RestoredArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

/// Sequential restore: normalize, prompt, edit, fetch, persist.
pub struct RestorationPipeline {
    editor: Arc<dyn ImageEditClient>,
    http: reqwest::Client,
    output_dir: PathBuf,
    force_grayscale: bool,
}

/// Intermediate path for a staged upload: `<stem>-processed.png` beside it.
pub fn processed_path_for(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    image_path.with_file_name(format!("{stem}-processed.png"))
}

impl RestorationPipeline {
    pub fn new(
        editor: Arc<dyn ImageEditClient>,
        output_dir: PathBuf,
        force_grayscale: bool,
    ) -> Self {
        Self {
            editor,
            http: reqwest::Client::new(),
            output_dir,
            force_grayscale,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn force_grayscale(&self) -> bool {
        self.force_grayscale
    }

    /// Restore the image at `image_path`.
    ///
    /// The intermediate PNG is removed when this future completes or is
    /// dropped. The input file itself is left for the caller.
    pub async fn restore(
        &self,
        image_path: &Path,
        options: &RestorationOptions,
    ) -> Result<RestoredArtifact, RestorationError> {
        let processed = TempFile::new(processed_path_for(image_path));
        self.run(image_path, processed.path(), options).await
    }

    async fn run(
        &self,
        image_path: &Path,
        processed_path: &Path,
        options: &RestorationOptions,
    ) -> Result<RestoredArtifact, RestorationError> {
        let started = Instant::now();

        // 1. Normalize
        let raw = tokio::fs::read(image_path).await?;
        let normalized = tokio::task::spawn_blocking(move || normalize_image(&raw, MAX_EDGE))
            .await
            .map_err(|e| RestorationError::Task(e.to_string()))??;
        tokio::fs::write(processed_path, &normalized.png_bytes).await?;
        info!(
            original = format!("{}x{}", normalized.original_width, normalized.original_height),
            normalized = format!("{}x{}", normalized.width, normalized.height),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image normalized"
        );

        // 2. Prompt
        let prompt = build_prompt(options, self.force_grayscale);
        debug!(prompt_len = prompt.len(), "Edit prompt built");

        // 3. Upstream edit
        let edit_started = Instant::now();
        let file_name = processed_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".to_string());
        let edited = self
            .editor
            .edit(ImageEditRequest::new(normalized.png_bytes, file_name, prompt))
            .await?;
        info!(
            model = self.editor.model(),
            elapsed_ms = edit_started.elapsed().as_millis() as u64,
            "Upstream edit completed"
        );

        // 4. Fetch and persist
        let bytes = match edited {
            EditedImage::Url(url) => self.download(&url).await?,
            EditedImage::Inline(bytes) => bytes,
        };

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let file_name = format!("restored-{}.jpg", Uuid::new_v4());
        let path = self.output_dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;

        info!(
            file = %file_name,
            size = bytes.len(),
            total_ms = started.elapsed().as_millis() as u64,
            "Restored image saved"
        );

        Ok(RestoredArtifact {
            path,
            file_name,
            size_bytes: bytes.len() as u64,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RestorationError> {
        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| RestorationError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RestorationError::Download(format!(
                "Result URL returned status {}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RestorationError::Download(e.to_string()))?;
        debug!(
            size = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Restored image downloaded"
        );
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restoration::prompt::{COLORIZE_CLAUSE, GRAYSCALE_CLAUSE};
    use crate::restoration::upstream::MockImageEditClient;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn write_jpeg(dir: &Path, width: u32, height: u32) -> PathBuf {
        let img = RgbImage::from_pixel(width, height, Rgb([180, 150, 120]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Jpeg)
            .unwrap();
        let path = dir.join("upload-1.jpg");
        std::fs::write(&path, cursor.into_inner()).unwrap();
        path
    }

    async fn spawn_result_host() -> String {
        let app = Router::new()
            .route("/out.png", get(|| async { b"restored-bytes".to_vec() }))
            .route("/gone.png", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn processed_path_sits_beside_upload() {
        assert_eq!(
            processed_path_for(Path::new("/data/uploads/abc.jpeg")),
            PathBuf::from("/data/uploads/abc-processed.png")
        );
    }

    #[tokio::test]
    async fn inline_result_is_persisted_and_intermediate_removed() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_jpeg(dir.path(), 2400, 1200);
        let output_dir = dir.path().join("restored");
        let mock = Arc::new(MockImageEditClient::returning(EditedImage::Inline(
            b"fake-jpeg".to_vec(),
        )));
        let pipeline = RestorationPipeline::new(mock.clone(), output_dir.clone(), false);

        let artifact = pipeline
            .restore(&input, &RestorationOptions::default())
            .await
            .unwrap();

        assert!(artifact.file_name.starts_with("restored-"));
        assert!(artifact.file_name.ends_with(".jpg"));
        assert_eq!(artifact.path, output_dir.join(&artifact.file_name));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"fake-jpeg");
        assert_eq!(artifact.size_bytes, 9);

        assert!(!processed_path_for(&input).exists());
        assert!(input.exists(), "pipeline must not delete its input");

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].file_name, "upload-1-processed.png");
        assert_eq!(requests[0].size, "1024x1024");
        let sent = image::load_from_memory(&requests[0].image_png).unwrap();
        assert_eq!(sent.dimensions(), (1000, 500));
        assert!(sent.color().has_alpha());
    }

    #[tokio::test]
    async fn grayscale_override_reaches_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_jpeg(dir.path(), 200, 200);
        let mock = Arc::new(MockImageEditClient::returning(EditedImage::Inline(vec![1])));
        let pipeline = RestorationPipeline::new(mock.clone(), dir.path().join("out"), true);
        let options = RestorationOptions {
            colorize_photo: true,
            ..RestorationOptions::default()
        };

        pipeline.restore(&input, &options).await.unwrap();

        let prompt = &mock.requests()[0].prompt;
        assert!(prompt.contains(GRAYSCALE_CLAUSE));
        assert!(!prompt.contains(COLORIZE_CLAUSE));
    }

    #[tokio::test]
    async fn hosted_result_is_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_jpeg(dir.path(), 300, 400);
        let host = spawn_result_host().await;
        let mock = Arc::new(MockImageEditClient::returning(EditedImage::Url(format!(
            "{host}/out.png"
        ))));
        let pipeline = RestorationPipeline::new(mock, dir.path().join("restored"), false);

        let artifact = pipeline
            .restore(&input, &RestorationOptions::default())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"restored-bytes");
    }

    #[tokio::test]
    async fn failed_download_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_jpeg(dir.path(), 300, 400);
        let host = spawn_result_host().await;
        let output_dir = dir.path().join("restored");
        let mock = Arc::new(MockImageEditClient::returning(EditedImage::Url(format!(
            "{host}/gone.png"
        ))));
        let pipeline = RestorationPipeline::new(mock, output_dir.clone(), false);

        let err = pipeline
            .restore(&input, &RestorationOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RestorationError::Download(_)));
        assert!(!processed_path_for(&input).exists());
        assert!(!output_dir.exists() || std::fs::read_dir(&output_dir).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn upstream_failure_aborts_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_jpeg(dir.path(), 300, 400);
        let mock = Arc::new(MockImageEditClient::failing(400, "Invalid image"));
        let pipeline = RestorationPipeline::new(mock, dir.path().join("restored"), false);

        let err = pipeline
            .restore(&input, &RestorationOptions::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Invalid image"));
        assert!(!processed_path_for(&input).exists());
    }

    #[tokio::test]
    async fn undecodable_input_never_reaches_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.jpg");
        std::fs::write(&input, vec![0xFFu8; 256]).unwrap();
        let mock = Arc::new(MockImageEditClient::returning(EditedImage::Inline(vec![1])));
        let pipeline = RestorationPipeline::new(mock.clone(), dir.path().join("restored"), false);

        let err = pipeline
            .restore(&input, &RestorationOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RestorationError::Image(_)));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_input_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockImageEditClient::returning(EditedImage::Inline(vec![1])));
        let pipeline = RestorationPipeline::new(mock, dir.path().join("restored"), false);

        let err = pipeline
            .restore(&dir.path().join("nope.jpg"), &RestorationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RestorationError::Io(_)));
    }
}
