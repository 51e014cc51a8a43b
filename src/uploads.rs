//! Upload intake: format filtering, staging on disk, and file hygiene.
//!
//! Uploads are written to `uploads/` only for the duration of one request and
//! removed afterwards whatever the outcome. Files left behind by a crash are
//! cleared at the next startup.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Maximum accepted image size.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024; // 20 MB

const MB: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Only image files are allowed!")]
    NotAnImage,
    #[error("HEIC/HEIF format not supported. Please convert to JPG or PNG first.")]
    UnsupportedFormat,
    #[error("File too large. Maximum file size is {max_mb}MB.")]
    TooLarge { max_mb: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

/// Detect MIME type from file magic bytes.
pub fn detect_mime_from_bytes(bytes: &[u8]) -> &'static str {
    if bytes.len() < 4 {
        return "application/octet-stream";
    }

    // JPEG: FF D8 FF
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    // PNG: 89 50 4E 47
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        return "image/png";
    }
    if bytes.starts_with(b"GIF8") {
        return "image/gif";
    }
    // WebP: RIFF....WEBP
    if bytes.len() >= 12 && bytes[..4] == *b"RIFF" && bytes[8..12] == *b"WEBP" {
        return "image/webp";
    }
    if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        return "image/tiff";
    }
    if bytes.starts_with(b"BM") {
        return "image/bmp";
    }
    // HEIF/HEIC: ....ftyp at offset 4
    if bytes.len() >= 12 && bytes[4..8] == *b"ftyp" {
        if let Ok(brand) = std::str::from_utf8(&bytes[8..12]) {
            if matches!(brand, "heic" | "heix" | "hevc" | "hevx" | "mif1" | "msf1") {
                return "image/heic";
            }
        }
    }

    "application/octet-stream"
}

fn is_heif(mime: &str) -> bool {
    matches!(mime, "image/heic" | "image/heif" | "image/heic-sequence" | "image/heif-sequence")
}

/// Staged-file extension (with leading dot) from the client file name,
/// falling back to the MIME type.
pub fn extension_for(original_name: Option<&str>, mime: &str) -> String {
    let from_name = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        });

    if let Some(ext) = from_name {
        return format!(".{ext}");
    }

    let from_mime = match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        other => mime_guess::get_mime_extensions_str(other).and_then(|exts| exts.first().copied()),
    };

    from_mime.map(|ext| format!(".{ext}")).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Upload policy
// ---------------------------------------------------------------------------

/// Rules applied to the `image` field while the multipart body is read.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: MAX_UPLOAD_BYTES,
        }
    }
}

impl UploadPolicy {
    pub fn max_file_size_mb(&self) -> usize {
        self.max_file_size / MB
    }

    /// Accept `image/*` uploads other than HEIC/HEIF. Returns the effective
    /// MIME type: the declared one, or the sniffed one when the client sent
    /// none (or a generic octet-stream).
    pub fn check(&self, declared: Option<&str>, bytes: &[u8]) -> Result<String, UploadError> {
        if bytes.len() > self.max_file_size {
            return Err(UploadError::TooLarge {
                max_mb: self.max_file_size_mb(),
            });
        }

        let sniffed = detect_mime_from_bytes(bytes);
        let declared = declared
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty() && m != "application/octet-stream");
        let effective = declared.unwrap_or_else(|| sniffed.to_string());

        if is_heif(&effective) || is_heif(sniffed) {
            return Err(UploadError::UnsupportedFormat);
        }
        if !effective.starts_with("image/") {
            return Err(UploadError::NotAnImage);
        }
        Ok(effective)
    }
}

// ---------------------------------------------------------------------------
// On-disk layout
// ---------------------------------------------------------------------------

/// Where uploads are staged and restored images are published.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub uploads_dir: PathBuf,
    pub restored_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(uploads_dir: PathBuf, restored_dir: PathBuf) -> Self {
        Self {
            uploads_dir,
            restored_dir,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.uploads_dir)?;
        std::fs::create_dir_all(&self.restored_dir)
    }

    /// Write an upload to `uploads/<uuid><ext>`. The file lives as long as
    /// the returned guard.
    pub async fn stage_upload(
        &self,
        bytes: &[u8],
        extension: &str,
    ) -> Result<TempFile, UploadError> {
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        let path = self.uploads_dir.join(format!("{}{}", Uuid::new_v4(), extension));
        let staged = TempFile::new(path);
        tokio::fs::write(staged.path(), bytes).await?;
        tracing::debug!(path = %staged.path().display(), size = bytes.len(), "Upload staged");
        Ok(staged)
    }
}

// ---------------------------------------------------------------------------
// Transient files
// ---------------------------------------------------------------------------

/// A request-scoped file, removed when the guard drops.
///
/// Dropping runs on every exit path, including a handler future that is
/// cancelled because the client disconnected.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        remove_best_effort(&self.path);
    }
}

/// Remove a transient file. Failures are logged, never propagated.
pub fn remove_best_effort(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to remove temporary file: {e}")
        }
    }
}

/// Remove files left in the uploads directory by a previous run.
///
/// Called at startup, before the server accepts requests.
pub fn cleanup_orphaned_uploads(uploads_dir: &Path) -> usize {
    let entries = match std::fs::read_dir(uploads_dir) {
        Ok(e) => e,
        Err(_) => return 0, // Directory may not exist yet
    };

    let mut cleaned = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => cleaned += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to remove orphaned upload: {e}")
            }
        }
    }

    if cleaned > 0 {
        tracing::info!(cleaned, "Removed orphaned uploads from previous run");
    }
    cleaned
}
