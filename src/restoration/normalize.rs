//! Image normalization ahead of the upstream edit call.
//!
//! The edit endpoint accepts a square-ish PNG with an alpha channel and caps
//! the input resolution, so every upload goes through the same steps:
//! decode, fix EXIF rotation, fit the longest edge to [`MAX_EDGE`], convert
//! to RGBA, encode PNG.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use tracing::debug;

use super::RestorationError;

/// Longest edge of the normalized image, in pixels.
pub const MAX_EDGE: u32 = 1000;

/// Result of [`normalize_image`].
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub png_bytes: Vec<u8>,
    pub original_width: u32,
    pub original_height: u32,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn was_resized(&self) -> bool {
        self.width != self.original_width || self.height != self.original_height
    }
}

/// Decode, orient, fit inside `max_edge` and re-encode as RGBA PNG.
///
/// CPU-bound; callers on the async runtime should wrap it in `spawn_blocking`.
pub fn normalize_image(bytes: &[u8], max_edge: u32) -> Result<NormalizedImage, RestorationError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| RestorationError::Image(format!("Failed to decode image: {e}")))?;
    let img = apply_orientation(decoded, read_exif_orientation(bytes));

    let (original_width, original_height) = img.dimensions();
    let (width, height) = compute_fit_dimensions(original_width, original_height, max_edge);

    let img = if (width, height) != (original_width, original_height) {
        debug!(
            from = format!("{original_width}x{original_height}"),
            to = format!("{width}x{height}"),
            "Downscaling image for upstream edit"
        );
        img.resize_exact(width, height, FilterType::Lanczos3)
    } else {
        img
    };

    let png_bytes = encode_png(&img.to_rgba8())?;

    Ok(NormalizedImage {
        png_bytes,
        original_width,
        original_height,
        width,
        height,
    })
}

/// Dimensions that fit inside `max_edge` x `max_edge` with the aspect ratio
/// preserved. The longer side becomes exactly `max_edge`; images already
/// within bounds are returned unchanged (never upscaled).
pub fn compute_fit_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }

    let scale_short = |short: u32, long: u32| -> u32 {
        let scaled = (short as u64 * max_edge as u64 + long as u64 / 2) / long as u64;
        (scaled as u32).clamp(1, max_edge)
    };

    if width >= height {
        (max_edge, scale_short(height, width))
    } else {
        (scale_short(width, height), max_edge)
    }
}

/// Read the EXIF Orientation tag. Returns 1 (normal) when absent or unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation value.
///
/// 1 = normal, 2 = mirrored, 3 = 180, 4 = flipped vertically,
/// 5 = mirrored + 90 CW, 6 = 90 CW, 7 = mirrored + 270 CW, 8 = 270 CW.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Encode an RGBA image as PNG bytes.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, RestorationError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| RestorationError::Image(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}
