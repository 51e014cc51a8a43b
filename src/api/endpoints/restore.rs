//! `POST /restore`: the one endpoint that does real work.
//!
//! Order of checks, each short-circuiting:
//! 1. upload filter while the multipart body is read (format, size);
//! 2. ad token check-and-consume;
//! 3. file presence;
//! 4. stage, restore, clean up.
//!
//! A rejected upload leaves the token unspent. Anything past step 2 spends it.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::{info, warn};

use crate::ad_token::{now_millis, redact};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, RestoreResponse};
use crate::restoration::options::{
    COLORIZE_PHOTO_FIELD, IMPROVE_CLARITY_FIELD, REPAIR_SCRATCHES_FIELD,
};
use crate::restoration::RestorationOptions;
use crate::uploads::{extension_for, UploadError, UploadPolicy};

pub const IMAGE_FIELD: &str = "image";
pub const AD_TOKEN_FIELD: &str = "adToken";

/// URL prefix under which restored images are served.
pub const RESTORED_PREFIX: &str = "/restored";

/// An accepted image part.
struct UploadedImage {
    bytes: Vec<u8>,
    mime: String,
    file_name: Option<String>,
}

/// Parsed multipart form.
#[derive(Default)]
struct RestoreForm {
    image: Option<UploadedImage>,
    ad_token: Option<String>,
    repair_scratches: Option<String>,
    colorize_photo: Option<String>,
    improve_clarity: Option<String>,
}

impl RestoreForm {
    fn options(&self) -> RestorationOptions {
        RestorationOptions::from_form_flags(
            self.repair_scratches.as_deref(),
            self.colorize_photo.as_deref(),
            self.improve_clarity.as_deref(),
        )
    }
}

fn multipart_error(err: MultipartError, policy: &UploadPolicy) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::Upload(UploadError::TooLarge {
            max_mb: policy.max_file_size_mb(),
        })
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// Read every field, applying the upload filter to the image part as soon as
/// it arrives. Unknown fields are ignored.
async fn read_form(
    multipart: &mut Multipart,
    policy: &UploadPolicy,
) -> Result<RestoreForm, ApiError> {
    let mut form = RestoreForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, policy))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            IMAGE_FIELD => {
                let declared = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, policy))?;
                if bytes.is_empty() {
                    continue;
                }
                let mime = policy.check(declared.as_deref(), &bytes)?;
                form.image = Some(UploadedImage {
                    bytes: bytes.to_vec(),
                    mime,
                    file_name,
                });
            }
            AD_TOKEN_FIELD | REPAIR_SCRATCHES_FIELD | COLORIZE_PHOTO_FIELD
            | IMPROVE_CLARITY_FIELD => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, policy))?;
                let slot = match name.as_str() {
                    AD_TOKEN_FIELD => &mut form.ad_token,
                    REPAIR_SCRATCHES_FIELD => &mut form.repair_scratches,
                    COLORIZE_PHOTO_FIELD => &mut form.colorize_photo,
                    _ => &mut form.improve_clarity,
                };
                *slot = Some(value);
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Base for result URLs: the configured public base, else the request's Host.
fn public_base(ctx: &ApiContext, headers: &HeaderMap) -> String {
    if let Some(base) = &ctx.config.public_base_url {
        return base.clone();
    }
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| ctx.config.listen_addr().to_string());
    format!("http://{host}")
}

pub async fn restore(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<RestoreResponse>, ApiError> {
    let form = read_form(&mut multipart, &ctx.upload_policy).await?;
    let options = form.options();

    let verdict = {
        let mut tokens = ctx
            .tokens
            .lock()
            .map_err(|_| ApiError::Internal("consumed token set lock poisoned".into()))?;
        tokens.check_and_consume(form.ad_token.as_deref(), now_millis())
    };
    let token = match verdict {
        Ok(token) => {
            info!(token = %token.redacted(), "Ad token accepted");
            token
        }
        Err(rejection) => {
            warn!(
                token = %form.ad_token.as_deref().map(redact).unwrap_or_default(),
                reason = %rejection,
                "Ad token rejected"
            );
            return Err(rejection.into());
        }
    };

    let image = form.image.ok_or(ApiError::NoFile)?;
    info!(
        token = %token.redacted(),
        mime = %image.mime,
        size = image.bytes.len(),
        repair_scratches = options.repair_scratches,
        colorize_photo = options.colorize_photo,
        improve_clarity = options.improve_clarity,
        "Restore request accepted"
    );

    let extension = extension_for(image.file_name.as_deref(), &image.mime);
    let staged = ctx.storage.stage_upload(&image.bytes, &extension).await?;

    // The staged file goes with the guard, including when the client hangs up.
    let artifact = ctx.pipeline.restore(staged.path(), &options).await?;
    drop(staged);

    let restored_image_url = format!(
        "{}{}/{}",
        public_base(&ctx, &headers),
        RESTORED_PREFIX,
        artifact.file_name
    );
    info!(url = %restored_image_url, "Restore completed");

    Ok(Json(RestoreResponse {
        success: true,
        restored_image_url,
        options,
    }))
}
