use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::io::Cursor;
use uuid::Uuid;

use crate::{
    config::Config,
    errors::{AppError, Result},
    handlers::AppState,
    ledger::{fingerprint, EntitlementGate, MAX_REGENERATE_COUNT},
    middleware::auth::AuthenticatedUser,
    models::{EnhanceResponse, ImageSummary, ListQuery, ListingImage, NewListingImage},
    services::{EnhanceOptions, ImageEnhancer},
    store::LedgerStore,
};

fn summarize(image: &ListingImage) -> ImageSummary {
    ImageSummary {
        id: image.id,
        url: format!("/api/v1/images/{}", image.id),
        hd_url: format!("/api/v1/images/{}/hd", image.id),
        mime: image.mime.clone(),
        width: image.width,
        height: image.height,
        style: image.style.clone(),
        room_type: image.room_type.clone(),
        regenerate_count: image.regenerate_count,
        regenerates_remaining: (MAX_REGENERATE_COUNT - image.regenerate_count).max(0),
        created_at: image.created_at,
    }
}

fn ensure_owner(user: &AuthenticatedUser, image: &ListingImage) -> Result<()> {
    if image.owner_id != user.id && !user.is_admin {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

fn validate_upload(data: &[u8], config: &Config) -> Result<(String, i32, i32)> {
    if data.is_empty() {
        return Err(AppError::Validation("Image data cannot be empty".to_string()));
    }
    if data.len() > config.max_file_size {
        return Err(AppError::Validation(format!(
            "File size {} bytes exceeds limit of {} bytes",
            data.len(),
            config.max_file_size
        )));
    }

    let format = image::guess_format(data)
        .map_err(|_| AppError::Validation("Unrecognized image format".to_string()))?;
    let mime = match format {
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::WebP => "image/webp",
        image::ImageFormat::Gif => "image/gif",
        _ => return Err(AppError::Validation("Unsupported image format".to_string())),
    };
    if !config.allowed_mime_types.iter().any(|m| m == mime) {
        return Err(AppError::Validation(format!(
            "MIME type {} is not allowed",
            mime
        )));
    }

    let (width, height) = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|_| AppError::Validation("Unreadable image data".to_string()))?
        .into_dimensions()
        .map_err(|_| AppError::Validation("Unreadable image data".to_string()))?;

    if width > config.max_image_dimension || height > config.max_image_dimension {
        return Err(AppError::Validation(format!(
            "Image dimensions {}x{} exceed the {} pixel limit",
            width, height, config.max_image_dimension
        )));
    }

    Ok((mime.to_string(), width as i32, height as i32))
}

/// Upload-and-enhance. A new original is enhanced for free; re-submitting a
/// known original with `regenerate` goes through the capped regeneration
/// path; without the flag it is a dedup hit and the stored result is
/// returned as-is.
pub async fn enhance(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut style: Option<String> = None;
    let mut room_type: Option<String> = None;
    let mut regenerate = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to parse multipart data: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file data: {}", e)))?;
                file_data = Some(data.to_vec());
            }
            "style" => {
                style = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read style field: {}", e))
                })?);
            }
            "room_type" => {
                room_type = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read room_type field: {}", e))
                })?);
            }
            "regenerate" => {
                let value = field.text().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read regenerate field: {}", e))
                })?;
                regenerate = matches!(value.as_str(), "true" | "1");
            }
            _ => {} // Ignore unknown fields
        }
    }

    let file_data = file_data
        .ok_or_else(|| AppError::Validation("No file provided".to_string()))?;
    let (mime, width, height) = validate_upload(&file_data, &state.config)?;

    let print = fingerprint(&file_data);
    let gate = EntitlementGate::new(state.store.clone());
    let options = EnhanceOptions {
        mime: mime.clone(),
        style: style.clone(),
        room_type: room_type.clone(),
    };

    let existing = state.store.find_image_by_fingerprint(&print).await?;

    match existing {
        Some(image) if regenerate => {
            ensure_owner(&user, &image)?;

            let enhancer = state.enhancer.clone();
            let bytes = file_data.clone();
            let (enhanced, outcome, balance) = gate
                .regenerate(user.id, &print, move || async move {
                    enhancer.enhance(&bytes, &options).await
                })
                .await?;

            state.vault.store_enhanced(image.id, &enhanced).await?;
            tracing::info!(
                image_id = %image.id,
                count = outcome.count,
                "image regenerated"
            );

            let mut summary = summarize(&image);
            summary.regenerate_count = outcome.count;
            summary.regenerates_remaining = outcome.remaining;
            let data = EnhanceResponse {
                image: summary,
                balance,
            };

            Ok((
                StatusCode::OK,
                Json(json!({
                    "message": "Image regenerated",
                    "data": data
                })),
            ))
        }
        Some(image) => {
            // Same original uploaded again without the regenerate flag:
            // serve the stored result, no provider call.
            ensure_owner(&user, &image)?;
            let balance = gate.record_generate(user.id).await?;
            let data = EnhanceResponse {
                image: summarize(&image),
                balance,
            };

            Ok((
                StatusCode::OK,
                Json(json!({
                    "message": "Image already enhanced (deduplicated)",
                    "data": data
                })),
            ))
        }
        None => {
            // First enhancement: call the provider before persisting
            // anything, so a failure leaves no trace.
            let enhanced = state.enhancer.enhance(&file_data, &options).await?;

            let image_id = Uuid::new_v4();
            state.vault.store_original(image_id, &file_data).await?;
            state.vault.store_enhanced(image_id, &enhanced).await?;

            let created = match state
                .store
                .create_image(NewListingImage {
                    id: image_id,
                    owner_id: user.id,
                    fingerprint: print.clone(),
                    mime,
                    size_bytes: file_data.len() as i64,
                    width,
                    height,
                    style,
                    room_type,
                })
                .await
            {
                Ok(image) => image,
                Err(e) => {
                    // A concurrent upload of the same original won the
                    // insert; fall back to its record.
                    match state.store.find_image_by_fingerprint(&print).await? {
                        Some(image) => {
                            state.vault.remove(image_id).await.ok();
                            image
                        }
                        None => return Err(e),
                    }
                }
            };

            let balance = gate.record_generate(user.id).await?;
            tracing::info!(image_id = %created.id, owner = %user.id, "image enhanced");
            let data = EnhanceResponse {
                image: summarize(&created),
                balance,
            };

            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "message": "Image enhanced",
                    "data": data
                })),
            ))
        }
    }
}

pub async fn list_images(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let images = state.store.list_images(user.id, limit, offset).await?;
    let summaries: Vec<ImageSummary> = images.iter().map(summarize).collect();

    Ok(Json(json!({ "data": summaries })))
}

/// Enhanced preview. Free for the owner; no usage event, no debit.
pub async fn preview(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let image = state
        .store
        .find_image(id)
        .await?
        .ok_or(AppError::NotFound)?;
    ensure_owner(&user, &image)?;

    let data = state.vault.load_enhanced(id).await?;

    Ok((
        [(header::CONTENT_TYPE, image.mime.clone())],
        data,
    )
        .into_response())
}

/// HD download: serves the full-resolution enhanced asset and debits one
/// token. The post-debit balance is surfaced in a response header.
pub async fn download_hd(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let image = state
        .store
        .find_image(id)
        .await?
        .ok_or(AppError::NotFound)?;
    ensure_owner(&user, &image)?;

    let gate = EntitlementGate::new(state.store.clone());
    let vault = state.vault.clone();
    let (data, debit) = gate
        .download(user.id, move || async move { vault.load_enhanced(id).await })
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, image.mime.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", image.id),
            ),
            (
                HeaderName::from_static("x-token-balance"),
                debit.balance_after.to_string(),
            ),
        ],
        data,
    )
        .into_response())
}
