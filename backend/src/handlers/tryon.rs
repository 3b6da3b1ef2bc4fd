use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    Json,
};
use image::DynamicImage;
use std::sync::Arc;

use crate::models::error::AppError;
use crate::models::imaging::MaskConfidence;
use crate::models::tryon::{TryOnRequest, TryOnResponse, INVALID_FORMAT_MESSAGE};
use crate::services::codec;
use crate::services::pipeline::TryOnOutcome;
use crate::AppState;

// ---------------------------------------------------------------------------
// POST /score, /api/virtual-tryon, /api/ai-photoshoot
// ---------------------------------------------------------------------------

pub async fn score(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<TryOnResponse>, AppError> {
    let pipeline = state.readiness.pipeline()?;
    let body = body.map_err(body_rejection)?;

    let request: TryOnRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, body_len = body.len(), "unparseable try-on body");
        AppError::InvalidInput(INVALID_FORMAT_MESSAGE.to_string())
    })?;
    let job = request.validate()?;
    tracing::info!(
        category = %job.category,
        sleeves = ?job.sleeves,
        include_mask = job.include_mask,
        "try-on request accepted"
    );

    let outcome = pipeline.run(job).await?;

    let response = tokio::task::spawn_blocking(move || encode_response(outcome))
        .await
        .map_err(|e| AppError::Internal(format!("Task panicked: {}", e)))??;
    Ok(Json(response))
}

fn body_rejection(rejection: BytesRejection) -> AppError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        tracing::debug!(error = %rejection.body_text(), "unreadable try-on body");
        AppError::InvalidInput(INVALID_FORMAT_MESSAGE.to_string())
    }
}

fn encode_response(outcome: TryOnOutcome) -> Result<TryOnResponse, AppError> {
    let result_image = codec::image_to_base64(&DynamicImage::ImageRgb8(outcome.image))?;
    let mask_image = outcome
        .mask
        .map(|m| codec::image_to_base64_png(&DynamicImage::ImageLuma8(m)))
        .transpose()?;
    Ok(TryOnResponse {
        success: true,
        result_image,
        detected_sleeves: outcome.sleeves.as_bool().unwrap_or(false),
        category: outcome.category,
        reduced_confidence: outcome.confidence == MaskConfidence::Reduced,
        mask_image,
    })
}
