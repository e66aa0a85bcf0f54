//! Prediction endpoint

use axum::extract::{Multipart, State};
use axum::Json;
use burn::prelude::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::SharedState;

/// Multipart field carrying the upload
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub label: String,
    /// Rounded to 4 decimals
    pub confidence: f64,
    pub steps: Vec<String>,
}

fn round4(value: f32) -> f64 {
    (value as f64 * 1e4).round() / 1e4
}

/// POST /predict
///
/// The content type is checked before the model is touched, so a bad upload
/// never triggers a model load.
pub async fn predict<B: Backend>(
    State(state): State<SharedState<B>>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        upload = Some((content_type, bytes));
        break;
    }

    let (content_type, bytes) =
        upload.ok_or_else(|| ApiError::bad_request(format!("Missing '{}' field.", FILE_FIELD)))?;
    if !content_type.contains("image") {
        return Err(ApiError::bad_request("Please upload an image file."));
    }

    let worker = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        let engine = worker.model.get_or_init()?;
        engine.predict_bytes(&bytes)
    })
    .await
    .map_err(ApiError::unexpected)??;

    let steps = state.remediation()?.steps_for(&result.label).to_vec();
    info!(
        "Predicted {} ({:.3}) in {:.1} ms",
        result.label, result.confidence, result.inference_time_ms
    );

    Ok(Json(PredictResponse {
        label: result.label,
        confidence: round4(result.confidence),
        steps,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }
}
