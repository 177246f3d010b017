use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use melanoma_serve::service::check_content_type;
use melanoma_serve::{
    PredictionDetails, PredictionResponse, PredictionService, Upload, MAX_UPLOAD_BYTES,
};
use serde::Serialize;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::error::ApiError;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Name of the form field carrying the image.
const FILE_FIELD: &str = "file";

type AppState = Arc<PredictionService>;

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct ServiceInfo {
    status: &'static str,
    message: &'static str,
    version: &'static str,
}

pub fn create_router(service: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(root))
        .route("/predict", post(predict))
        .route("/predictions/:prediction_id", get(get_prediction))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

async fn health() -> Json<Health> {
    Json(Health { status: "healthy" })
}

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        status: "ok",
        message: "Melanoma detection API operational",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" })))
}

async fn predict(
    State(service): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();

        // Reject before buffering the body.
        check_content_type(&content_type)?;

        let data = field.bytes().await?.to_vec();
        let outcome = service
            .predict(Upload {
                filename,
                content_type,
                data,
            })
            .await?;

        return Ok(Json(outcome.response));
    }

    Err(ApiError::MissingFile)
}

async fn get_prediction(
    State(service): State<AppState>,
    Path(prediction_id): Path<String>,
) -> Result<Json<PredictionDetails>, ApiError> {
    info!("Looking up prediction {}", prediction_id);
    Ok(Json(service.lookup(&prediction_id).await?))
}
