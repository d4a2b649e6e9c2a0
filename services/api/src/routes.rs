use crate::infra::AppState;
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use axum::Json;
use captureget::error::ApiError;
use serde_json::json;
use tracing::warn;

/// Mount health, readiness, metrics and upload serving next to the pipeline routes.
pub(crate) fn with_service_routes(pipeline: axum::Router) -> axum::Router {
    pipeline
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route("/uploads/:folder/:file", axum::routing::get(upload_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Serve a stored upload, e.g. a CV linked from an application.
pub(crate) async fn upload_endpoint(
    Extension(state): Extension<AppState>,
    Path((folder, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let path = state
        .uploads
        .locate(&folder, &file)
        .ok_or_else(|| ApiError::NotFound("file not found".into()))?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("file not found".into()));
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read upload");
            return Err(ApiError::Internal(err.to_string()));
        }
    };

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type.to_string())],
        bytes,
    )
        .into_response())
}
