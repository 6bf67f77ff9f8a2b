//! API route definitions

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect},
    routing::{any, get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use super::{handlers, state::AppState};
use crate::client::ErrorBody;

async fn handle_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "Not found.".to_string(),
        }),
    )
}

async fn handle_405() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorBody {
            error: "Method not allowed.".to_string(),
        }),
    )
}

/// Resource paths that are also reachable without their trailing slash.
const SLASHLESS: &[&str] = &[
    "/experiments",
    "/experiments/:experiment_id",
    "/experiments/:experiment_id/runs",
    "/experiments/:experiment_id/runs/:run_id",
    "/runs/:run_id/params",
    "/runs/:run_id/metrics",
    "/runs/:run_id/tags",
    "/runs/:run_id/end",
    "/runs/:run_id/artifacts",
];

/// 307 keeps the method and body, so POSTs survive the redirect.
async fn add_trailing_slash(uri: Uri) -> Redirect {
    let target = match uri.query() {
        Some(query) => format!("{}/?{}", uri.path(), query),
        None => format!("{}/", uri.path()),
    };
    Redirect::temporary(&target)
}

/// Create the facade router
pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.max_upload_size;
    let router = SLASHLESS
        .iter()
        .fold(Router::new(), |router, path| router.route(path, any(add_trailing_slash)));
    router
        // Experiments
        .route(
            "/experiments/",
            post(handlers::create_experiment).get(handlers::list_experiments),
        )
        .route("/experiments/:experiment_id/", get(handlers::get_experiment))
        // Runs
        .route("/experiments/:experiment_id/runs/", post(handlers::start_run))
        .route(
            "/experiments/:experiment_id/runs/:run_id/",
            get(handlers::get_run),
        )
        .route("/runs/:run_id/params/", post(handlers::log_param))
        .route("/runs/:run_id/metrics/", post(handlers::log_metric))
        .route("/runs/:run_id/tags/", post(handlers::set_tag))
        .route("/runs/:run_id/end/", post(handlers::end_run))
        // Artifacts
        .route(
            "/runs/:run_id/artifacts/",
            post(handlers::log_artifact).get(handlers::list_artifacts),
        )
        // System
        .route("/health", get(handlers::health_check))
        .fallback(handle_404)
        .method_not_allowed_fallback(handle_405)
        .with_state(state)
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::config::FacadeConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_app() -> Router {
        create_router(Arc::new(AppState::new(&FacadeConfig::in_memory())))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_is_json_404() {
        let response = test_app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_missing_trailing_slash_redirects() {
        for (method, uri, location) in [
            ("GET", "/experiments", "/experiments/"),
            ("GET", "/experiments/0/runs/abc?x=1", "/experiments/0/runs/abc/?x=1"),
            ("POST", "/runs/abc/params", "/runs/abc/params/"),
        ] {
            let response = test_app()
                .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT, "{} {}", method, uri);
            assert_eq!(response.headers()["location"], location);
        }
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/experiments/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
