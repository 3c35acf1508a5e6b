//! Axum router construction.
//!
//! Builds the application router with the generation API, signed media
//! delivery, OpenAPI docs, and the tracing/CORS layers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::context::AppContext;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::generations::submit_generation,
        routes::generations::get_generation,
        routes::generations::list_wallet_generations,
        routes::generations::refresh_generation,
        routes::generations::cancel_generation,
        routes::media::serve_media,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::generations::SubmitGenerationRequest,
        routes::generations::GenerationResponse,
    ))
)]
pub struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/media/{*path}", get(routes::media::serve_media))
        .route(
            "/api/generations",
            post(routes::generations::submit_generation),
        )
        .route(
            "/api/generations/{id}",
            get(routes::generations::get_generation),
        )
        .route(
            "/api/generations/{id}/refresh",
            post(routes::generations::refresh_generation),
        )
        .route(
            "/api/generations/{id}/cancel",
            post(routes::generations::cancel_generation),
        )
        .route(
            "/api/wallets/{wallet}/generations",
            get(routes::generations::list_wallet_generations),
        )
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, Bytes};
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use rf_core::config::Config;
    use rf_media::ObjectStore;
    use rf_pipeline::testing::{fast_policy, stub_service, test_store, Stubs};
    use tower::ServiceExt;

    use super::*;

    fn app(dir: &tempfile::TempDir) -> (Router, AppContext) {
        let db = rf_db::pool::init_memory_pool().unwrap();
        let stubs = Stubs::happy("nft-1", "0xabc");
        let service = stub_service(&stubs, dir.path(), db, fast_policy());
        let media = Arc::new(test_store(dir.path()));
        let ctx = AppContext::new(Config::default(), service, media);
        (build_router(ctx.clone()), ctx)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);

        let resp = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["activeVideoTasks"], 0);
    }

    #[tokio::test]
    async fn submit_returns_accepted_job() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);

        let body = serde_json::json!({
            "pipeline": "image-only",
            "nftId": "nft-1",
            "userPrompt": "a neon city",
            "walletAddress": "0xabc",
        });
        let resp = router
            .oneshot(
                Request::post("/api/generations")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "queued");
        assert_eq!(json["pipelineType"], "image-only");
        assert_eq!(json["createdBy"], "0xabc");
    }

    #[tokio::test]
    async fn submit_rejects_unknown_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);

        let body = serde_json::json!({
            "pipeline": "everything",
            "nftId": "nft-1",
            "userPrompt": "x",
            "walletAddress": "0xabc",
        });
        let resp = router
            .oneshot(
                Request::post("/api/generations")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], "validation_error");
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);

        let uri = format!("/api/generations/{}", rf_core::JobId::new());
        let resp = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_job_id_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);

        let resp = router
            .oneshot(
                Request::get("/api/generations/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn media_requires_valid_signature() {
        let dir = tempfile::tempdir().unwrap();
        let (router, ctx) = app(&dir);
        let path = "users/0xabc/images/j.png";
        ctx.media
            .put(path, Bytes::from_static(b"png-bytes"), "image/png")
            .await
            .unwrap();

        let unsigned = router
            .clone()
            .oneshot(
                Request::get(format!("/media/{path}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unsigned.status(), StatusCode::FORBIDDEN);

        let signed = ctx
            .media
            .sign_url(path, std::time::Duration::from_secs(60))
            .unwrap();
        let query = signed.url.split_once('?').unwrap().1;

        let tampered = router
            .clone()
            .oneshot(
                Request::get(format!("/media/users/0xabc/images/other.png?{query}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(tampered.status(), StatusCode::FORBIDDEN);

        let ok = router
            .oneshot(
                Request::get(format!("/media/{path}?{query}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()["content-type"], "image/png");
        let bytes = ok.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"png-bytes");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = app(&dir);

        let resp = router
            .oneshot(Request::get("/api/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["paths"]["/api/generations"].is_object());
    }
}
