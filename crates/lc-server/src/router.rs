//! Axum router construction for the main port.
//!
//! Public playback and uploads, the authenticated control surface under
//! `/api/v1/live`, and the OpenAPI document.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::context::AppContext;
use crate::middleware::auth::auth_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Multipart create requests carry a thumbnail of up to 10 MiB plus fields.
const CREATE_BODY_LIMIT: usize = routes::live::MAX_THUMBNAIL_BYTES + 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::live::create_stream,
        routes::live::list_streams,
        routes::live::get_stream,
        routes::live::start_stream,
        routes::live::stop_stream,
        routes::live::persist_stream,
        routes::tools::tools,
    ),
    components(schemas(
        lc_core::StreamSession,
        lc_core::StreamState,
        lc_core::RecordingArtifact,
        lc_db::VideoRecord,
        lc_av::ToolInfo,
    ))
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the main-port router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let control_routes = Router::new()
        .route(
            "/stream",
            post(routes::live::create_stream).layer(DefaultBodyLimit::max(CREATE_BODY_LIMIT)),
        )
        .route("/streams", get(routes::live::list_streams))
        .route("/stream/{key}", get(routes::live::get_stream))
        .route("/stream/{key}/start", post(routes::live::start_stream))
        .route("/stream/{key}/stop", post(routes::live::stop_stream))
        .route("/stream/{key}/persist", post(routes::live::persist_stream))
        .route("/events", get(routes::events::events_handler))
        .route("/tools", get(routes::tools::tools))
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    let uploads = ServeDir::new(&ctx.config.storage.root);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/stream/{key}/index.m3u8", get(routes::playback::manifest))
        .route("/stream/{key}/{file}", get(routes::playback::segment))
        .nest_service("/uploads", uploads)
        .nest("/api/v1/live", control_routes)
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_control_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/api/v1/live/stream",
            "/api/v1/live/streams",
            "/api/v1/live/stream/{key}/stop",
            "/api/v1/live/stream/{key}/persist",
        ] {
            assert!(paths.iter().any(|p| *p == expected), "missing {expected}");
        }
    }
}
