use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::ApiState;

/// One route per pipeline operation. Preflight requests get 200 with
/// permissive CORS on every route; unsupported methods get a
/// structured 405.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/upload",
            post(handlers::direct_upload)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/upload/init",
            post(handlers::init_upload)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/upload/chunk",
            post(handlers::upload_chunk)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/upload/finalize",
            post(handlers::finalize_upload)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .layer(DefaultBodyLimit::max(handlers::MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
