//! Routers for the webhook and reader servers

use super::state::{ReaderState, WebhookState};
use super::{health, reader, webhooks};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// One POST route per admission hook path
pub fn webhook_router(state: WebhookState) -> Router {
    let mut router = Router::new().route("/healthz", get(health::health_check));
    for path in state.chain.paths() {
        router = router.route(path, post(webhooks::review));
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

pub fn reader_router(state: ReaderState) -> Router {
    let api_routes = Router::new()
        .route("/apis/:group/:version", get(reader::discovery))
        .route("/apis/:group/:version/:resource", get(reader::list_all))
        .route(
            "/apis/:group/:version/namespaces/:namespace/:resource",
            get(reader::list_subtree),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), reader::authorize));

    Router::new()
        .route("/healthz", get(health::health_check))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
