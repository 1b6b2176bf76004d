use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    create_link_handler, delete_link_handler, disable_link_handler, enable_link_handler,
    get_link_handler, health_handler, rebuild_filter_handler, redirect_handler,
};
use crate::state::AppState;

pub struct App {}

impl App {
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .nest(
                "/api",
                Router::new()
                    .route("/links", post(create_link_handler))
                    .route(
                        "/links/{code}",
                        get(get_link_handler).delete(delete_link_handler),
                    )
                    .route("/links/{code}/disable", post(disable_link_handler))
                    .route("/links/{code}/enable", post(enable_link_handler))
                    .route("/filter/rebuild", post(rebuild_filter_handler)),
            )
            .route("/{code}", get(redirect_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }
}
