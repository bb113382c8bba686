// routes.rs
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, patch, post},
    Router,
};
use http::{header::CONTENT_TYPE, HeaderName, Method};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::USER_HEADER;
use crate::handlers;
use crate::state::AppState;

pub fn create_routes(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(USER_HEADER)])
        .max_age(Duration::from_secs(60 * 60));

    let api = Router::new()
        .route("/polls", get(handlers::list_polls).post(handlers::create_poll))
        .route(
            "/polls/{poll_id}",
            get(handlers::get_poll)
                .patch(handlers::update_poll)
                .delete(handlers::delete_poll),
        )
        .route("/polls/{poll_id}/options", post(handlers::add_option))
        .route("/polls/{poll_id}/vote", post(handlers::vote))
        .route("/polls/{poll_id}/results", get(handlers::get_results))
        .route(
            "/options/{option_id}",
            patch(handlers::update_option).delete(handlers::delete_option),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
