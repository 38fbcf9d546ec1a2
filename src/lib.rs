pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ports;
pub mod providers;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::services::GatewayService;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub gateway: Arc<GatewayService>,
    pub webhook_secret: String,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/transactions", post(handlers::transactions::initiate))
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/transactions/:id/process",
            post(handlers::transactions::process_transaction),
        )
        .route(
            "/transactions/:id/status",
            get(handlers::transactions::check_status),
        )
        .route("/webhooks/:provider", post(handlers::webhook::receive))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
