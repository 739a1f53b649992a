//! HTTP API surface (C11): thin `axum` handlers wired to the orchestrator.
//!
//! Kept intentionally thin — the orchestrator, not the router, owns the
//! pipeline logic. This module only exists behind the `server` feature.

pub mod errors;
pub mod handlers;

use crate::orchestrator::Orchestrator;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the application router over a shared [`Orchestrator`].
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/process", post(handlers::process))
        .route("/extract-images-only", post(handlers::extract_images_only))
        .route("/health", get(handlers::health))
        .route("/providers", get(handlers::providers))
        .route("/templates", get(handlers::list_templates))
        .route("/templates/:id", get(handlers::get_template))
        .route("/extract-structured", post(handlers::extract_structured))
        .with_state(orchestrator)
        .layer(TraceLayer::new_for_http())
}
