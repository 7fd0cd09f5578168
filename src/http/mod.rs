//! JSON over HTTP. Acting identity comes from the `x-user-id` header.

mod bookings;
pub mod error;
pub mod extract;
mod rentals;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rentals", post(rentals::register))
        .route("/rentals/{id}", get(rentals::get).put(rentals::update))
        .route("/rentals/{id}/availability", get(rentals::availability))
        .route("/rentals/{id}/quote", get(rentals::quote))
        .route("/rentals/{id}/calendar", get(rentals::calendar))
        .route("/rentals/{id}/book", post(rentals::book))
        .route("/rentals/{id}/blocked-dates", put(rentals::block_dates))
        .route("/rentals/{id}/bookings", get(rentals::bookings))
        .route("/rentals/{id}/events", get(rentals::events))
        .route("/bookings", get(bookings::mine))
        .route("/bookings/{id}", get(bookings::get))
        .route("/bookings/{id}/confirm", post(bookings::confirm))
        .route("/bookings/{id}/cancel", post(bookings::cancel))
        .route_layer(middleware::from_fn(crate::observability::track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rentals": state.engine.rental_count(),
    }))
}
