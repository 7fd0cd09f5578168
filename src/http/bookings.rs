use axum::extract::State;

use super::AppState;
use super::error::ApiError;
use super::extract::{Actor, Json, Path};
use crate::model::*;

pub async fn mine(State(state): State<AppState>, Actor(user_id): Actor) -> Json<Vec<BookingInfo>> {
    Json(state.engine.bookings_for_guest(user_id).await)
}

pub async fn get(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<BookingInfo>, ApiError> {
    Ok(Json(state.engine.get_booking(booking_id, actor).await?))
}

pub async fn confirm(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<BookingInfo>, ApiError> {
    let booking = state.engine.confirm_booking(booking_id, actor).await?;
    Ok(Json(BookingInfo::from(&booking)))
}

pub async fn cancel(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<BookingInfo>, ApiError> {
    let booking = state.engine.cancel_booking(booking_id, actor).await?;
    Ok(Json(BookingInfo::from(&booking)))
}
