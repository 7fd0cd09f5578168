use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::NaiveDate;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use ulid::Ulid;

use super::AppState;
use super::error::ApiError;
use super::extract::{Actor, Json, Path, Query};
use crate::engine::EngineError;
use crate::model::*;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRentalRequest {
    /// Listing id, when the listing service already has one.
    pub id: Option<RentalId>,
    pub guests: u32,
    pub nightly_rate: Cents,
    pub weekend_rate: Option<Cents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRentalRequest {
    pub guests: u32,
    pub nightly_rate: Cents,
    pub weekend_rate: Option<Cents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StayQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub guests: u32,
}

#[derive(Debug, Deserialize)]
pub struct BlockDatesRequest {
    pub dates: Vec<NaiveDate>,
    #[serde(default)]
    pub mode: BlockMode,
}

pub async fn register(
    State(state): State<AppState>,
    Actor(owner_id): Actor,
    Json(req): Json<RegisterRentalRequest>,
) -> Result<(StatusCode, Json<RentalInfo>), ApiError> {
    let spec = RentalSpec {
        id: req.id.unwrap_or_else(Ulid::new),
        owner_id,
        guests: req.guests,
        nightly_rate: req.nightly_rate,
        weekend_rate: req.weekend_rate,
    };
    let info = state.engine.register_rental(spec).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(rental_id): Path<RentalId>,
) -> Result<Json<RentalInfo>, ApiError> {
    Ok(Json(state.engine.get_rental(rental_id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(rental_id): Path<RentalId>,
    Json(req): Json<UpdateRentalRequest>,
) -> Result<Json<RentalInfo>, ApiError> {
    let info = state
        .engine
        .update_rental(rental_id, actor, req.guests, req.nightly_rate, req.weekend_rate)
        .await?;
    Ok(Json(info))
}

pub async fn availability(
    State(state): State<AppState>,
    Path(rental_id): Path<RentalId>,
    Query(q): Query<StayQuery>,
) -> Result<Json<AvailabilityResult>, ApiError> {
    let result = state
        .engine
        .check_availability(rental_id, q.start_date, q.end_date)
        .await?;
    Ok(Json(result))
}

pub async fn quote(
    State(state): State<AppState>,
    Path(rental_id): Path<RentalId>,
    Query(q): Query<StayQuery>,
) -> Result<Json<Quote>, ApiError> {
    Ok(Json(state.engine.quote(rental_id, q.start_date, q.end_date).await?))
}

pub async fn calendar(
    State(state): State<AppState>,
    Path(rental_id): Path<RentalId>,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<Vec<OpenRange>>, ApiError> {
    Ok(Json(state.engine.open_ranges(rental_id, q.from, q.to).await?))
}

pub async fn book(
    State(state): State<AppState>,
    Actor(user_id): Actor,
    Path(rental_id): Path<RentalId>,
    Json(req): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<BookingInfo>), ApiError> {
    let booking = state
        .engine
        .reserve(rental_id, user_id, req.start_date, req.end_date, req.guests)
        .await?;
    Ok((StatusCode::CREATED, Json(BookingInfo::from(&booking))))
}

pub async fn block_dates(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(rental_id): Path<RentalId>,
    Json(req): Json<BlockDatesRequest>,
) -> Result<Json<RentalInfo>, ApiError> {
    let info = state
        .engine
        .block_dates(rental_id, actor, req.dates, req.mode)
        .await?;
    Ok(Json(info))
}

pub async fn bookings(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(rental_id): Path<RentalId>,
) -> Result<Json<Vec<BookingInfo>>, ApiError> {
    Ok(Json(state.engine.bookings_for_rental(rental_id, actor).await?))
}

/// Committed events for one rental as server-sent events. Owner only.
pub async fn events(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(rental_id): Path<RentalId>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let rental = state.engine.get_rental(rental_id).await?;
    if rental.owner_id != actor {
        return Err(EngineError::Forbidden {
            actor,
            target: rental_id,
        }
        .into());
    }

    let rx = state.engine.notify.subscribe(rental_id);
    let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(event) => match SseEvent::default().event(event.kind()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!("rental {rental_id}: event not encodable: {e}");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!("rental {rental_id}: event subscriber lagged, {n} event(s) skipped");
            None
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
