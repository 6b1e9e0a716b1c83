use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, warn};

use crate::{
    controllers::analytics::DateRangeQuery,
    error::{ApiError, ApiResult},
    middleware::{AdminUser, AuthUser},
    models::{
        booking::{new_booking_ref, BOOKING_COLUMNS},
        round2, Booking, BookingStatus, PaymentIntent, PaymentStatus, SeatStatus, SeatType,
        Showtime,
    },
    services::{
        payment::{check_payable, PaymentRef, PaymentService},
        seat_lock::{normalize_seats, OwnerToken},
        tickets::{self, TicketData},
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/lock-seats", post(lock_seats))
        .route("/bookings/unlock-seats", post(unlock_seats))
        .route("/bookings/create-payment", post(create_payment))
        .route("/bookings/my-bookings", get(my_bookings))
        .route("/bookings/admin/all", get(admin_all_bookings))
        .route("/bookings/admin/stats", get(admin_booking_stats))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/cancel", put(cancel_booking))
        .route("/bookings/{id}/download-ticket", get(download_ticket))
}

/* ---------- helpers ---------- */

const PRICE_TOLERANCE: f64 = 0.01;

fn owner_token(user: &AuthUser, session_id: &str) -> ApiResult<OwnerToken> {
    OwnerToken::new(user.user_id, session_id)
        .ok_or_else(|| ApiError::BadRequest("sessionId is required".into()))
}

/// Normalizes a seat selection and enforces the per-booking limit.
fn seat_selection(seats: &[String], max: usize) -> ApiResult<Vec<String>> {
    let seats = normalize_seats(seats);
    if seats.is_empty() {
        return Err(ApiError::BadRequest("Select at least one seat".into()));
    }
    if seats.len() > max {
        return Err(ApiError::BadRequest(format!(
            "At most {} seats can be booked at once",
            max
        )));
    }
    Ok(seats)
}

/// Persisted state of one seat.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SeatState {
    status: SeatStatus,
    seat_type: SeatType,
    price: f64,
}

/// Checks the requested seats against their persisted state and returns
/// the server-side total.
fn price_selection(requested: &[String], found: &HashMap<String, SeatState>) -> ApiResult<f64> {
    let unknown: Vec<&str> = requested
        .iter()
        .filter(|s| !found.contains_key(*s))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Unknown seats: {}",
            unknown.join(", ")
        )));
    }

    let booked: Vec<&str> = requested
        .iter()
        .filter(|s| matches!(found.get(*s), Some(seat) if seat.status == SeatStatus::Booked))
        .map(String::as_str)
        .collect();
    if !booked.is_empty() {
        return Err(ApiError::Conflict(format!(
            "Seats already booked: {}",
            booked.join(", ")
        )));
    }

    Ok(round2(
        requested
            .iter()
            .filter_map(|s| found.get(s).map(|seat| seat.price))
            .sum(),
    ))
}

async fn load_seat_state(
    pool: &sqlx::PgPool,
    showtime_id: i64,
    seats: &[String],
) -> sqlx::Result<HashMap<String, SeatState>> {
    let rows = sqlx::query_as::<_, (String, SeatStatus, SeatType, f64)>(
        "SELECT seat_number, status, seat_type, price FROM seats
         WHERE showtime_id = $1 AND seat_number = ANY($2)",
    )
    .bind(showtime_id)
    .bind(seats)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(number, status, seat_type, price)| {
            (
                number,
                SeatState {
                    status,
                    seat_type,
                    price,
                },
            )
        })
        .collect())
}

async fn find_showtime(pool: &sqlx::PgPool, id: i64) -> ApiResult<Showtime> {
    Showtime::find(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Showtime"))
}

async fn find_booking(pool: &sqlx::PgPool, id: i64) -> ApiResult<Booking> {
    sqlx::query_as::<_, Booking>(&format!(
        "SELECT {} FROM bookings WHERE id = $1",
        BOOKING_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Booking"))
}

/// True when the screening starts within the cutoff window (or has started).
fn inside_cutoff(start: DateTime<Utc>, now: DateTime<Utc>, cutoff_minutes: i64) -> bool {
    start - now < Duration::minutes(cutoff_minutes)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// A booking already paid with the same reference: the caller's own booking
/// is replayed, anyone else's is a conflict.
fn replayed_booking(existing: Option<(i64, i64)>, user_id: i64) -> ApiResult<Option<i64>> {
    match existing {
        None => Ok(None),
        Some((booking_id, owner_id)) if owner_id == user_id => Ok(Some(booking_id)),
        Some(_) => Err(ApiError::Conflict(
            "Payment already used for another booking".into(),
        )),
    }
}

fn ensure_total(server_total: f64, claimed: f64) -> ApiResult<()> {
    if (server_total - claimed).abs() > PRICE_TOLERANCE {
        return Err(ApiError::BadRequest(format!(
            "Total price mismatch: expected {:.2}",
            server_total
        )));
    }
    Ok(())
}

/// Decides whether `payment` can pay `total` for `user_id`. `intent` is the
/// stored intent with the payment's id, if any.
fn check_payment(
    payment: PaymentRef<'_>,
    intent: Option<&PaymentIntent>,
    user_id: i64,
    total: f64,
    now: DateTime<Utc>,
    intent_ttl: Duration,
) -> ApiResult<()> {
    match (payment, intent) {
        (PaymentRef::Intent(_), None) => Err(ApiError::BadRequest("Payment not found".into())),
        (PaymentRef::Intent(_), Some(intent)) => {
            check_payable(intent, user_id, total, now, intent_ttl).map_err(ApiError::from)
        }
        (PaymentRef::DirectUpi(_), None) => Ok(()),
        (PaymentRef::DirectUpi(_), Some(_)) => Err(ApiError::Conflict(
            "Payment already used for another booking".into(),
        )),
    }
}

async fn booking_paid_with(pool: &sqlx::PgPool, payment_id: &str) -> sqlx::Result<Option<(i64, i64)>> {
    sqlx::query_as::<_, (i64, i64)>("SELECT id, user_id FROM bookings WHERE payment_intent_id = $1")
        .bind(payment_id)
        .fetch_optional(pool)
        .await
}

/// Resolves a lost race on the payment reference: the caller gets the booking
/// the winning request created, or 409.
async fn replay_after_race(
    pool: &sqlx::PgPool,
    payment_id: &str,
    user_id: i64,
) -> ApiResult<(StatusCode, Json<BookingDetail>)> {
    let existing = booking_paid_with(pool, payment_id).await?;
    match replayed_booking(existing, user_id)? {
        Some(booking_id) => Ok((StatusCode::OK, Json(load_detail(pool, booking_id).await?))),
        None => Err(ApiError::Conflict(
            "Payment already used for another booking".into(),
        )),
    }
}

/* ---------- booking views ---------- */

const DETAIL_SELECT: &str = r#"
    SELECT b.id, b.booking_ref, b.status, b.total_price, b.payment_intent_id,
           b.created_at, b.cancelled_at,
           b.user_id, u.name AS user_name, u.email AS user_email,
           st.id AS showtime_id, st.start_time, st.end_time, st.screen_name,
           m.id AS movie_id, m.title AS movie_title, m.poster_url, m.duration,
           t.id AS theater_id, t.name AS theater_name, t.location, t.city,
           ARRAY(SELECT bs.seat_number FROM booking_seats bs
                 WHERE bs.booking_id = b.id ORDER BY bs.seat_number) AS seat_numbers,
           ARRAY(SELECT bs.seat_type FROM booking_seats bs
                 WHERE bs.booking_id = b.id ORDER BY bs.seat_number) AS seat_types,
           ARRAY(SELECT bs.price FROM booking_seats bs
                 WHERE bs.booking_id = b.id ORDER BY bs.seat_number) AS seat_prices
    FROM bookings b
    JOIN users u ON u.id = b.user_id
    JOIN showtimes st ON st.id = b.showtime_id
    JOIN movies m ON m.id = st.movie_id
    JOIN theaters t ON t.id = st.theater_id
"#;

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    booking_ref: String,
    status: BookingStatus,
    total_price: f64,
    payment_intent_id: Option<String>,
    created_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    user_id: i64,
    user_name: String,
    user_email: String,
    showtime_id: i64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    screen_name: String,
    movie_id: i64,
    movie_title: String,
    poster_url: Option<String>,
    duration: i32,
    theater_id: i64,
    theater_name: String,
    location: String,
    city: String,
    seat_numbers: Vec<String>,
    seat_types: Vec<String>,
    seat_prices: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserRef {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MovieRef {
    #[serde(rename = "_id")]
    id: i64,
    title: String,
    poster_url: Option<String>,
    duration: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TheaterRef {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    location: String,
    city: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShowtimeRef {
    #[serde(rename = "_id")]
    id: i64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    screen_name: String,
}

/// A seat as it was sold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookedSeat {
    seat_number: String,
    #[serde(rename = "type")]
    seat_type: String,
    price: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingDetail {
    #[serde(rename = "_id")]
    id: i64,
    booking_id: String,
    status: BookingStatus,
    total_price: f64,
    seats: Vec<BookedSeat>,
    payment_intent_id: Option<String>,
    created_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    user: UserRef,
    movie: MovieRef,
    theater: TheaterRef,
    showtime: ShowtimeRef,
}

impl BookingDetail {
    fn seat_numbers(&self) -> Vec<String> {
        self.seats.iter().map(|s| s.seat_number.clone()).collect()
    }
}

impl From<BookingRow> for BookingDetail {
    fn from(r: BookingRow) -> Self {
        let seats = r
            .seat_numbers
            .into_iter()
            .zip(r.seat_types)
            .zip(r.seat_prices)
            .map(|((seat_number, seat_type), price)| BookedSeat {
                seat_number,
                seat_type,
                price,
            })
            .collect();

        BookingDetail {
            id: r.id,
            booking_id: r.booking_ref,
            status: r.status,
            total_price: r.total_price,
            seats,
            payment_intent_id: r.payment_intent_id,
            created_at: r.created_at,
            cancelled_at: r.cancelled_at,
            user: UserRef {
                id: r.user_id,
                name: r.user_name,
                email: r.user_email,
            },
            movie: MovieRef {
                id: r.movie_id,
                title: r.movie_title,
                poster_url: r.poster_url,
                duration: r.duration,
            },
            theater: TheaterRef {
                id: r.theater_id,
                name: r.theater_name,
                location: r.location,
                city: r.city,
            },
            showtime: ShowtimeRef {
                id: r.showtime_id,
                start_time: r.start_time,
                end_time: r.end_time,
                screen_name: r.screen_name,
            },
        }
    }
}

async fn load_detail(pool: &sqlx::PgPool, id: i64) -> ApiResult<BookingDetail> {
    sqlx::query_as::<_, BookingRow>(&format!("{} WHERE b.id = $1", DETAIL_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(BookingDetail::from)
        .ok_or_else(|| ApiError::not_found("Booking"))
}

#[derive(Debug, Default, Serialize)]
struct MyBookings {
    all: Vec<BookingDetail>,
    upcoming: Vec<BookingDetail>,
    past: Vec<BookingDetail>,
    cancelled: Vec<BookingDetail>,
}

fn partition_bookings(bookings: Vec<BookingDetail>, now: DateTime<Utc>) -> MyBookings {
    let mut out = MyBookings::default();
    for booking in &bookings {
        if booking.status == BookingStatus::Cancelled {
            out.cancelled.push(booking.clone());
        } else if booking.showtime.start_time > now {
            out.upcoming.push(booking.clone());
        } else {
            out.past.push(booking.clone());
        }
    }
    out.all = bookings;
    out
}

/* ---------- SEAT LOCKS ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeatLockRequest {
    showtime_id: i64,
    #[serde(alias = "seats")]
    seat_numbers: Vec<String>,
    #[serde(default)]
    session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeatLockResponse {
    success: bool,
    locked_seats: Vec<String>,
    expires_in_seconds: u64,
    total_price: f64,
}

// POST /api/bookings/lock-seats
async fn lock_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<SeatLockRequest>,
) -> ApiResult<Json<SeatLockResponse>> {
    let owner = owner_token(&user, &req.session_id)?;
    let seats = seat_selection(&req.seat_numbers, state.config.booking.max_seats_per_booking)?;

    let showtime = find_showtime(&state.db.pool, req.showtime_id).await?;
    if showtime.has_started(Utc::now()) {
        return Err(ApiError::Gone("This showtime has already started".into()));
    }

    let found = load_seat_state(&state.db.pool, showtime.id, &seats).await?;
    let total_price = price_selection(&seats, &found)?;

    let grant = state.locks.lock_seats(showtime.id, &seats, &owner).await?;

    Ok(Json(SeatLockResponse {
        success: true,
        locked_seats: grant.seats,
        expires_in_seconds: grant.expires_in_seconds,
        total_price,
    }))
}

// POST /api/bookings/unlock-seats
async fn unlock_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<SeatLockRequest>,
) -> ApiResult<impl IntoResponse> {
    let owner = owner_token(&user, &req.session_id)?;
    let released = state
        .locks
        .release_seats(req.showtime_id, &req.seat_numbers, &owner)
        .await?;

    Ok(Json(serde_json::json!({ "success": true, "released": released })))
}

/* ---------- PAYMENT ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentRequest {
    amount: f64,
    booking_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentResponse {
    client_secret: String,
    payment_intent_id: String,
}

// POST /api/bookings/create-payment
async fn create_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<Json<CreatePaymentResponse>> {
    if !req.amount.is_finite() || req.amount <= 0.0 {
        return Err(ApiError::BadRequest("amount must be greater than 0".into()));
    }

    let intent = state
        .payments
        .create_intent(user.user_id, req.amount, req.booking_id.as_deref())
        .await?;

    Ok(Json(CreatePaymentResponse {
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
    }))
}

/* ---------- BOOKINGS ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingRequest {
    showtime_id: i64,
    seats: Vec<String>,
    total_price: f64,
    #[serde(default)]
    session_id: String,
    payment_intent_id: String,
}

// POST /api/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<(StatusCode, Json<BookingDetail>)> {
    let pool = &state.db.pool;
    let payment = PaymentRef::parse(&req.payment_intent_id)?;
    let payment_id = payment.id();

    // a retried request returns the booking its payment already paid for
    let existing = booking_paid_with(pool, payment_id).await?;
    if let Some(booking_id) = replayed_booking(existing, user.user_id)? {
        let detail = load_detail(pool, booking_id).await?;
        return Ok((StatusCode::OK, Json(detail)));
    }

    let owner = owner_token(&user, &req.session_id)?;
    let seats = seat_selection(&req.seats, state.config.booking.max_seats_per_booking)?;
    let showtime = find_showtime(pool, req.showtime_id).await?;
    if showtime.has_started(Utc::now()) {
        return Err(ApiError::Gone("This showtime has already started".into()));
    }

    state.locks.verify_owned(showtime.id, &seats, &owner).await?;

    let found = load_seat_state(pool, showtime.id, &seats).await?;
    let total = price_selection(&seats, &found)?;
    ensure_total(total, req.total_price)?;

    let intent = state.payments.find(payment_id).await?;
    check_payment(
        payment,
        intent.as_ref(),
        user.user_id,
        total,
        Utc::now(),
        state.payments.intent_ttl(),
    )?;

    let mut tx = pool.begin().await?;

    // held until commit so the showtime cannot be deleted underneath us
    sqlx::query_scalar::<_, i64>("SELECT id FROM showtimes WHERE id = $1 FOR SHARE")
        .bind(showtime.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Showtime"))?;

    if let PaymentRef::DirectUpi(id) = payment {
        if !PaymentService::record_direct(&mut tx, id, user.user_id, total).await? {
            tx.rollback().await?;
            return replay_after_race(pool, payment_id, user.user_id).await;
        }
    }

    let booking_ref = new_booking_ref();
    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO bookings (booking_ref, user_id, showtime_id, total_price, status, payment_intent_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id",
    )
    .bind(&booking_ref)
    .bind(user.user_id)
    .bind(showtime.id)
    .bind(total)
    .bind(BookingStatus::Confirmed)
    .bind(payment_id)
    .fetch_one(&mut *tx)
    .await;
    let booking_id = match inserted {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => {
            tx.rollback().await?;
            return replay_after_race(pool, payment_id, user.user_id).await;
        }
        Err(e) => return Err(e.into()),
    };

    let updated = sqlx::query(
        "UPDATE seats SET status = 'booked', booking_id = $3
         WHERE showtime_id = $1 AND seat_number = ANY($2) AND status = 'available'",
    )
    .bind(showtime.id)
    .bind(&seats)
    .bind(booking_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated != seats.len() as u64 {
        tx.rollback().await?;
        warn!(
            "Booking race on showtime {}: {} of {} seats still available",
            showtime.id,
            updated,
            seats.len()
        );
        return Err(ApiError::Conflict(
            "Some of the selected seats were just booked by someone else".into(),
        ));
    }

    let (types, prices): (Vec<String>, Vec<f64>) = seats
        .iter()
        .filter_map(|s| found.get(s))
        .map(|seat| (seat.seat_type.as_str().to_string(), seat.price))
        .unzip();
    sqlx::query(
        "INSERT INTO booking_seats (booking_id, seat_number, seat_type, price)
         SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::float8[])",
    )
    .bind(booking_id)
    .bind(&seats)
    .bind(&types)
    .bind(&prices)
    .execute(&mut *tx)
    .await?;

    if let PaymentRef::Intent(id) = payment {
        if !PaymentService::transition(&mut tx, id, PaymentStatus::Pending, PaymentStatus::Succeeded)
            .await?
        {
            tx.rollback().await?;
            return Err(ApiError::Conflict("Payment is no longer pending".into()));
        }
    }

    tx.commit().await?;

    info!(
        "Booking {} confirmed: user {} showtime {} seats {:?} total {:.2}",
        booking_ref, user.user_id, showtime.id, seats, total
    );

    if let Err(e) = state.locks.release_seats(showtime.id, &seats, &owner).await {
        // the seats are booked now; stale locks only linger until their TTL
        warn!("Failed to release locks after booking {}: {:?}", booking_ref, e);
    }
    state.cache.invalidate_seats(showtime.id).await;

    let detail = load_detail(pool, booking_id).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

// GET /api/bookings/my-bookings
async fn my_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Json<MyBookings>> {
    let rows = sqlx::query_as::<_, BookingRow>(&format!(
        "{} WHERE b.user_id = $1 ORDER BY b.created_at DESC, b.id DESC",
        DETAIL_SELECT
    ))
    .bind(user.user_id)
    .fetch_all(&state.db.pool)
    .await?;

    let bookings = rows.into_iter().map(BookingDetail::from).collect();
    Ok(Json(partition_bookings(bookings, Utc::now())))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<BookingDetail>> {
    let detail = load_detail(&state.db.pool, id).await?;
    if !user.can_access(detail.user.id) {
        return Err(ApiError::Forbidden("Not authorized to view this booking".into()));
    }
    Ok(Json(detail))
}

// PUT /api/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<BookingDetail>> {
    let pool = &state.db.pool;
    let booking = find_booking(pool, id).await?;
    if !user.can_access(booking.user_id) {
        return Err(ApiError::Forbidden("Not authorized to cancel this booking".into()));
    }
    if !booking.status.can_transition_to(BookingStatus::Cancelled) {
        return Err(ApiError::Conflict(format!(
            "Booking is already {}",
            booking.status.as_str()
        )));
    }

    let showtime = find_showtime(pool, booking.showtime_id).await?;
    let cutoff = state.config.booking.cancellation_cutoff_minutes;
    if !user.is_admin() && inside_cutoff(showtime.start_time, Utc::now(), cutoff) {
        return Err(ApiError::BadRequest(format!(
            "Bookings can only be cancelled up to {} minutes before the show",
            cutoff
        )));
    }

    let mut tx = pool.begin().await?;

    let cancelled = sqlx::query(
        "UPDATE bookings SET status = 'cancelled', cancelled_at = NOW()
         WHERE id = $1 AND status <> 'cancelled'",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if cancelled != 1 {
        tx.rollback().await?;
        return Err(ApiError::Conflict("Booking is already cancelled".into()));
    }

    let freed = sqlx::query(
        "UPDATE seats SET status = 'available', booking_id = NULL WHERE booking_id = $1",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if let Some(intent_id) = booking.payment_intent_id.as_deref() {
        let refunded = PaymentService::transition(
            &mut tx,
            intent_id,
            PaymentStatus::Succeeded,
            PaymentStatus::Refunded,
        )
        .await?;
        if !refunded {
            warn!("Payment {} of booking {} was not in succeeded state", intent_id, id);
        }
    }

    tx.commit().await?;

    info!(
        "Booking {} cancelled by user {} ({} seat(s) freed)",
        booking.booking_ref, user.user_id, freed
    );
    state.cache.invalidate_seats(booking.showtime_id).await;

    Ok(Json(load_detail(pool, id).await?))
}

// GET /api/bookings/{id}/download-ticket
async fn download_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let detail = load_detail(&state.db.pool, id).await?;
    if !user.can_access(detail.user.id) {
        return Err(ApiError::Forbidden("Not authorized to view this booking".into()));
    }
    if detail.status != BookingStatus::Confirmed {
        return Err(ApiError::BadRequest(
            "Tickets are only available for confirmed bookings".into(),
        ));
    }

    let ticket = TicketData {
        booking_id: detail.id,
        booking_ref: detail.booking_id.clone(),
        customer: detail.user.name.clone(),
        movie_title: detail.movie.title.clone(),
        theater_name: detail.theater.name.clone(),
        theater_location: detail.theater.location.clone(),
        screen_name: detail.showtime.screen_name.clone(),
        start_time: detail.showtime.start_time,
        seats: detail.seat_numbers(),
        total_price: detail.total_price,
    };
    let body = tickets::render(&ticket, &state.config.booking.ticket_secret);
    let disposition = format!(
        "attachment; filename=\"{}\"",
        tickets::file_name(&detail.booking_id)
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/* ---------- ADMIN ---------- */

// GET /api/bookings/admin/all
async fn admin_all_bookings(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<BookingDetail>>> {
    let rows = sqlx::query_as::<_, BookingRow>(&format!(
        "{} ORDER BY b.created_at DESC, b.id DESC",
        DETAIL_SELECT
    ))
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(rows.into_iter().map(BookingDetail::from).collect()))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct BookingStats {
    total_bookings: i64,
    confirmed: i64,
    cancelled: i64,
    pending: i64,
    total_revenue: f64,
}

// GET /api/bookings/admin/stats
async fn admin_booking_stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(range): Query<DateRangeQuery>,
) -> ApiResult<Json<BookingStats>> {
    let range = range.resolve_optional(Utc::now().date_naive())?;
    let (start, end) = match range {
        Some(r) => (Some(r.start), Some(r.end)),
        None => (None, None),
    };

    let stats = sqlx::query_as::<_, BookingStats>(
        r#"
        SELECT COUNT(*) AS total_bookings,
               COUNT(*) FILTER (WHERE status = 'confirmed') AS confirmed,
               COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
               COUNT(*) FILTER (WHERE status = 'pending') AS pending,
               COALESCE(SUM(total_price) FILTER (WHERE status = 'confirmed'), 0)::float8 AS total_revenue
        FROM bookings
        WHERE ($1::timestamptz IS NULL OR created_at >= $1)
          AND ($2::timestamptz IS NULL OR created_at < $2)
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(&state.db.pool)
    .await?;

    Ok(Json(BookingStats {
        total_revenue: round2(stats.total_revenue),
        ..stats
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::TimeZone;

    fn seats(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn seat_state(entries: &[(&str, SeatStatus, f64)]) -> HashMap<String, SeatState> {
        entries
            .iter()
            .map(|(n, status, price)| {
                let seat = SeatState {
                    status: *status,
                    seat_type: SeatType::Standard,
                    price: *price,
                };
                (n.to_string(), seat)
            })
            .collect()
    }

    fn intent(user_id: i64, status: PaymentStatus, amount: f64, now: DateTime<Utc>) -> PaymentIntent {
        PaymentIntent {
            id: "pi_mock_7c1d".into(),
            user_id,
            client_secret: "mock_secret_7c1d".into(),
            amount,
            reference: None,
            status,
            created_at: now - Duration::minutes(2),
        }
    }

    fn detail(id: i64, status: BookingStatus, start: DateTime<Utc>) -> BookingDetail {
        BookingDetail {
            id,
            booking_id: format!("BK-0000000{}", id),
            status,
            total_price: 375.0,
            seats: vec![
                BookedSeat {
                    seat_number: "C4".into(),
                    seat_type: "standard".into(),
                    price: 150.0,
                },
                BookedSeat {
                    seat_number: "J5".into(),
                    seat_type: "premium".into(),
                    price: 225.0,
                },
            ],
            payment_intent_id: None,
            created_at: start - Duration::days(2),
            cancelled_at: None,
            user: UserRef {
                id: 1,
                name: "Meera".into(),
                email: "meera@example.com".into(),
            },
            movie: MovieRef {
                id: 3,
                title: "Vikram".into(),
                poster_url: Some("https://img.example.com/vikram.jpg".into()),
                duration: 174,
            },
            theater: TheaterRef {
                id: 4,
                name: "PVR Forum".into(),
                location: "Koramangala".into(),
                city: "Bengaluru".into(),
            },
            showtime: ShowtimeRef {
                id: 9,
                start_time: start,
                end_time: start + Duration::minutes(189),
                screen_name: "Screen 1".into(),
            },
        }
    }

    #[test]
    fn selection_is_normalized_and_bounded() {
        let picked = seat_selection(&seats(&[" b2", "A1", "B2"]), 10).unwrap();
        assert_eq!(picked, seats(&["A1", "B2"]));

        let err = seat_selection(&seats(&["", "  "]), 10).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = seat_selection(&seats(&["A1", "A2", "A3"]), 2).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("At most 2"));
    }

    #[test]
    fn pricing_sums_persisted_prices() {
        let found = seat_state(&[
            ("A1", SeatStatus::Available, 150.0),
            ("J1", SeatStatus::Available, 225.0),
        ]);
        let total = price_selection(&seats(&["A1", "J1"]), &found).unwrap();
        assert_eq!(total, 375.0);
    }

    #[test]
    fn unknown_seats_are_a_bad_request() {
        let found = seat_state(&[("A1", SeatStatus::Available, 150.0)]);
        let err = price_selection(&seats(&["A1", "Z99"]), &found).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("Z99"));
    }

    #[test]
    fn booked_seats_conflict() {
        let found = seat_state(&[
            ("A1", SeatStatus::Available, 150.0),
            ("A2", SeatStatus::Booked, 150.0),
        ]);
        let err = price_selection(&seats(&["A1", "A2"]), &found).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("A2"));
    }

    #[test]
    fn cutoff_window() {
        let now = Utc.with_ymd_and_hms(2030, 1, 5, 17, 0, 0).unwrap();
        assert!(inside_cutoff(now + Duration::minutes(30), now, 60));
        assert!(inside_cutoff(now - Duration::minutes(5), now, 60));
        assert!(!inside_cutoff(now + Duration::minutes(60), now, 60));
        assert!(!inside_cutoff(now + Duration::hours(5), now, 60));
    }

    #[test]
    fn bookings_are_partitioned() {
        let now = Utc.with_ymd_and_hms(2030, 1, 5, 12, 0, 0).unwrap();
        let list = vec![
            detail(1, BookingStatus::Confirmed, now + Duration::hours(6)),
            detail(2, BookingStatus::Confirmed, now - Duration::days(1)),
            detail(3, BookingStatus::Cancelled, now + Duration::hours(6)),
        ];

        let grouped = partition_bookings(list, now);
        fn ids(v: &[BookingDetail]) -> Vec<i64> {
            v.iter().map(|b| b.id).collect()
        }
        assert_eq!(ids(&grouped.all), vec![1, 2, 3]);
        assert_eq!(ids(&grouped.upcoming), vec![1]);
        assert_eq!(ids(&grouped.past), vec![2]);
        assert_eq!(ids(&grouped.cancelled), vec![3]);
    }

    #[test]
    fn detail_serializes_client_field_names() {
        let now = Utc.with_ymd_and_hms(2030, 1, 5, 12, 0, 0).unwrap();
        let value = serde_json::to_value(detail(7, BookingStatus::Confirmed, now)).unwrap();
        assert_eq!(value["_id"], 7);
        assert_eq!(value["bookingId"], "BK-00000007");
        assert_eq!(value["totalPrice"], 375.0);
        assert_eq!(value["status"], "confirmed");

        assert_eq!(value["movie"]["title"], "Vikram");
        assert_eq!(value["movie"]["posterUrl"], "https://img.example.com/vikram.jpg");
        assert_eq!(value["theater"]["name"], "PVR Forum");
        assert_eq!(value["theater"]["_id"], 4);
        assert_eq!(value["showtime"]["screenName"], "Screen 1");
        assert_eq!(value["showtime"]["startTime"], "2030-01-05T12:00:00Z");

        assert_eq!(value["seats"][0]["seatNumber"], "C4");
        assert_eq!(value["seats"][1]["seatNumber"], "J5");
        assert_eq!(value["seats"][1]["type"], "premium");
        assert_eq!(value["seats"][1]["price"], 225.0);
    }

    #[test]
    fn row_arrays_become_seat_objects() {
        let now = Utc.with_ymd_and_hms(2030, 1, 5, 12, 0, 0).unwrap();
        let row = BookingRow {
            id: 11,
            booking_ref: "BK-1A2B3C4D".into(),
            status: BookingStatus::Confirmed,
            total_price: 375.0,
            payment_intent_id: Some("mock_upi_1767225600000".into()),
            created_at: now,
            cancelled_at: None,
            user_id: 1,
            user_name: "Meera".into(),
            user_email: "meera@example.com".into(),
            showtime_id: 9,
            start_time: now,
            end_time: now + Duration::hours(3),
            screen_name: "Screen 1".into(),
            movie_id: 3,
            movie_title: "Vikram".into(),
            poster_url: None,
            duration: 174,
            theater_id: 4,
            theater_name: "PVR Forum".into(),
            location: "Koramangala".into(),
            city: "Bengaluru".into(),
            seat_numbers: seats(&["C4", "J5"]),
            seat_types: seats(&["standard", "premium"]),
            seat_prices: vec![150.0, 225.0],
        };

        let detail = BookingDetail::from(row);
        assert_eq!(detail.seat_numbers(), seats(&["C4", "J5"]));
        assert_eq!(
            detail.seats[1],
            BookedSeat {
                seat_number: "J5".into(),
                seat_type: "premium".into(),
                price: 225.0,
            }
        );
        assert_eq!(detail.movie.title, "Vikram");
        assert_eq!(detail.theater.city, "Bengaluru");
    }

    #[test]
    fn retried_payment_replays_own_booking_only() {
        assert_eq!(replayed_booking(None, 5).unwrap(), None);
        assert_eq!(replayed_booking(Some((31, 5)), 5).unwrap(), Some(31));

        let err = replayed_booking(Some((31, 6)), 5).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn client_total_must_match_within_a_cent() {
        assert!(ensure_total(375.0, 375.0).is_ok());
        assert!(ensure_total(375.0, 375.009).is_ok());

        let err = ensure_total(375.0, 374.5).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("375.00"));
    }

    #[test]
    fn intent_state_decides_payability() {
        let now = Utc.with_ymd_and_hms(2030, 1, 5, 12, 0, 0).unwrap();
        let ttl = Duration::minutes(15);
        let pay = PaymentRef::Intent("pi_mock_7c1d");

        let status_of = |intent: Option<&PaymentIntent>, user: i64, total: f64| {
            check_payment(pay, intent, user, total, now, ttl).map_err(|e| e.status())
        };

        let pending = intent(5, PaymentStatus::Pending, 375.0, now);
        assert_eq!(status_of(Some(&pending), 5, 375.0), Ok(()));
        assert_eq!(status_of(None, 5, 375.0), Err(StatusCode::BAD_REQUEST));
        assert_eq!(status_of(Some(&pending), 6, 375.0), Err(StatusCode::BAD_REQUEST));
        assert_eq!(status_of(Some(&pending), 5, 400.0), Err(StatusCode::BAD_REQUEST));

        let used = intent(5, PaymentStatus::Succeeded, 375.0, now);
        assert_eq!(status_of(Some(&used), 5, 375.0), Err(StatusCode::BAD_REQUEST));
        let refunded = intent(5, PaymentStatus::Refunded, 375.0, now);
        assert_eq!(status_of(Some(&refunded), 5, 375.0), Err(StatusCode::BAD_REQUEST));
        let expired = intent(5, PaymentStatus::Expired, 375.0, now);
        assert_eq!(status_of(Some(&expired), 5, 375.0), Err(StatusCode::GONE));

        let mut stale = intent(5, PaymentStatus::Pending, 375.0, now);
        stale.created_at = now - Duration::minutes(16);
        assert_eq!(status_of(Some(&stale), 5, 375.0), Err(StatusCode::GONE));
    }

    #[test]
    fn direct_upi_payment_needs_no_prior_intent() {
        let now = Utc.with_ymd_and_hms(2030, 1, 5, 12, 0, 0).unwrap();
        let ttl = Duration::minutes(15);
        let upi = PaymentRef::parse("mock_upi_1767225600000").unwrap();

        assert!(check_payment(upi, None, 5, 375.0, now, ttl).is_ok());

        let recorded = intent(5, PaymentStatus::Succeeded, 375.0, now);
        let err = check_payment(upi, Some(&recorded), 5, 375.0, now, ttl).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn lock_request_accepts_either_seat_field() {
        let req: SeatLockRequest = serde_json::from_value(serde_json::json!({
            "showtimeId": 9,
            "seats": ["A1"],
            "sessionId": "tab-1"
        }))
        .unwrap();
        assert_eq!(req.seat_numbers, seats(&["A1"]));
    }
}
