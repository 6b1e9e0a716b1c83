use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json as SqlJson;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::{ApiError, ApiResult},
    middleware::AdminUser,
    models::{
        round2,
        showtime::{slot_end, CreateShowtime, UpdateShowtime, SHOWTIME_COLUMNS},
        theater::{TheaterInput, TheaterQuery, THEATER_COLUMNS},
        Movie, SeatType, Showtime, Theater,
    },
    services::seat_layout,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/theaters", get(list_theaters).post(create_theater))
        .route("/theaters/showtimes", post(create_showtime))
        .route("/theaters/showtimes/all", get(list_all_showtimes))
        .route(
            "/theaters/showtimes/{id}",
            put(update_showtime).delete(delete_showtime),
        )
        .route(
            "/theaters/{id}",
            get(get_theater).put(update_theater).delete(delete_theater),
        )
}

/* ---------- helpers ---------- */

/// Id of a showtime on the same screen whose slot collides with
/// `[start, end)`, ignoring `exclude`. Run it inside the transaction that
/// holds the theater row lock so two writers cannot both see a free slot.
async fn conflicting_showtime(
    conn: &mut sqlx::PgConnection,
    theater_id: i64,
    screen_name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<i64>,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT st.id FROM showtimes st
        WHERE st.theater_id = $1
          AND lower(st.screen_name) = lower($2)
          AND ($5::bigint IS NULL OR st.id <> $5)
          AND st.start_time < $4
          AND st.end_time > $3
        LIMIT 1
        "#,
    )
    .bind(theater_id)
    .bind(screen_name)
    .bind(start)
    .bind(end)
    .bind(exclude)
    .fetch_optional(&mut *conn)
    .await
}

/// Serializes schedule changes per theater for the rest of the transaction.
async fn lock_theater(conn: &mut sqlx::PgConnection, theater_id: i64) -> ApiResult<()> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM theaters WHERE id = $1 FOR UPDATE")
        .bind(theater_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("Theater"))
}

fn screen_free(screen_name: &str, conflict: Option<i64>) -> ApiResult<()> {
    match conflict {
        None => Ok(()),
        Some(other) => Err(ApiError::Conflict(format!(
            "Screen '{}' is already booked by showtime {} in that slot",
            screen_name, other
        ))),
    }
}

fn slot_for(start: DateTime<Utc>, duration_minutes: i32) -> ApiResult<DateTime<Utc>> {
    slot_end(start, duration_minutes)
        .ok_or_else(|| ApiError::BadRequest("startTime is out of range".into()))
}

/// Bookings keep their showtime for history, so any booking blocks removal.
fn showtime_removable(confirmed: i64, cancelled: i64) -> ApiResult<()> {
    if confirmed > 0 {
        return Err(ApiError::Conflict(format!(
            "Showtime has {} confirmed booking(s)",
            confirmed
        )));
    }
    if cancelled > 0 {
        return Err(ApiError::Conflict(format!(
            "Showtime has {} cancelled booking(s) on record",
            cancelled
        )));
    }
    Ok(())
}

fn theater_removable(upcoming: i64, with_bookings: i64) -> ApiResult<()> {
    if upcoming > 0 {
        return Err(ApiError::Conflict(
            "Theater has upcoming showtimes; remove them first".into(),
        ));
    }
    if with_bookings > 0 {
        return Err(ApiError::Conflict(format!(
            "Theater has {} showtime(s) with bookings on record",
            with_bookings
        )));
    }
    Ok(())
}

fn validate_price(price: f64) -> ApiResult<f64> {
    if !price.is_finite() || price <= 0.0 {
        return Err(ApiError::BadRequest("price must be greater than 0".into()));
    }
    Ok(round2(price))
}

fn ensure_future(start: DateTime<Utc>) -> ApiResult<()> {
    if start <= Utc::now() {
        return Err(ApiError::BadRequest("startTime must be in the future".into()));
    }
    Ok(())
}

/* ---------- THEATERS ---------- */

// GET /api/theaters
async fn list_theaters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TheaterQuery>,
) -> ApiResult<Json<Vec<Theater>>> {
    let city = params.city.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()));

    let theaters = sqlx::query_as::<_, Theater>(&format!(
        "SELECT {} FROM theaters
         WHERE ($1::text IS NULL OR lower(city) = lower($1))
           AND ($2::text IS NULL OR lower(name) LIKE $2 OR lower(location) LIKE $2)
         ORDER BY name",
        THEATER_COLUMNS
    ))
    .bind(city)
    .bind(search)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(theaters))
}

// GET /api/theaters/{id}
async fn get_theater(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Theater>> {
    Theater::find(&state.db.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Theater"))
}

// POST /api/theaters
async fn create_theater(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<TheaterInput>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let theater = sqlx::query_as::<_, Theater>(&format!(
        "INSERT INTO theaters (name, location, city, image, screens)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {}",
        THEATER_COLUMNS
    ))
    .bind(req.name.trim())
    .bind(req.location.trim())
    .bind(req.city.trim())
    .bind(&req.image)
    .bind(SqlJson(&req.screens))
    .fetch_one(&state.db.pool)
    .await?;

    tracing::info!("Admin {} created theater {} '{}'", admin.user_id, theater.id, theater.name);
    Ok((StatusCode::CREATED, Json(theater)))
}

// PUT /api/theaters/{id}
async fn update_theater(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<TheaterInput>,
) -> ApiResult<Json<Theater>> {
    req.validate()?;

    let theater = sqlx::query_as::<_, Theater>(&format!(
        "UPDATE theaters SET name = $2, location = $3, city = $4, image = $5, screens = $6
         WHERE id = $1
         RETURNING {}",
        THEATER_COLUMNS
    ))
    .bind(id)
    .bind(req.name.trim())
    .bind(req.location.trim())
    .bind(req.city.trim())
    .bind(&req.image)
    .bind(SqlJson(&req.screens))
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Theater"))?;

    Ok(Json(theater))
}

// DELETE /api/theaters/{id}
async fn delete_theater(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state.db.pool.begin().await?;
    lock_theater(&mut *tx, id).await?;

    let (upcoming, with_bookings) = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT COUNT(*) FILTER (WHERE st.start_time > NOW()),
               COUNT(*) FILTER (WHERE EXISTS (SELECT 1 FROM bookings b WHERE b.showtime_id = st.id))
        FROM showtimes st
        WHERE st.theater_id = $1
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    theater_removable(upcoming, with_bookings)?;

    // only unsold past screenings remain; their seats cascade
    sqlx::query("DELETE FROM showtimes WHERE theater_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM theaters WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!("Admin {} deleted theater {}", admin.user_id, id);
    Ok(Json(serde_json::json!({ "success": true, "message": "Theater removed" })))
}

/* ---------- SHOWTIMES ---------- */

// POST /api/theaters/showtimes
async fn create_showtime(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreateShowtime>,
) -> ApiResult<impl IntoResponse> {
    let price = validate_price(req.price)?;
    ensure_future(req.start_time)?;

    let pool = &state.db.pool;
    let (movie, theater) = futures::try_join!(
        Movie::find(pool, req.movie_id),
        Theater::find(pool, req.theater_id),
    )?;
    let movie = movie.ok_or_else(|| ApiError::not_found("Movie"))?;
    let theater = theater.ok_or_else(|| ApiError::not_found("Theater"))?;

    let screen_name = req.screen_name.trim();
    let screen = theater
        .screen(screen_name)
        .cloned()
        .unwrap_or_else(|| seat_layout::default_screen(screen_name));

    let end = slot_for(req.start_time, movie.duration)?;
    let seats = seat_layout::generate(&screen, price);

    let mut tx = pool.begin().await?;
    lock_theater(&mut *tx, theater.id).await?;
    let conflict =
        conflicting_showtime(&mut *tx, theater.id, &screen.name, req.start_time, end, None).await?;
    screen_free(&screen.name, conflict)?;

    let showtime = sqlx::query_as::<_, Showtime>(&format!(
        "INSERT INTO showtimes (movie_id, theater_id, screen_name, start_time, end_time, price)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {}",
        SHOWTIME_COLUMNS
    ))
    .bind(movie.id)
    .bind(theater.id)
    .bind(&screen.name)
    .bind(req.start_time)
    .bind(end)
    .bind(price)
    .fetch_one(&mut *tx)
    .await?;

    let numbers: Vec<String> = seats.iter().map(|s| s.seat_number.clone()).collect();
    let rows: Vec<String> = seats.iter().map(|s| s.row.clone()).collect();
    let cols: Vec<i32> = seats.iter().map(|s| s.col).collect();
    let types: Vec<String> = seats
        .iter()
        .map(|s| s.seat_type.as_str().to_string())
        .collect();
    let prices: Vec<f64> = seats.iter().map(|s| s.price).collect();

    sqlx::query(
        r#"
        INSERT INTO seats (showtime_id, seat_number, row_label, col, seat_type, price)
        SELECT $1, * FROM UNNEST($2::text[], $3::text[], $4::int[], $5::text[], $6::float8[])
        "#,
    )
    .bind(showtime.id)
    .bind(&numbers)
    .bind(&rows)
    .bind(&cols)
    .bind(&types)
    .bind(&prices)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Admin {} scheduled showtime {} ({} on {} at {}, {} seats)",
        admin.user_id,
        showtime.id,
        movie.title,
        screen.name,
        showtime.start_time,
        seats.len()
    );
    Ok((StatusCode::CREATED, Json(showtime)))
}

// PUT /api/theaters/showtimes/{id}
async fn update_showtime(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateShowtime>,
) -> ApiResult<Json<Showtime>> {
    let pool = &state.db.pool;
    let current = Showtime::find(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Showtime"))?;

    let price = req.price.map(validate_price).transpose()?;
    let start = req.start_time.unwrap_or(current.start_time);
    let mut end = current.end_time;

    let mut tx = pool.begin().await?;
    if let Some(new_start) = req.start_time {
        ensure_future(new_start)?;
        let movie = Movie::find(pool, current.movie_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Movie"))?;
        end = slot_for(new_start, movie.duration)?;

        lock_theater(&mut *tx, current.theater_id).await?;
        let conflict = conflicting_showtime(
            &mut *tx,
            current.theater_id,
            &current.screen_name,
            new_start,
            end,
            Some(id),
        )
        .await?;
        screen_free(&current.screen_name, conflict)?;
    }

    let showtime = sqlx::query_as::<_, Showtime>(&format!(
        "UPDATE showtimes SET start_time = $2, end_time = $3, price = COALESCE($4, price)
         WHERE id = $1
         RETURNING {}",
        SHOWTIME_COLUMNS
    ))
    .bind(id)
    .bind(start)
    .bind(end)
    .bind(price)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Showtime"))?;

    if let Some(price) = price {
        // booked seats keep the price they were sold at
        for seat_type in [SeatType::Standard, SeatType::Premium, SeatType::Vip] {
            sqlx::query(
                "UPDATE seats SET price = $3
                 WHERE showtime_id = $1 AND seat_type = $2 AND status = 'available'",
            )
            .bind(id)
            .bind(seat_type)
            .bind(seat_layout::price_for(seat_type, price))
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    if price.is_some() {
        state.cache.invalidate_seats(id).await;
    }
    Ok(Json(showtime))
}

// DELETE /api/theaters/showtimes/{id}
async fn delete_showtime(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state.db.pool.begin().await?;

    // conflicts with the FOR SHARE lock a finalizing booking holds
    sqlx::query_scalar::<_, i64>("SELECT id FROM showtimes WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Showtime"))?;

    let (confirmed, cancelled) = sqlx::query_as::<_, (i64, i64)>(
        "SELECT COUNT(*) FILTER (WHERE status <> 'cancelled'),
                COUNT(*) FILTER (WHERE status = 'cancelled')
         FROM bookings WHERE showtime_id = $1",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    showtime_removable(confirmed, cancelled)?;

    sqlx::query("DELETE FROM showtimes WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    state.cache.invalidate_seats(id).await;

    tracing::info!("Admin {} deleted showtime {}", admin.user_id, id);
    Ok(Json(serde_json::json!({ "success": true, "message": "Showtime removed" })))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct ShowtimeOverview {
    #[serde(rename = "_id")]
    id: i64,
    movie_id: i64,
    movie_title: String,
    theater_id: i64,
    theater_name: String,
    city: String,
    screen_name: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    price: f64,
    booked_seats: i64,
    total_seats: i64,
}

// GET /api/theaters/showtimes/all
async fn list_all_showtimes(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<ShowtimeOverview>>> {
    let showtimes = sqlx::query_as::<_, ShowtimeOverview>(
        r#"
        SELECT st.id, st.movie_id, m.title AS movie_title,
               st.theater_id, t.name AS theater_name, t.city,
               st.screen_name, st.start_time, st.end_time, st.price,
               COUNT(s.id) FILTER (WHERE s.status = 'booked') AS booked_seats,
               COUNT(s.id) AS total_seats
        FROM showtimes st
        JOIN movies m ON m.id = st.movie_id
        JOIN theaters t ON t.id = st.theater_id
        LEFT JOIN seats s ON s.showtime_id = st.id
        GROUP BY st.id, m.id, t.id
        ORDER BY st.start_time DESC
        "#,
    )
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(showtimes))
}
