use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::{ApiError, ApiResult},
    middleware::AdminUser,
    models::{
        movie::{sort_movies, CreateMovie, MovieQuery, UpdateMovie, MOVIE_COLUMNS},
        Movie, Seat, SeatStatus, Showtime, Theater,
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/movies", get(list_movies).post(create_movie))
        .route("/movies/admin/all", get(list_all_movies))
        .route("/movies/showtime/{id}", get(get_showtime))
        .route(
            "/movies/{id}",
            get(get_movie).put(update_movie).delete(delete_movie),
        )
        .route("/movies/{id}/showtimes", get(movie_showtimes))
}

/* ---------- CATALOG ---------- */

// GET /api/movies
async fn list_movies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MovieQuery>,
) -> ApiResult<Json<Vec<Movie>>> {
    let sort = query.sort().map_err(ApiError::BadRequest)?;
    let movies = state.cache.active_movies().await?;
    if query.is_unfiltered() {
        return Ok(Json(movies));
    }

    let mut movies: Vec<Movie> = movies.into_iter().filter(|m| query.matches(m)).collect();
    sort_movies(&mut movies, sort);
    Ok(Json(movies))
}

// GET /api/movies/{id}
async fn get_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Movie>> {
    Movie::find(&state.db.pool, id)
        .await?
        .filter(|m| m.is_active)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Movie"))
}

#[derive(Debug, Deserialize)]
struct ShowtimesQuery {
    date: Option<NaiveDate>,
    city: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TheaterSummary {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    location: String,
    city: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MovieShowtime {
    #[serde(rename = "_id")]
    id: i64,
    screen_name: String,
    start_time: DateTime<Utc>,
    price: f64,
    available_seats: i64,
    theater: TheaterSummary,
}

#[derive(sqlx::FromRow)]
struct MovieShowtimeRow {
    id: i64,
    screen_name: String,
    start_time: DateTime<Utc>,
    price: f64,
    available_seats: i64,
    theater_id: i64,
    theater_name: String,
    location: String,
    city: String,
}

// GET /api/movies/{id}/showtimes
async fn movie_showtimes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<ShowtimesQuery>,
) -> ApiResult<Json<Vec<MovieShowtime>>> {
    if Movie::find(&state.db.pool, id).await?.is_none() {
        return Err(ApiError::not_found("Movie"));
    }

    let city = params
        .city
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let rows = sqlx::query_as::<_, MovieShowtimeRow>(
        r#"
        SELECT st.id, st.screen_name, st.start_time, st.price,
               COUNT(s.id) FILTER (WHERE s.status = 'available') AS available_seats,
               t.id AS theater_id, t.name AS theater_name, t.location, t.city
        FROM showtimes st
        JOIN theaters t ON t.id = st.theater_id
        LEFT JOIN seats s ON s.showtime_id = st.id
        WHERE st.movie_id = $1
          AND st.start_time > NOW()
          AND ($2::date IS NULL OR (st.start_time AT TIME ZONE 'UTC')::date = $2)
          AND ($3::text IS NULL OR lower(t.city) = lower($3))
        GROUP BY st.id, t.id
        ORDER BY st.start_time, t.name
        "#,
    )
    .bind(id)
    .bind(params.date)
    .bind(city)
    .fetch_all(&state.db.pool)
    .await?;

    let showtimes = rows
        .into_iter()
        .map(|r| MovieShowtime {
            id: r.id,
            screen_name: r.screen_name,
            start_time: r.start_time,
            price: r.price,
            available_seats: r.available_seats,
            theater: TheaterSummary {
                id: r.theater_id,
                name: r.theater_name,
                location: r.location,
                city: r.city,
            },
        })
        .collect();

    Ok(Json(showtimes))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShowtimeDetail {
    #[serde(rename = "_id")]
    id: i64,
    screen_name: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    price: f64,
    movie: Movie,
    theater: Theater,
    seats: Vec<Seat>,
    available_seats: usize,
    lock_ttl_seconds: u64,
}

// GET /api/movies/showtime/{id}
async fn get_showtime(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ShowtimeDetail>> {
    let showtime = Showtime::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Showtime"))?;

    let (movie, theater, seats) = futures::try_join!(
        Movie::find(&state.db.pool, showtime.movie_id),
        Theater::find(&state.db.pool, showtime.theater_id),
        state.cache.seat_map(showtime.id),
    )?;
    let movie = movie.ok_or_else(|| ApiError::not_found("Movie"))?;
    let theater = theater.ok_or_else(|| ApiError::not_found("Theater"))?;

    let mut seats = seats;
    state.locks.overlay(showtime.id, &mut seats).await;
    let available_seats = seats
        .iter()
        .filter(|s| s.status == SeatStatus::Available)
        .count();

    Ok(Json(ShowtimeDetail {
        id: showtime.id,
        screen_name: showtime.screen_name,
        start_time: showtime.start_time,
        end_time: showtime.end_time,
        price: showtime.price,
        movie,
        theater,
        seats,
        available_seats,
        lock_ttl_seconds: state.locks.ttl_seconds(),
    }))
}

/* ---------- ADMIN ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminMoviesQuery {
    sort_by: Option<String>,
}

// GET /api/movies/admin/all
async fn list_all_movies(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(params): Query<AdminMoviesQuery>,
) -> ApiResult<Json<Vec<Movie>>> {
    let sort: crate::models::movie::MovieSort = params
        .sort_by
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(ApiError::BadRequest)?;

    let movies = sqlx::query_as::<_, Movie>(&format!(
        "SELECT {} FROM movies ORDER BY {}",
        MOVIE_COLUMNS,
        sort.order_clause()
    ))
    .fetch_all(&state.db.pool)
    .await?;
    Ok(Json(movies))
}

// POST /api/movies
async fn create_movie(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreateMovie>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let movie = sqlx::query_as::<_, Movie>(&format!(
        "INSERT INTO movies (title, description, genre, duration, language, release_date,
                             poster_url, rating, director)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING {}",
        MOVIE_COLUMNS
    ))
    .bind(req.title.trim())
    .bind(&req.description)
    .bind(&req.genre)
    .bind(req.duration)
    .bind(req.language.trim())
    .bind(req.release_date)
    .bind(&req.poster_url)
    .bind(req.rating)
    .bind(&req.director)
    .fetch_one(&state.db.pool)
    .await?;

    state.cache.invalidate_movies().await;
    tracing::info!("Admin {} created movie {} '{}'", admin.user_id, movie.id, movie.title);
    Ok((StatusCode::CREATED, Json(movie)))
}

// PUT /api/movies/{id}
async fn update_movie(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMovie>,
) -> ApiResult<Json<Movie>> {
    req.validate()?;

    let movie = sqlx::query_as::<_, Movie>(&format!(
        "UPDATE movies SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            genre = COALESCE($4, genre),
            duration = COALESCE($5, duration),
            language = COALESCE($6, language),
            release_date = COALESCE($7, release_date),
            poster_url = COALESCE($8, poster_url),
            rating = COALESCE($9, rating),
            director = COALESCE($10, director),
            is_active = COALESCE($11, is_active)
         WHERE id = $1
         RETURNING {}",
        MOVIE_COLUMNS
    ))
    .bind(id)
    .bind(req.title.as_deref().map(str::trim))
    .bind(&req.description)
    .bind(&req.genre)
    .bind(req.duration)
    .bind(req.language.as_deref().map(str::trim))
    .bind(req.release_date)
    .bind(&req.poster_url)
    .bind(req.rating)
    .bind(&req.director)
    .bind(req.is_active)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Movie"))?;

    state.cache.invalidate_movies().await;
    Ok(Json(movie))
}

// DELETE /api/movies/{id}
async fn delete_movie(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    if Movie::find(&state.db.pool, id).await?.is_none() {
        return Err(ApiError::not_found("Movie"));
    }

    let has_live_bookings = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM showtimes st
            JOIN bookings b ON b.showtime_id = st.id
            WHERE st.movie_id = $1 AND st.start_time > NOW() AND b.status = 'confirmed'
        )
        "#,
    )
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;

    if has_live_bookings {
        return Err(ApiError::Conflict(
            "Movie has upcoming showtimes with confirmed bookings".into(),
        ));
    }

    // soft delete keeps past bookings and analytics intact
    sqlx::query("UPDATE movies SET is_active = FALSE WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await?;

    state.cache.invalidate_movies().await;
    tracing::info!("Admin {} deactivated movie {}", admin.user_id, id);
    Ok(Json(serde_json::json!({ "success": true, "message": "Movie removed" })))
}
