//! Admin dashboards.
//!
//! Every report is scoped to a date range taken from `startDate`/`endDate`
//! (`YYYY-MM-DD`, inclusive, UTC). Without them the last 30 days are used.
//! Revenue only counts confirmed bookings.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr, sync::Arc};

use crate::{
    error::{ApiError, ApiResult},
    middleware::AdminUser,
    models::{round2, showtime::flexible_time::YEAR_RANGE},
    AppState,
};

/// Analytics routes, mounted only when the feature is enabled.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analytics/stats", get(get_stats))
        .route("/analytics/revenue", get(get_revenue))
        .route("/analytics/occupancy", get(get_occupancy))
        .route("/analytics/users", get(get_user_analytics))
        .route("/analytics/trends", get(get_trends))
}

// --- Date ranges ---

const DEFAULT_RANGE_DAYS: i64 = 30;
const MAX_TREND_DAYS: i64 = 365;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Half-open `[start, end)` window in UTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn parse_date(name: &str, raw: Option<&str>) -> ApiResult<Option<NaiveDate>> {
    let invalid = || ApiError::BadRequest(format!("{} must be YYYY-MM-DD", name));
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => {
            let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())?;
            if !YEAR_RANGE.contains(&date.year()) {
                return Err(ApiError::BadRequest(format!(
                    "{} must be between {} and {}",
                    name,
                    YEAR_RANGE.start(),
                    YEAR_RANGE.end()
                )));
            }
            Ok(Some(date))
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn shift_days(date: NaiveDate, days: i64) -> ApiResult<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
        .ok_or_else(|| ApiError::BadRequest("date range is out of bounds".into()))
}

impl DateRangeQuery {
    pub fn resolve(&self, today: NaiveDate) -> ApiResult<DateRange> {
        let end = parse_date("endDate", self.end_date.as_deref())?.unwrap_or(today);
        let start = match parse_date("startDate", self.start_date.as_deref())? {
            Some(start) => start,
            None => shift_days(end, -DEFAULT_RANGE_DAYS)?,
        };
        if start > end {
            return Err(ApiError::BadRequest(
                "startDate must not be after endDate".into(),
            ));
        }
        Ok(DateRange {
            start: midnight(start),
            end: midnight(shift_days(end, 1)?),
        })
    }

    /// Like `resolve`, but an empty query means "all time".
    pub fn resolve_optional(&self, today: NaiveDate) -> ApiResult<Option<DateRange>> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        if blank(&self.start_date) && blank(&self.end_date) {
            return Ok(None);
        }
        self.resolve(today).map(Some)
    }
}

fn average(total: f64, count: i64) -> f64 {
    if count > 0 {
        round2(total / count as f64)
    } else {
        0.0
    }
}

// --- Overview ---

#[derive(Debug, Serialize, sqlx::FromRow)]
struct StatusCount {
    #[serde(rename = "_id")]
    status: String,
    count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct PopularMovie {
    #[serde(rename = "_id")]
    id: i64,
    title: String,
    poster_url: Option<String>,
    bookings: i64,
    revenue: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    total_bookings: i64,
    total_revenue: f64,
    avg_booking_value: f64,
    bookings_by_status: Vec<StatusCount>,
    popular_movies: Vec<PopularMovie>,
}

/// GET /api/analytics/stats
async fn get_stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<DateRangeQuery>,
) -> ApiResult<Json<StatsResponse>> {
    let range = query.resolve(Utc::now().date_naive())?;
    let pool = &state.db.pool;

    let totals = sqlx::query_as::<_, (i64, i64, f64)>(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE status = 'confirmed'),
               COALESCE(SUM(total_price) FILTER (WHERE status = 'confirmed'), 0)::float8
        FROM bookings
        WHERE created_at >= $1 AND created_at < $2
        "#,
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_one(pool);

    let by_status = sqlx::query_as::<_, StatusCount>(
        r#"
        SELECT status, COUNT(*) AS count
        FROM bookings
        WHERE created_at >= $1 AND created_at < $2
        GROUP BY status
        ORDER BY status
        "#,
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool);

    let popular = sqlx::query_as::<_, PopularMovie>(
        r#"
        SELECT m.id, m.title, m.poster_url,
               COUNT(b.id) AS bookings,
               COALESCE(SUM(b.total_price), 0)::float8 AS revenue
        FROM bookings b
        JOIN showtimes st ON st.id = b.showtime_id
        JOIN movies m ON m.id = st.movie_id
        WHERE b.status = 'confirmed' AND b.created_at >= $1 AND b.created_at < $2
        GROUP BY m.id
        ORDER BY bookings DESC, revenue DESC
        LIMIT 5
        "#,
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool);

    let ((total_bookings, confirmed, revenue), bookings_by_status, popular_movies) =
        futures::try_join!(totals, by_status, popular)?;

    Ok(Json(StatsResponse {
        total_bookings,
        total_revenue: round2(revenue),
        avg_booking_value: average(revenue, confirmed),
        bookings_by_status,
        popular_movies: popular_movies
            .into_iter()
            .map(|m| PopularMovie {
                revenue: round2(m.revenue),
                ..m
            })
            .collect(),
    }))
}

// --- Revenue ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum GroupBy {
    #[default]
    Day,
    Week,
    Month,
}

impl GroupBy {
    /// `to_char` pattern; the labels sort chronologically as text.
    fn period_format(&self) -> &'static str {
        match self {
            GroupBy::Day => "YYYY-MM-DD",
            GroupBy::Week => "IYYY-\"W\"IW",
            GroupBy::Month => "YYYY-MM",
        }
    }
}

impl FromStr for GroupBy {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "day" => Ok(GroupBy::Day),
            "week" => Ok(GroupBy::Week),
            "month" => Ok(GroupBy::Month),
            other => Err(ApiError::BadRequest(format!(
                "groupBy must be day | week | month, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevenueQuery {
    #[serde(flatten)]
    range: DateRangeQuery,
    group_by: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct RevenuePoint {
    #[serde(rename = "_id")]
    period: String,
    revenue: f64,
    bookings: i64,
}

/// GET /api/analytics/revenue
async fn get_revenue(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<RevenueQuery>,
) -> ApiResult<Json<Vec<RevenuePoint>>> {
    let group_by: GroupBy = query.group_by.as_deref().unwrap_or_default().parse()?;
    let range = query.range.resolve(Utc::now().date_naive())?;

    let points = sqlx::query_as::<_, RevenuePoint>(&format!(
        r#"
        SELECT to_char(created_at AT TIME ZONE 'UTC', '{}') AS period,
               COALESCE(SUM(total_price), 0)::float8 AS revenue,
               COUNT(*) AS bookings
        FROM bookings
        WHERE status = 'confirmed' AND created_at >= $1 AND created_at < $2
        GROUP BY period
        ORDER BY period
        "#,
        group_by.period_format()
    ))
    .bind(range.start)
    .bind(range.end)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(
        points
            .into_iter()
            .map(|p| RevenuePoint {
                revenue: round2(p.revenue),
                ..p
            })
            .collect(),
    ))
}

// --- Occupancy ---

#[derive(sqlx::FromRow)]
struct OccupancyRow {
    id: i64,
    theater_name: String,
    city: String,
    location: String,
    total_bookings: i64,
    total_seats_booked: i64,
    total_seats: i64,
    revenue: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TheaterOccupancy {
    #[serde(rename = "_id")]
    id: i64,
    theater_name: String,
    city: String,
    location: String,
    total_bookings: i64,
    total_seats_booked: i64,
    total_seats: i64,
    occupancy_rate: f64,
    revenue: f64,
}

/// Percentage of seats booked, two decimals.
fn occupancy_rate(booked: i64, total: i64) -> f64 {
    if total > 0 {
        round2(booked as f64 * 100.0 / total as f64)
    } else {
        0.0
    }
}

/// GET /api/analytics/occupancy
async fn get_occupancy(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<DateRangeQuery>,
) -> ApiResult<Json<Vec<TheaterOccupancy>>> {
    let range = query.resolve(Utc::now().date_naive())?;

    // bookings by booking date, seats by screening date
    let rows = sqlx::query_as::<_, OccupancyRow>(
        r#"
        SELECT t.id, t.name AS theater_name, t.city, t.location,
               COALESCE(bk.total_bookings, 0) AS total_bookings,
               COALESCE(se.booked, 0) AS total_seats_booked,
               COALESCE(se.total, 0) AS total_seats,
               COALESCE(bk.revenue, 0)::float8 AS revenue
        FROM theaters t
        LEFT JOIN (
            SELECT st.theater_id, COUNT(*) AS total_bookings, SUM(b.total_price) AS revenue
            FROM bookings b
            JOIN showtimes st ON st.id = b.showtime_id
            WHERE b.status = 'confirmed' AND b.created_at >= $1 AND b.created_at < $2
            GROUP BY st.theater_id
        ) bk ON bk.theater_id = t.id
        LEFT JOIN (
            SELECT st.theater_id,
                   COUNT(*) FILTER (WHERE s.status = 'booked') AS booked,
                   COUNT(*) AS total
            FROM seats s
            JOIN showtimes st ON st.id = s.showtime_id
            WHERE st.start_time >= $1 AND st.start_time < $2
            GROUP BY st.theater_id
        ) se ON se.theater_id = t.id
        ORDER BY revenue DESC, t.name
        "#,
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|r| TheaterOccupancy {
                occupancy_rate: occupancy_rate(r.total_seats_booked, r.total_seats),
                id: r.id,
                theater_name: r.theater_name,
                city: r.city,
                location: r.location,
                total_bookings: r.total_bookings,
                total_seats_booked: r.total_seats_booked,
                total_seats: r.total_seats,
                revenue: round2(r.revenue),
            })
            .collect(),
    ))
}

// --- Users ---

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct TopCustomer {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    email: String,
    bookings: i64,
    spent: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserAnalytics {
    total_users: i64,
    new_users: i64,
    active_users: i64,
    top_customers: Vec<TopCustomer>,
}

/// GET /api/analytics/users
async fn get_user_analytics(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<DateRangeQuery>,
) -> ApiResult<Json<UserAnalytics>> {
    let range = query.resolve(Utc::now().date_naive())?;
    let pool = &state.db.pool;

    let counts = sqlx::query_as::<_, (i64, i64)>(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE created_at >= $1 AND created_at < $2) FROM users",
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_one(pool);

    let active = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(DISTINCT user_id) FROM bookings WHERE created_at >= $1 AND created_at < $2",
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_one(pool);

    let top = sqlx::query_as::<_, TopCustomer>(
        r#"
        SELECT u.id, u.name, u.email,
               COUNT(b.id) AS bookings,
               COALESCE(SUM(b.total_price), 0)::float8 AS spent
        FROM bookings b
        JOIN users u ON u.id = b.user_id
        WHERE b.status = 'confirmed' AND b.created_at >= $1 AND b.created_at < $2
        GROUP BY u.id
        ORDER BY spent DESC, bookings DESC
        LIMIT 10
        "#,
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool);

    let ((total_users, new_users), active_users, top_customers) =
        futures::try_join!(counts, active, top)?;

    Ok(Json(UserAnalytics {
        total_users,
        new_users,
        active_users,
        top_customers: top_customers
            .into_iter()
            .map(|c| TopCustomer {
                spent: round2(c.spent),
                ..c
            })
            .collect(),
    }))
}

// --- Trends ---

#[derive(Debug, Deserialize)]
struct TrendsQuery {
    period: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrendPoint {
    date: NaiveDate,
    bookings: i64,
    revenue: f64,
    avg_booking_value: f64,
}

/// One point per day from `first` for `days` days; missing days are zero.
fn fill_trend(first: NaiveDate, days: i64, rows: &[(NaiveDate, i64, f64)]) -> Vec<TrendPoint> {
    let by_day: HashMap<NaiveDate, (i64, f64)> = rows
        .iter()
        .map(|(day, bookings, revenue)| (*day, (*bookings, *revenue)))
        .collect();

    (0..days)
        .map(|offset| {
            let date = first + Duration::days(offset);
            let (bookings, revenue) = by_day.get(&date).copied().unwrap_or((0, 0.0));
            TrendPoint {
                date,
                bookings,
                revenue: round2(revenue),
                avg_booking_value: average(revenue, bookings),
            }
        })
        .collect()
}

/// GET /api/analytics/trends
async fn get_trends(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<TrendsQuery>,
) -> ApiResult<Json<Vec<TrendPoint>>> {
    let days = query.period.unwrap_or(DEFAULT_RANGE_DAYS);
    if !(1..=MAX_TREND_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(format!(
            "period must be between 1 and {}",
            MAX_TREND_DAYS
        )));
    }

    let first = Utc::now().date_naive() - Duration::days(days - 1);
    let rows = sqlx::query_as::<_, (NaiveDate, i64, f64)>(
        r#"
        SELECT (created_at AT TIME ZONE 'UTC')::date AS day,
               COUNT(*),
               COALESCE(SUM(total_price), 0)::float8
        FROM bookings
        WHERE status = 'confirmed' AND created_at >= $1
        GROUP BY day
        "#,
    )
    .bind(midnight(first))
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(fill_trend(first, days, &rows)))
}
