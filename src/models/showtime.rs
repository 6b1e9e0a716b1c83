use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Turnaround between two screenings in the same auditorium.
pub const CLEANING_GAP_MINUTES: i64 = 15;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Showtime {
    #[serde(rename = "_id")]
    pub id: i64,
    pub movie_id: i64,
    pub theater_id: i64,
    pub screen_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

pub const SHOWTIME_COLUMNS: &str =
    "id, movie_id, theater_id, screen_name, start_time, end_time, price, created_at";

impl Showtime {
    pub async fn find(pool: &sqlx::PgPool, id: i64) -> Result<Option<Showtime>, sqlx::Error> {
        sqlx::query_as::<_, Showtime>(&format!(
            "SELECT {} FROM showtimes WHERE id = $1",
            SHOWTIME_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now
    }
}

/// End of the slot a screening occupies, including turnaround. `None` when
/// the slot would run past the representable calendar.
pub fn slot_end(start: DateTime<Utc>, duration_minutes: i32) -> Option<DateTime<Utc>> {
    start.checked_add_signed(Duration::minutes(
        i64::from(duration_minutes) + CLEANING_GAP_MINUTES,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShowtime {
    pub movie_id: i64,
    pub theater_id: i64,
    #[serde(default = "default_screen_name")]
    pub screen_name: String,
    #[serde(deserialize_with = "crate::models::showtime::flexible_time::deserialize")]
    pub start_time: DateTime<Utc>,
    pub price: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShowtime {
    #[serde(default, deserialize_with = "crate::models::showtime::flexible_time::deserialize_opt")]
    pub start_time: Option<DateTime<Utc>>,
    pub price: Option<f64>,
}

fn default_screen_name() -> String {
    "Screen 1".to_string()
}

/// Accepts RFC 3339 as well as the `YYYY-MM-DDTHH:MM` value a
/// `datetime-local` input produces (read as UTC).
pub mod flexible_time {
    use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    /// Schedules are only accepted within these years.
    pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1970..=9999;

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let parsed = match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| naive.and_utc()),
        };
        parsed.filter(|dt| YEAR_RANGE.contains(&dt.year()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid startTime '{}'", raw)))
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid startTime '{}'", raw))),
        }
    }
}
