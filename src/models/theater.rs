use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use std::collections::HashSet;
use validator::{Validate, ValidationError};

pub const MAX_ROWS: u32 = 26;
pub const MAX_COLS: u32 = 40;

/// One auditorium of a theater and its seating grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screen {
    pub name: String,
    pub rows: u32,
    pub cols: u32,
    #[serde(default)]
    pub premium_rows: Vec<String>,
    #[serde(default)]
    pub vip_rows: Vec<String>,
}

impl Screen {
    pub fn capacity(&self) -> u32 {
        self.rows * self.cols
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theater {
    #[serde(rename = "_id")]
    pub id: i64,
    pub name: String,
    pub location: String,
    pub city: String,
    pub image: Option<String>,
    pub screens: Json<Vec<Screen>>,
    pub created_at: DateTime<Utc>,
}

impl Theater {
    pub async fn find(pool: &sqlx::PgPool, id: i64) -> Result<Option<Theater>, sqlx::Error> {
        sqlx::query_as::<_, Theater>(&format!(
            "SELECT {} FROM theaters WHERE id = $1",
            THEATER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub fn screen(&self, name: &str) -> Option<&Screen> {
        self.screens.0.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

pub const THEATER_COLUMNS: &str = "id, name, location, city, image, screens, created_at";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TheaterInput {
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 300, message = "location is required"))]
    pub location: String,
    #[serde(default)]
    pub city: String,
    pub image: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_screens"))]
    pub screens: Vec<Screen>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TheaterQuery {
    pub city: Option<String>,
    pub search: Option<String>,
}

pub fn validate_screens(screens: &[Screen]) -> Result<(), ValidationError> {
    let mut names = HashSet::new();
    for screen in screens {
        if screen.name.trim().is_empty() {
            return Err(screen_error("screen name is required"));
        }
        if !names.insert(screen.name.to_lowercase()) {
            return Err(screen_error("screen names must be unique"));
        }
        if !(1..=MAX_ROWS).contains(&screen.rows) {
            return Err(screen_error("screen rows must be 1..=26"));
        }
        if !(1..=MAX_COLS).contains(&screen.cols) {
            return Err(screen_error("screen cols must be 1..=40"));
        }
        let labels: HashSet<String> = (0..screen.rows)
            .map(crate::services::seat_layout::row_label)
            .collect();
        let out_of_range = screen
            .premium_rows
            .iter()
            .chain(screen.vip_rows.iter())
            .any(|r| !labels.contains(&r.to_uppercase()));
        if out_of_range {
            return Err(screen_error("premium/vip rows must name existing rows"));
        }
    }
    Ok(())
}

fn screen_error(message: &'static str) -> ValidationError {
    let mut err = ValidationError::new("screens");
    err.message = Some(message.into());
    err
}
