use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum SeatType {
    Standard,
    Premium,
    Vip,
}

impl SeatType {
    pub fn multiplier(&self) -> f64 {
        match self {
            SeatType::Standard => 1.0,
            SeatType::Premium => 1.5,
            SeatType::Vip => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeatType::Standard => "standard",
            SeatType::Premium => "premium",
            SeatType::Vip => "vip",
        }
    }
}

/// `Locked` is never stored: it is derived from live seat locks at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Locked,
    Booked,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    #[serde(rename = "_id")]
    pub id: i64,
    pub showtime_id: i64,
    pub seat_number: String,
    #[sqlx(rename = "row_label")]
    pub row: String,
    pub col: i32,
    #[serde(rename = "type")]
    pub seat_type: SeatType,
    pub price: f64,
    pub status: SeatStatus,
}

pub const SEAT_COLUMNS: &str = "id, showtime_id, seat_number, row_label, col, seat_type, price, status";
