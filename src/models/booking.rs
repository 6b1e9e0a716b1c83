use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(rename = "_id")]
    pub id: i64,
    #[serde(rename = "bookingId")]
    pub booking_ref: String,
    pub user_id: i64,
    pub showtime_id: i64,
    pub total_price: f64,
    pub status: BookingStatus,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

pub const BOOKING_COLUMNS: &str = "id, booking_ref, user_id, showtime_id, total_price, status, \
     payment_intent_id, created_at, cancelled_at";

/// Human-facing booking reference, e.g. `BK-4F1A9C2E`.
pub fn new_booking_ref() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("BK-{}", id[..8].to_uppercase())
}
