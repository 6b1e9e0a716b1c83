use redis::AsyncCommands;
use tracing::{info, warn};

use crate::cache::CacheService;
use crate::models::{seat::SEAT_COLUMNS, Seat};

const SEAT_MAP_TTL: u64 = 300;

fn generation_key(showtime_id: i64) -> String {
    format!("seats:{}:gen", showtime_id)
}

fn seat_map_key(showtime_id: i64, generation: i64) -> String {
    format!("seats:{}:v{}", showtime_id, generation)
}

impl CacheService {
    async fn seat_generation(&self, showtime_id: i64) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        let mut conn = self.redis.conn.clone();
        match conn.get::<_, Option<i64>>(generation_key(showtime_id)).await {
            Ok(generation) => Some(generation.unwrap_or(0)),
            Err(e) => {
                warn!("Seat map generation read failed for {}: {:?}", showtime_id, e);
                None
            }
        }
    }

    /// Persisted seat map of a showtime (available/booked only; locks are
    /// overlaid by the caller).
    ///
    /// Entries are keyed by the generation read before the database query.
    /// A fill that races with `invalidate_seats` lands under the old
    /// generation, which no reader asks for again.
    pub async fn seat_map(&self, showtime_id: i64) -> Result<Vec<Seat>, sqlx::Error> {
        let generation = self.seat_generation(showtime_id).await;
        if let Some(generation) = generation {
            let key = seat_map_key(showtime_id, generation);
            if let Some(seats) = self.get_json::<Vec<Seat>>(&key).await {
                return Ok(seats);
            }
        }

        let seats = sqlx::query_as::<_, Seat>(&format!(
            "SELECT {} FROM seats WHERE showtime_id = $1 ORDER BY length(row_label), row_label, col",
            SEAT_COLUMNS
        ))
        .bind(showtime_id)
        .fetch_all(&self.db.pool)
        .await?;

        if let Some(generation) = generation.filter(|_| !seats.is_empty()) {
            self.set_json(&seat_map_key(showtime_id, generation), &seats, SEAT_MAP_TTL)
                .await;
        }
        Ok(seats)
    }

    pub async fn invalidate_seats(&self, showtime_id: i64) {
        let mut conn = self.redis.conn.clone();
        match conn.incr::<_, _, i64>(generation_key(showtime_id), 1).await {
            Ok(generation) => info!(
                "Invalidated seats cache for showtime {} (generation {})",
                showtime_id, generation
            ),
            Err(e) => warn!("Seat cache invalidation failed for {}: {:?}", showtime_id, e),
        }
    }
}
