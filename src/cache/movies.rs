use crate::cache::CacheService;
use crate::models::{movie::MOVIE_COLUMNS, Movie};
use tracing::info;

const ACTIVE_MOVIES_KEY: &str = "movies:active";
const ACTIVE_MOVIES_TTL: u64 = 3600;

impl CacheService {
    /// Active movies, newest release first.
    pub async fn active_movies(&self) -> Result<Vec<Movie>, sqlx::Error> {
        if let Some(movies) = self.get_json::<Vec<Movie>>(ACTIVE_MOVIES_KEY).await {
            return Ok(movies);
        }

        let movies = sqlx::query_as::<_, Movie>(&format!(
            "SELECT {} FROM movies WHERE is_active ORDER BY release_date DESC NULLS LAST, id DESC",
            MOVIE_COLUMNS
        ))
        .fetch_all(&self.db.pool)
        .await?;

        self.set_json(ACTIVE_MOVIES_KEY, &movies, ACTIVE_MOVIES_TTL).await;
        Ok(movies)
    }

    pub async fn invalidate_movies(&self) {
        self.delete(ACTIVE_MOVIES_KEY).await;
        info!("Invalidated movie list cache");
    }
}
