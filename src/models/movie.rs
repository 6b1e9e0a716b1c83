use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use validator::Validate;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    #[serde(rename = "_id")]
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub genre: Vec<String>,
    pub duration: i32,
    pub language: String,
    pub release_date: Option<NaiveDate>,
    pub poster_url: Option<String>,
    pub rating: f64,
    pub director: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub const MOVIE_COLUMNS: &str = "id, title, description, genre, duration, language, release_date, \
     poster_url, rating, director, is_active, created_at";

impl Movie {
    /// Looks a movie up regardless of whether it is still active.
    pub async fn find(pool: &sqlx::PgPool, id: i64) -> Result<Option<Movie>, sqlx::Error> {
        sqlx::query_as::<_, Movie>(&format!("SELECT {} FROM movies WHERE id = $1", MOVIE_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateMovie {
    #[validate(length(min = 1, max = 200, message = "title is required"))]
    pub title: String,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "genre_list")]
    pub genre: Vec<String>,
    #[validate(range(min = 1, max = 600, message = "duration must be 1..=600 minutes"))]
    pub duration: i32,
    #[validate(length(min = 1, message = "language is required"))]
    pub language: String,
    pub release_date: Option<NaiveDate>,
    #[validate(url(message = "posterUrl must be a URL"))]
    pub poster_url: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 10.0, message = "rating must be 0..=10"))]
    pub rating: f64,
    pub director: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMovie {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "optional_genre_list")]
    pub genre: Option<Vec<String>>,
    #[validate(range(min = 1, max = 600))]
    pub duration: Option<i32>,
    #[validate(length(min = 1))]
    pub language: Option<String>,
    pub release_date: Option<NaiveDate>,
    #[validate(url)]
    pub poster_url: Option<String>,
    #[validate(range(min = 0.0, max = 10.0))]
    pub rating: Option<f64>,
    pub director: Option<String>,
    pub is_active: Option<bool>,
}

// The admin form posts genre as "Action, Drama"; API clients send an array.
#[derive(Deserialize)]
#[serde(untagged)]
enum GenreInput {
    List(Vec<String>),
    Text(String),
}

impl GenreInput {
    fn normalize(self) -> Vec<String> {
        let raw = match self {
            GenreInput::List(items) => items,
            GenreInput::Text(text) => text.split(',').map(String::from).collect(),
        };
        raw.into_iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect()
    }
}

fn genre_list<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    GenreInput::deserialize(d).map(GenreInput::normalize)
}

fn optional_genre_list<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<Option<Vec<String>>, D::Error> {
    Option::<GenreInput>::deserialize(d).map(|g| g.map(GenreInput::normalize))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovieSort {
    #[default]
    ReleaseDate,
    Rating,
    Title,
}

impl MovieSort {
    pub fn order_clause(&self) -> &'static str {
        match self {
            MovieSort::ReleaseDate => "release_date DESC NULLS LAST, id DESC",
            MovieSort::Rating => "rating DESC, id DESC",
            MovieSort::Title => "lower(title) ASC, id ASC",
        }
    }
}

impl FromStr for MovieSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "releaseDate" => Ok(MovieSort::ReleaseDate),
            "rating" => Ok(MovieSort::Rating),
            "title" => Ok(MovieSort::Title),
            other => Err(format!(
                "sortBy must be releaseDate | rating | title, got '{}'",
                other
            )),
        }
    }
}

pub fn sort_movies(movies: &mut [Movie], sort: MovieSort) {
    match sort {
        MovieSort::ReleaseDate => {
            // newest first, undated last
            movies.sort_by(|a, b| match (a.release_date, b.release_date) {
                (Some(x), Some(y)) => y.cmp(&x).then(b.id.cmp(&a.id)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => b.id.cmp(&a.id),
            })
        }
        MovieSort::Rating => movies.sort_by(|a, b| {
            b.rating
                .total_cmp(&a.rating)
                .then(b.id.cmp(&a.id))
        }),
        MovieSort::Title => movies.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then(a.id.cmp(&b.id))
        }),
    }
}

/// Catalog filters accepted by `GET /api/movies`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieQuery {
    pub search: Option<String>,
    pub genre: Option<String>,
    pub language: Option<String>,
    pub min_rating: Option<f64>,
    pub sort_by: Option<String>,
}

impl MovieQuery {
    pub fn is_unfiltered(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.search)
            && blank(&self.genre)
            && blank(&self.language)
            && self.min_rating.map_or(true, |r| r <= 0.0)
            && self.sort().map_or(false, |s| s == MovieSort::ReleaseDate)
    }

    pub fn sort(&self) -> Result<MovieSort, String> {
        self.sort_by.as_deref().unwrap_or_default().parse()
    }

    /// In-memory filter matching the SQL path, applied to the cached list.
    pub fn matches(&self, movie: &Movie) -> bool {
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let in_title = movie.title.to_lowercase().contains(&needle);
            let in_description = movie
                .description
                .as_deref()
                .map_or(false, |d| d.to_lowercase().contains(&needle));
            if !in_title && !in_description {
                return false;
            }
        }
        if let Some(genre) = self.genre.as_deref().filter(|s| !s.is_empty()) {
            if !movie.genre.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
                return false;
            }
        }
        if let Some(language) = self.language.as_deref().filter(|s| !s.is_empty()) {
            if !movie.language.eq_ignore_ascii_case(language) {
                return false;
            }
        }
        if let Some(min) = self.min_rating {
            if movie.rating < min {
                return false;
            }
        }
        true
    }
}
