use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use crate::{database::Database, redis_client::RedisClient};

pub mod movies;
pub mod seats;

/// Read-through JSON cache in front of the database. Redis failures are
/// logged and fall back to the database; they never fail a request.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
    enabled: bool,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database, enabled: bool) -> Self {
        Self { redis, db, enabled }
    }

    pub async fn warmup_cache(&self) {
        if !self.enabled {
            return;
        }
        info!("Starting cache warmup...");
        match self.active_movies().await {
            Ok(movies) => info!("Cache warmup done: {} movies", movies.len()),
            Err(e) => warn!("Cache warmup failed: {:?}", e),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let mut conn = self.redis.conn.clone();
        let raw: Option<String> = match conn.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache read failed for {}: {:?}", key, e);
                return None;
            }
        };
        raw.and_then(|data| match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping unreadable cache entry {}: {:?}", key, e);
                None
            }
        })
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_seconds: u64) {
        if !self.enabled {
            return;
        }
        let data = match serde_json::to_string(value) {
            Ok(data) => data,
            Err(e) => {
                warn!("Cache serialize failed for {}: {:?}", key, e);
                return;
            }
        };
        let mut conn = self.redis.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, data, ttl_seconds).await {
            warn!("Cache write failed for {}: {:?}", key, e);
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.redis.conn.clone();
        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!("Cache invalidation failed for {}: {:?}", key, e);
        }
    }
}
