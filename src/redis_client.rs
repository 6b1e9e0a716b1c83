use redis::{aio::ConnectionManager, Client};

use crate::config::RedisConfig;

/// Shared Redis handle. The connection manager reconnects on its own after a
/// dropped connection, so clones stay usable for the life of the process.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(config: &RedisConfig) -> redis::RedisResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisClient { conn })
    }

    pub async fn ping(&self) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
