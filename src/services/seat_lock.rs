//! Seat locks held during checkout.
//!
//! A lock is a key `seatlock:{showtime}:{seat}` whose value is the owner token
//! `{user}:{session}` and whose TTL bounds how long an abandoned checkout can
//! hold a seat. Locks live only in the lock store; the database only knows
//! `available` and `booked`, and `locked` is overlaid when seat maps are read.
//!
//! Multi-seat requests are all or nothing. Seats are acquired in sorted order,
//! and a request that hits a seat held by someone else gives back every lock
//! it took itself before reporting the contended seats.

use redis::Script;
use std::{fmt, future::Future, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Seat, SeatStatus};
use crate::redis_client::RedisClient;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Seats already locked by another customer: {}", .seats.join(", "))]
    Conflict { seats: Vec<String> },
    #[error("Seat lock expired or not held: {}", .seats.join(", "))]
    NotHeld { seats: Vec<String> },
    #[error("lock store error: {0}")]
    Store(#[from] redis::RedisError),
}

/// Identifies one checkout attempt of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerToken {
    pub user_id: i64,
    pub session_id: String,
}

impl OwnerToken {
    pub fn new(user_id: i64, session_id: &str) -> Option<Self> {
        let session_id = session_id.trim();
        let valid = !session_id.is_empty()
            && session_id.len() <= 128
            && session_id.chars().all(|c| c.is_ascii_graphic());
        valid.then(|| OwnerToken {
            user_id,
            session_id: session_id.to_string(),
        })
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LockGrant {
    pub seats: Vec<String>,
    pub expires_in_seconds: u64,
}

pub fn lock_key(showtime_id: i64, seat_number: &str) -> String {
    format!("seatlock:{}:{}", showtime_id, seat_number)
}

/// Trims, upper-cases, sorts and de-duplicates requested seat numbers.
pub fn normalize_seats(seats: &[String]) -> Vec<String> {
    let mut out: Vec<String> = seats
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Storage primitive behind seat locks. Every operation is atomic per key.
pub trait LockStore: Send + Sync {
    /// Sets `key = owner` with a TTL unless the key exists.
    fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> impl Future<Output = redis::RedisResult<bool>> + Send;

    /// Resets the TTL if and only if `key` is held by `owner`.
    fn refresh(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> impl Future<Output = redis::RedisResult<bool>> + Send;

    /// Deletes `key` if and only if it is held by `owner`.
    fn release(&self, key: &str, owner: &str)
        -> impl Future<Output = redis::RedisResult<bool>> + Send;

    /// Current owners of `keys`, positionally.
    fn owners(
        &self,
        keys: &[String],
    ) -> impl Future<Output = redis::RedisResult<Vec<Option<String>>>> + Send;
}

const REFRESH_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisLockStore {
    redis: RedisClient,
    refresh: Script,
    release: Script,
}

impl RedisLockStore {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            refresh: Script::new(REFRESH_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

impl LockStore for RedisLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> redis::RedisResult<bool> {
        let mut conn = self.redis.conn.clone();
        // SET NX EX: one round trip, no race between check and set
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> redis::RedisResult<bool> {
        let mut conn = self.redis.conn.clone();
        let updated: i64 = self
            .refresh
            .key(key)
            .arg(owner)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> redis::RedisResult<bool> {
        let mut conn = self.redis.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn owners(&self, keys: &[String]) -> redis::RedisResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.conn.clone();
        redis::cmd("MGET").arg(keys).query_async(&mut conn).await
    }
}

#[derive(Clone)]
pub struct SeatLockService<S = RedisLockStore> {
    store: S,
    ttl: Duration,
}

impl<S: LockStore> SeatLockService<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }

    pub async fn lock_seats(
        &self,
        showtime_id: i64,
        seats: &[String],
        owner: &OwnerToken,
    ) -> Result<LockGrant, LockError> {
        let seats = normalize_seats(seats);
        let token = owner.to_string();
        let mut taken_here: Vec<String> = Vec::new();

        let outcome = self
            .acquire_all(showtime_id, &seats, &token, &mut taken_here)
            .await;

        match outcome {
            Ok(contended) if contended.is_empty() => {
                info!(
                    "Locked {} seat(s) for showtime {} ({})",
                    seats.len(),
                    showtime_id,
                    token
                );
                Ok(LockGrant {
                    seats,
                    expires_in_seconds: self.ttl.as_secs(),
                })
            }
            Ok(contended) => {
                warn!(
                    "Seat lock contention on showtime {}: {:?} ({})",
                    showtime_id, contended, token
                );
                self.give_back(&taken_here, &token).await;
                Err(LockError::Conflict { seats: contended })
            }
            Err(e) => {
                self.give_back(&taken_here, &token).await;
                Err(e.into())
            }
        }
    }

    /// Walks the seats in order. Once a conflict is seen it stops taking
    /// locks and only probes the rest, so the caller can report every
    /// contended seat.
    async fn acquire_all(
        &self,
        showtime_id: i64,
        seats: &[String],
        token: &str,
        taken_here: &mut Vec<String>,
    ) -> redis::RedisResult<Vec<String>> {
        let mut contended = Vec::new();
        for seat in seats {
            let key = lock_key(showtime_id, seat);
            if contended.is_empty() {
                if self.store.try_acquire(&key, token, self.ttl).await? {
                    taken_here.push(key);
                    continue;
                }
                if self.store.refresh(&key, token, self.ttl).await? {
                    continue;
                }
                contended.push(seat.clone());
            } else {
                let owner = self.store.owners(std::slice::from_ref(&key)).await?;
                let held_by_other = matches!(owner.first(), Some(Some(o)) if o != token);
                if held_by_other {
                    contended.push(seat.clone());
                }
            }
        }
        Ok(contended)
    }

    async fn give_back(&self, keys: &[String], token: &str) {
        for key in keys {
            if let Err(e) = self.store.release(key, token).await {
                // the TTL still bounds how long the seat stays held
                warn!("Failed to roll back seat lock {}: {:?}", key, e);
            }
        }
    }

    /// Fails with `NotHeld` listing every seat the owner no longer holds.
    pub async fn verify_owned(
        &self,
        showtime_id: i64,
        seats: &[String],
        owner: &OwnerToken,
    ) -> Result<(), LockError> {
        let seats = normalize_seats(seats);
        let keys: Vec<String> = seats.iter().map(|s| lock_key(showtime_id, s)).collect();
        let token = owner.to_string();
        let owners = self.store.owners(&keys).await?;

        let missing: Vec<String> = seats
            .into_iter()
            .zip(owners)
            .filter(|(_, held_by)| held_by.as_deref() != Some(token.as_str()))
            .map(|(seat, _)| seat)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(LockError::NotHeld { seats: missing })
        }
    }

    /// Releases the seats held by `owner`; seats held by anyone else are left alone.
    pub async fn release_seats(
        &self,
        showtime_id: i64,
        seats: &[String],
        owner: &OwnerToken,
    ) -> Result<usize, LockError> {
        let token = owner.to_string();
        let mut released = 0;
        for seat in normalize_seats(seats) {
            if self.store.release(&lock_key(showtime_id, &seat), &token).await? {
                released += 1;
            }
        }
        if released > 0 {
            info!(
                "Released {} seat lock(s) for showtime {} ({})",
                released, showtime_id, token
            );
        }
        Ok(released)
    }

    /// Marks available seats that carry a live lock as `locked`. A store
    /// failure leaves the statuses untouched.
    pub async fn overlay(&self, showtime_id: i64, seats: &mut [Seat]) {
        let keys: Vec<String> = seats
            .iter()
            .filter(|s| s.status == SeatStatus::Available)
            .map(|s| lock_key(showtime_id, &s.seat_number))
            .collect();

        let owners = match self.store.owners(&keys).await {
            Ok(owners) => owners,
            Err(e) => {
                warn!("Seat lock overlay skipped for showtime {}: {:?}", showtime_id, e);
                return;
            }
        };

        let mut owners = owners.into_iter();
        for seat in seats.iter_mut() {
            if seat.status == SeatStatus::Available {
                if let Some(Some(_)) = owners.next() {
                    seat.status = SeatStatus::Locked;
                }
            }
        }
    }
}

/// Process-local lock store with the same semantics as Redis.
#[cfg(test)]
pub(crate) mod memory {
    use super::LockStore;
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tokio::time::Instant;

    #[derive(Clone, Default)]
    pub struct MemoryLockStore {
        entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    }

    impl MemoryLockStore {
        fn live_owner(map: &mut HashMap<String, (String, Instant)>, key: &str) -> Option<String> {
            match map.get(key) {
                Some((_, expires)) if *expires <= Instant::now() => {
                    map.remove(key);
                    None
                }
                Some((owner, _)) => Some(owner.clone()),
                None => None,
            }
        }
    }

    impl LockStore for MemoryLockStore {
        async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> redis::RedisResult<bool> {
            let mut map = self.entries.lock().unwrap();
            if Self::live_owner(&mut map, key).is_some() {
                return Ok(false);
            }
            map.insert(key.to_string(), (owner.to_string(), Instant::now() + ttl));
            Ok(true)
        }

        async fn refresh(&self, key: &str, owner: &str, ttl: Duration) -> redis::RedisResult<bool> {
            let mut map = self.entries.lock().unwrap();
            if Self::live_owner(&mut map, key).as_deref() == Some(owner) {
                map.insert(key.to_string(), (owner.to_string(), Instant::now() + ttl));
                return Ok(true);
            }
            Ok(false)
        }

        async fn release(&self, key: &str, owner: &str) -> redis::RedisResult<bool> {
            let mut map = self.entries.lock().unwrap();
            if Self::live_owner(&mut map, key).as_deref() == Some(owner) {
                map.remove(key);
                return Ok(true);
            }
            Ok(false)
        }

        async fn owners(&self, keys: &[String]) -> redis::RedisResult<Vec<Option<String>>> {
            let mut map = self.entries.lock().unwrap();
            Ok(keys.iter().map(|k| Self::live_owner(&mut map, k)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryLockStore;
    use super::*;
    use crate::models::SeatType;
    use std::sync::Arc;

    const SHOW: i64 = 42;

    fn service() -> SeatLockService<MemoryLockStore> {
        SeatLockService::new(MemoryLockStore::default(), Duration::from_secs(600))
    }

    fn owner(user: i64, session: &str) -> OwnerToken {
        OwnerToken::new(user, session).unwrap()
    }

    fn seats(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn seat(number: &str, status: SeatStatus) -> Seat {
        Seat {
            id: 0,
            showtime_id: SHOW,
            seat_number: number.into(),
            row: number[..1].into(),
            col: number[1..].parse().unwrap(),
            seat_type: SeatType::Standard,
            price: 150.0,
            status,
        }
    }

    #[test]
    fn owner_token_rejects_blank_sessions() {
        assert!(OwnerToken::new(1, "  ").is_none());
        assert!(OwnerToken::new(1, "has space").is_none());
        assert!(OwnerToken::new(1, &"x".repeat(129)).is_none());
        assert_eq!(owner(7, " sess_1 ").to_string(), "7:sess_1");
    }

    #[test]
    fn normalize_sorts_and_dedupes() {
        assert_eq!(
            normalize_seats(&seats(&["b2", "A1", " a1 ", ""])),
            seats(&["A1", "B2"])
        );
    }

    #[tokio::test]
    async fn grants_all_requested_seats() {
        let svc = service();
        let grant = svc
            .lock_seats(SHOW, &seats(&["A2", "A1"]), &owner(1, "s1"))
            .await
            .unwrap();
        assert_eq!(grant.seats, seats(&["A1", "A2"]));
        assert_eq!(grant.expires_in_seconds, 600);
        svc.verify_owned(SHOW, &seats(&["A1", "A2"]), &owner(1, "s1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conflict_is_all_or_nothing() {
        let svc = service();
        svc.lock_seats(SHOW, &seats(&["A2"]), &owner(1, "s1"))
            .await
            .unwrap();

        let err = svc
            .lock_seats(SHOW, &seats(&["A1", "A2", "A3"]), &owner(2, "s2"))
            .await
            .unwrap_err();
        match err {
            LockError::Conflict { seats: contended } => assert_eq!(contended, seats(&["A2"])),
            other => panic!("unexpected {other:?}"),
        }

        // A1 was taken by the failed call and must have been given back
        svc.lock_seats(SHOW, &seats(&["A1", "A3"]), &owner(3, "s3"))
            .await
            .unwrap();
        // the original holder is unaffected
        svc.verify_owned(SHOW, &seats(&["A2"]), &owner(1, "s1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conflict_lists_every_contended_seat() {
        let svc = service();
        svc.lock_seats(SHOW, &seats(&["A1", "C4"]), &owner(1, "s1"))
            .await
            .unwrap();
        let err = svc
            .lock_seats(SHOW, &seats(&["A1", "B2", "C4"]), &owner(2, "s2"))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Conflict { ref seats } if seats == &["A1", "C4"]));
    }

    #[tokio::test]
    async fn relocking_by_same_session_is_idempotent() {
        let svc = service();
        let me = owner(1, "s1");
        svc.lock_seats(SHOW, &seats(&["A1"]), &me).await.unwrap();
        let grant = svc.lock_seats(SHOW, &seats(&["A1", "A2"]), &me).await.unwrap();
        assert_eq!(grant.seats, seats(&["A1", "A2"]));
    }

    #[tokio::test]
    async fn another_session_of_same_user_is_a_different_owner() {
        let svc = service();
        svc.lock_seats(SHOW, &seats(&["A1"]), &owner(1, "tab-1"))
            .await
            .unwrap();
        assert!(svc
            .lock_seats(SHOW, &seats(&["A1"]), &owner(1, "tab-2"))
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn locks_expire_after_ttl() {
        let svc = service();
        svc.lock_seats(SHOW, &seats(&["A1"]), &owner(1, "s1"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(svc
            .lock_seats(SHOW, &seats(&["A1"]), &owner(2, "s2"))
            .await
            .is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        let err = svc
            .verify_owned(SHOW, &seats(&["A1"]), &owner(1, "s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::NotHeld { .. }));
        svc.lock_seats(SHOW, &seats(&["A1"]), &owner(2, "s2"))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn relock_extends_the_ttl() {
        let svc = service();
        let me = owner(1, "s1");
        svc.lock_seats(SHOW, &seats(&["A1"]), &me).await.unwrap();
        tokio::time::advance(Duration::from_secs(500)).await;
        svc.lock_seats(SHOW, &seats(&["A1"]), &me).await.unwrap();
        tokio::time::advance(Duration::from_secs(500)).await;
        svc.verify_owned(SHOW, &seats(&["A1"]), &me).await.unwrap();
    }

    #[tokio::test]
    async fn release_only_touches_own_locks() {
        let svc = service();
        svc.lock_seats(SHOW, &seats(&["A1"]), &owner(1, "s1"))
            .await
            .unwrap();
        svc.lock_seats(SHOW, &seats(&["A2"]), &owner(2, "s2"))
            .await
            .unwrap();

        let released = svc
            .release_seats(SHOW, &seats(&["A1", "A2"]), &owner(1, "s1"))
            .await
            .unwrap();
        assert_eq!(released, 1);
        svc.verify_owned(SHOW, &seats(&["A2"]), &owner(2, "s2"))
            .await
            .unwrap();
        svc.lock_seats(SHOW, &seats(&["A1"]), &owner(3, "s3"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn verify_reports_missing_seats() {
        let svc = service();
        let me = owner(1, "s1");
        svc.lock_seats(SHOW, &seats(&["A1"]), &me).await.unwrap();
        let err = svc
            .verify_owned(SHOW, &seats(&["A1", "A2"]), &me)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::NotHeld { ref seats } if seats == &["A2"]));
    }

    #[tokio::test]
    async fn locks_are_scoped_per_showtime() {
        let svc = service();
        svc.lock_seats(1, &seats(&["A1"]), &owner(1, "s1"))
            .await
            .unwrap();
        svc.lock_seats(2, &seats(&["A1"]), &owner(2, "s2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn overlay_marks_locked_seats() {
        let svc = service();
        svc.lock_seats(SHOW, &seats(&["A2"]), &owner(1, "s1"))
            .await
            .unwrap();
        let mut map = vec![
            seat("A1", SeatStatus::Available),
            seat("A2", SeatStatus::Available),
            seat("A3", SeatStatus::Booked),
        ];
        svc.overlay(SHOW, &mut map).await;
        let statuses: Vec<SeatStatus> = map.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![SeatStatus::Available, SeatStatus::Locked, SeatStatus::Booked]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overlapping_requests_have_one_winner() {
        let svc = Arc::new(service());
        let mut handles = Vec::new();
        for user in 0..16i64 {
            let svc = svc.clone();
            // every request wants B5 plus one seat of its own, in varying order
            let wanted = if user % 2 == 0 {
                vec![format!("C{}", user + 1), "B5".to_string()]
            } else {
                vec!["B5".to_string(), format!("C{}", user + 1)]
            };
            handles.push(tokio::spawn(async move {
                svc.lock_seats(SHOW, &wanted, &owner(user, "s")).await.is_ok()
            }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        // losers rolled back their private seats
        let mut map: Vec<Seat> = (1..=16)
            .map(|c| seat(&format!("C{}", c), SeatStatus::Available))
            .collect();
        svc.overlay(SHOW, &mut map).await;
        let locked = map.iter().filter(|s| s.status == SeatStatus::Locked).count();
        assert_eq!(locked, 1);
    }
}
