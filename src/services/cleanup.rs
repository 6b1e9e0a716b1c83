use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use crate::AppState;

#[derive(Debug, Default, PartialEq)]
pub struct CleanupStats {
    pub expired_payments: u64,
    pub stale_payments_seen: i64,
}

impl CleanupStats {
    pub fn is_idle(&self) -> bool {
        self.expired_payments == 0 && self.stale_payments_seen == 0
    }
}

pub struct CleanupService {
    state: Arc<AppState>,
}

impl CleanupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// One sweep. Seat locks expire on their own through the store TTL, so
    /// only payment intents need attention here.
    pub async fn run_once(&self) -> CleanupStats {
        let mut stats = CleanupStats::default();

        match self.state.payments.count_stale().await {
            Ok(n) => stats.stale_payments_seen = n,
            Err(e) => error!("Failed to count stale payment intents: {:?}", e),
        }

        if stats.stale_payments_seen > 0 {
            match self.state.payments.expire_stale().await {
                Ok(n) => stats.expired_payments = n,
                Err(e) => error!("Failed to expire payment intents: {:?}", e),
            }
        }

        if stats.is_idle() {
            tracing::debug!("Cleanup: nothing to do");
        } else {
            info!(
                "Cleanup: expired {} of {} stale payment intent(s)",
                stats.expired_payments, stats.stale_payments_seen
            );
        }
        stats
    }

    pub async fn run_forever(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_when_nothing_seen() {
        assert!(CleanupStats::default().is_idle());
        assert!(!CleanupStats {
            expired_payments: 0,
            stale_payments_seen: 2
        }
        .is_idle());
    }
}
