//! Payment intents.
//!
//! Stands in for a card/UPI provider: an intent records who is paying how
//! much, and a booking can only be finalized against a pending intent of
//! the same amount that belongs to the same user. Each intent is consumed by
//! at most one booking.
//!
//! UPI checkouts confirm in the client and never create an intent up front.
//! They finalize with a `mock_upi_<token>` reference, and the intent is
//! written as already succeeded, for the server-side total, inside the
//! booking transaction.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{
    payment::PAYMENT_INTENT_COLUMNS, round2, same_amount, PaymentIntent, PaymentStatus,
};

#[derive(Clone)]
pub struct PaymentService {
    pool: PgPool,
    intent_ttl: Duration,
}

/// Why an intent cannot pay for a booking.
#[derive(Debug, PartialEq)]
pub enum IntentProblem {
    WrongOwner,
    NotPending(PaymentStatus),
    Expired,
    AmountMismatch { expected: f64, actual: f64 },
}

impl From<IntentProblem> for ApiError {
    fn from(problem: IntentProblem) -> Self {
        match problem {
            IntentProblem::WrongOwner => ApiError::BadRequest("Payment does not belong to you".into()),
            IntentProblem::NotPending(status) => {
                ApiError::BadRequest(format!("Payment is {}, not pending", status.as_str()))
            }
            IntentProblem::Expired => ApiError::Gone("Payment session expired".into()),
            IntentProblem::AmountMismatch { expected, actual } => ApiError::BadRequest(format!(
                "Payment amount {:.2} does not match booking total {:.2}",
                actual, expected
            )),
        }
    }
}

const DIRECT_UPI_PREFIX: &str = "mock_upi_";

/// The payment a booking is finalized against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentRef<'a> {
    /// Created by `create_intent`; must still be pending.
    Intent(&'a str),
    /// Confirmed by the client; recorded when the booking commits.
    DirectUpi(&'a str),
}

impl<'a> PaymentRef<'a> {
    pub fn parse(raw: &'a str) -> Result<Self, ApiError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(ApiError::BadRequest("paymentIntentId is required".into()));
        }
        match id.strip_prefix(DIRECT_UPI_PREFIX) {
            None => Ok(PaymentRef::Intent(id)),
            Some(token)
                if (1..=64).contains(&token.len())
                    && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                Ok(PaymentRef::DirectUpi(id))
            }
            Some(_) => Err(ApiError::BadRequest("Invalid UPI payment reference".into())),
        }
    }

    pub fn id(&self) -> &'a str {
        match self {
            PaymentRef::Intent(id) | PaymentRef::DirectUpi(id) => id,
        }
    }
}

impl PaymentService {
    pub fn new(pool: PgPool, intent_ttl_minutes: i64) -> Self {
        Self {
            pool,
            intent_ttl: Duration::minutes(intent_ttl_minutes),
        }
    }

    pub async fn create_intent(
        &self,
        user_id: i64,
        amount: f64,
        reference: Option<&str>,
    ) -> Result<PaymentIntent, sqlx::Error> {
        let id = format!("pi_mock_{}", Uuid::new_v4().simple());
        let client_secret = format!("mock_secret_{}", Uuid::new_v4().simple());
        let intent = sqlx::query_as::<_, PaymentIntent>(&format!(
            "INSERT INTO payment_intents (id, user_id, client_secret, amount, reference)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            PAYMENT_INTENT_COLUMNS
        ))
        .bind(&id)
        .bind(user_id)
        .bind(&client_secret)
        .bind(round2(amount))
        .bind(reference)
        .fetch_one(&self.pool)
        .await?;

        info!("Created payment intent {} for user {} ({:.2})", id, user_id, intent.amount);
        Ok(intent)
    }

    pub fn intent_ttl(&self) -> Duration {
        self.intent_ttl
    }

    /// Writes a direct UPI payment as a succeeded intent inside the booking
    /// transaction. Returns false when the reference was already recorded.
    pub async fn record_direct(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
        user_id: i64,
        amount: f64,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            "INSERT INTO payment_intents (id, user_id, client_secret, amount, reference, status)
             VALUES ($1, $2, $3, $4, 'upi', 'succeeded')
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(user_id)
        .bind(format!("upi_{}", Uuid::new_v4().simple()))
        .bind(round2(amount))
        .execute(&mut **tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn find(&self, id: &str) -> Result<Option<PaymentIntent>, sqlx::Error> {
        sqlx::query_as::<_, PaymentIntent>(&format!(
            "SELECT {} FROM payment_intents WHERE id = $1",
            PAYMENT_INTENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub fn check_payable(
        &self,
        intent: &PaymentIntent,
        user_id: i64,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<(), IntentProblem> {
        check_payable(intent, user_id, amount, now, self.intent_ttl)
    }

    /// Moves an intent from `from` to `to` inside the caller's transaction.
    /// Returns false when the intent was not in `from` any more.
    pub async fn transition(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            "UPDATE payment_intents SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&mut **tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Marks pending intents older than the TTL as expired.
    pub async fn expire_stale(&self) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - self.intent_ttl;
        let res = sqlx::query(
            "UPDATE payment_intents SET status = 'expired', updated_at = NOW()
             WHERE status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn count_stale(&self) -> Result<i64, sqlx::Error> {
        let cutoff = Utc::now() - self.intent_ttl;
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM payment_intents WHERE status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
    }
}

pub fn check_payable(
    intent: &PaymentIntent,
    user_id: i64,
    amount: f64,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<(), IntentProblem> {
    if intent.user_id != user_id {
        return Err(IntentProblem::WrongOwner);
    }
    if intent.status == PaymentStatus::Expired {
        return Err(IntentProblem::Expired);
    }
    if intent.status != PaymentStatus::Pending {
        return Err(IntentProblem::NotPending(intent.status));
    }
    if intent.created_at + ttl < now {
        return Err(IntentProblem::Expired);
    }
    if !same_amount(intent.amount, amount) {
        return Err(IntentProblem::AmountMismatch {
            expected: round2(amount),
            actual: intent.amount,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn intent(status: PaymentStatus, amount: f64, age_minutes: i64) -> PaymentIntent {
        PaymentIntent {
            id: "pi_mock_1".into(),
            user_id: 5,
            client_secret: "mock_secret_1".into(),
            amount,
            reference: None,
            status,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    const TTL: i64 = 15;

    #[test]
    fn upi_references_are_recognized() {
        assert_eq!(
            PaymentRef::parse(" mock_upi_1767225600000 ").unwrap(),
            PaymentRef::DirectUpi("mock_upi_1767225600000")
        );
        assert_eq!(
            PaymentRef::parse("pi_mock_4b1f").unwrap(),
            PaymentRef::Intent("pi_mock_4b1f")
        );
        assert_eq!(PaymentRef::parse("pi_mock_4b1f").unwrap().id(), "pi_mock_4b1f");

        for bad in ["", "  ", "mock_upi_", "mock_upi_12 34", "mock_upi_x;drop"] {
            let err = PaymentRef::parse(bad).unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{bad:?}");
        }
    }

    #[test]
    fn pending_intent_with_matching_amount_is_payable() {
        let i = intent(PaymentStatus::Pending, 450.0, 1);
        assert_eq!(check_payable(&i, 5, 450.0, Utc::now(), Duration::minutes(TTL)), Ok(()));
    }

    #[test]
    fn other_users_intent_is_rejected() {
        let i = intent(PaymentStatus::Pending, 450.0, 1);
        let problem = check_payable(&i, 6, 450.0, Utc::now(), Duration::minutes(TTL)).unwrap_err();
        assert_eq!(problem, IntentProblem::WrongOwner);
        assert_eq!(ApiError::from(problem).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn consumed_intent_cannot_pay_twice() {
        let i = intent(PaymentStatus::Succeeded, 450.0, 1);
        assert_eq!(
            check_payable(&i, 5, 450.0, Utc::now(), Duration::minutes(TTL)),
            Err(IntentProblem::NotPending(PaymentStatus::Succeeded))
        );
    }

    #[test]
    fn old_pending_intent_counts_as_expired() {
        let i = intent(PaymentStatus::Pending, 450.0, 16);
        assert_eq!(
            check_payable(&i, 5, 450.0, Utc::now(), Duration::minutes(TTL)),
            Err(IntentProblem::Expired)
        );
    }

    #[test]
    fn amount_must_match_to_the_cent() {
        let i = intent(PaymentStatus::Pending, 450.0, 1);
        let err = check_payable(&i, 5, 450.5, Utc::now(), Duration::minutes(TTL)).unwrap_err();
        assert_eq!(
            err,
            IntentProblem::AmountMismatch {
                expected: 450.5,
                actual: 450.0
            }
        );
        let api: ApiError = err.into();
        assert_eq!(
            api.to_string(),
            "Payment amount 450.00 does not match booking total 450.50"
        );
    }
}
