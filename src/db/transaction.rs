//! Scoped transactions with bounded retry on serialization conflicts.
//!
//! The body runs against a connection borrowed from an open transaction.
//! The transaction is committed only when the body returns `Ok`; every
//! other exit (error, panic, cancelled future) drops it, which rolls back.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sqlx::{PgConnection, PgPool};

use crate::error::{AppError, AppResult};

/// Boxed future returned by a transaction body.
pub type TxFuture<'c, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'c>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Default isolation; writers lock the rows they depend on.
    ReadWrite,
    /// `REPEATABLE READ, READ ONLY`: every read sees the same snapshot.
    ReadOnlySnapshot,
}

/// Retry behaviour for serialization failures and deadlocks.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based), doubling each time.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Retries conflicts until `max_attempts` is used up, then reports them as
    /// [`AppError::Transient`]. Other errors fail straight away, unchanged.
    pub fn decide(&self, attempt: u32, err: AppError) -> RetryDecision {
        if !err.is_retryable() {
            return RetryDecision::Fail(err);
        }
        if attempt < self.max_attempts {
            RetryDecision::RetryAfter(self.delay_after(attempt), err)
        } else {
            RetryDecision::Fail(AppError::Transient(format!(
                "transaction failed after {} attempts: {}",
                attempt, err
            )))
        }
    }
}

/// What to do after attempt number `attempt` failed.
#[derive(Debug)]
pub enum RetryDecision {
    /// Sleep, then run the body again. Carries the conflict for logging.
    RetryAfter(Duration, AppError),
    /// Surface this error to the caller.
    Fail(AppError),
}

/// Runs `body` inside a transaction, retrying the whole body on retryable conflicts.
///
/// After `max_attempts` conflicts the last one is surfaced as [`AppError::Transient`].
pub async fn with_transaction<T, F>(
    pool: &PgPool,
    mode: TxMode,
    retry: &RetryConfig,
    mut body: F,
) -> AppResult<T>
where
    F: for<'c> FnMut(&'c mut PgConnection) -> TxFuture<'c, T> + Send,
    T: Send,
{
    let mut attempt = 1;
    loop {
        let err = match run_once(pool, mode, &mut body).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        match retry.decide(attempt, err) {
            RetryDecision::RetryAfter(delay, e) => {
                tracing::warn!(
                    "Transaction conflict (attempt {}/{}), retrying in {:?}: {}",
                    attempt,
                    retry.max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            RetryDecision::Fail(e) => return Err(e),
        }
    }
}

async fn run_once<T, F>(pool: &PgPool, mode: TxMode, body: &mut F) -> AppResult<T>
where
    F: for<'c> FnMut(&'c mut PgConnection) -> TxFuture<'c, T> + Send,
    T: Send,
{
    let mut tx = pool.begin().await?;

    if mode == TxMode::ReadOnlySnapshot {
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
    }

    let value = body(&mut *tx).await?;
    tx.commit().await?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::test_support::db_error;

    #[test]
    fn test_default_retry_config() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay_after(1), Duration::from_millis(20));
        assert_eq!(retry.delay_after(2), Duration::from_millis(40));
        assert_eq!(retry.delay_after(3), Duration::from_millis(80));
    }

    #[test]
    fn test_delay_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_after(30), retry.max_delay);
    }

    #[test]
    fn test_conflicts_retry_then_become_transient() {
        let retry = RetryConfig::default();
        for code in ["40001", "40P01"] {
            match retry.decide(1, AppError::Database(db_error(code))) {
                RetryDecision::RetryAfter(delay, e) => {
                    assert_eq!(delay, Duration::from_millis(20));
                    assert!(e.is_retryable());
                }
                other => panic!("expected a retry, got {:?}", other),
            }
            assert!(matches!(
                retry.decide(2, AppError::Database(db_error(code))),
                RetryDecision::RetryAfter(d, _) if d == Duration::from_millis(40)
            ));
            assert!(matches!(
                retry.decide(3, AppError::Database(db_error(code))),
                RetryDecision::Fail(AppError::Transient(_))
            ));
        }
    }

    #[test]
    fn test_other_errors_fail_immediately() {
        let retry = RetryConfig::default();
        assert!(matches!(
            retry.decide(1, AppError::Database(db_error("23505"))),
            RetryDecision::Fail(AppError::Database(_))
        ));
        assert!(matches!(
            retry.decide(1, AppError::InvalidState("claimed".into())),
            RetryDecision::Fail(AppError::InvalidState(_))
        ));
        assert!(matches!(
            retry.decide(1, AppError::Database(sqlx::Error::RowNotFound)),
            RetryDecision::Fail(AppError::Database(_))
        ));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let retry = RetryConfig::with_max_attempts(1);
        assert!(matches!(
            retry.decide(1, AppError::Database(db_error("40001"))),
            RetryDecision::Fail(AppError::Transient(_))
        ));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryConfig::with_max_attempts(0).max_attempts, 1);
        assert_eq!(RetryConfig::with_max_attempts(5).max_attempts, 5);
    }
}
