//! Persistence layer: AOIs, token ledger rows and analysis results.
//!
//! Provides the [`Persistence`] trait the monitoring core depends on. Two
//! implementations exist: [`PostgresPersistence`] over `sqlx::PgPool`, and
//! [`InMemoryPersistence`] for tests and database-less deployments.
//!
//! Every method is one atomic unit. In particular, `debit`, `credit` and
//! `refund_usage` change the balance and append the transaction row in the
//! same transaction, so neither can be observed without the other.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Aoi, AnalysisResult, AoiId, BaselineStatus, CreditRequest, DueAoi, MonitoringFrequency,
    NewAnalysisResult, TokenAccount, TokenTransaction, UserId,
};
use crate::error::MonitorError;

pub use memory::InMemoryPersistence;
pub use postgres::PostgresPersistence;

/// Transactional store behind the monitoring core.
#[async_trait]
pub trait Persistence: fmt::Debug + Send + Sync {
    /// Returns up to `limit` AOIs that are due at `now`, oldest first.
    ///
    /// An AOI is due when it is active, its baseline is completed, it has a
    /// monitoring frequency, and its `next_run_at` is unset or not after
    /// `now`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn due_aois(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<DueAoi>, MonitorError>;

    /// Loads a snapshot of one AOI.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn load_aoi(&self, id: AoiId) -> Result<Option<Aoi>, MonitorError>;

    /// Counts active AOIs with a monitoring frequency.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn count_scheduled(&self) -> Result<u64, MonitorError>;

    /// Writes frequency and next-run time together.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AoiNotFound`] if the AOI does not exist.
    async fn update_schedule(
        &self,
        id: AoiId,
        frequency: Option<MonitoringFrequency>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), MonitorError>;

    /// Writes frequency and next-run time only if the stored pair still
    /// equals `expected`. Returns `false` without writing when it does not,
    /// or when the AOI is gone.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn advance_schedule(
        &self,
        id: AoiId,
        expected: (Option<MonitoringFrequency>, Option<DateTime<Utc>>),
        frequency: Option<MonitoringFrequency>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, MonitorError>;

    /// Records a baseline transition. `reference` and `baseline_date` are
    /// only written when provided.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AoiNotFound`] if the AOI does not exist.
    async fn set_baseline(
        &self,
        id: AoiId,
        status: BaselineStatus,
        reference: Option<&str>,
        baseline_date: Option<DateTime<Utc>>,
    ) -> Result<(), MonitorError>;

    /// Atomically debits `amount` and appends a `usage` transaction.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InsufficientFunds`] without any state change
    /// when the balance is below `amount`, or
    /// [`MonitorError::AccountNotFound`] when the user has no account.
    async fn debit(
        &self,
        user: UserId,
        amount: i64,
        reference: &str,
    ) -> Result<TokenTransaction, MonitorError>;

    /// Atomically credits the account, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidRequest`] when the new balance would
    /// not fit in an `i64`, or [`MonitorError::PersistenceError`] on store
    /// failure.
    async fn credit(
        &self,
        user: UserId,
        request: &CreditRequest,
    ) -> Result<TokenTransaction, MonitorError>;

    /// Credits back the `usage` recorded under `reference`, at most once.
    ///
    /// Returns `None` when no usage exists for the reference or it was
    /// already refunded.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn refund_usage(&self, reference: &str)
    -> Result<Option<TokenTransaction>, MonitorError>;

    /// Loads a token account.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn account(&self, user: UserId) -> Result<Option<TokenAccount>, MonitorError>;

    /// Transactions of a user in commit order. With a `limit`, only the
    /// most recent `limit` rows are returned (still in commit order).
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn transactions(
        &self,
        user: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<TokenTransaction>, MonitorError>;

    /// Appends an analysis result.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn insert_result(
        &self,
        result: NewAnalysisResult,
    ) -> Result<AnalysisResult, MonitorError>;

    /// Most recent results of an AOI, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    async fn results_for_aoi(
        &self,
        aoi: AoiId,
        limit: usize,
    ) -> Result<Vec<AnalysisResult>, MonitorError>;
}

/// Balance after crediting `amount` to `before`.
///
/// # Errors
///
/// Returns [`MonitorError::InvalidRequest`] when the sum overflows.
pub(crate) fn credited_balance(user: UserId, before: i64, amount: i64) -> Result<i64, MonitorError> {
    before.checked_add(amount).ok_or_else(|| {
        MonitorError::InvalidRequest(format!("credit of {amount} overflows the balance of user {user}"))
    })
}
