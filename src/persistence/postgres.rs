//! PostgreSQL implementation of the persistence layer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use super::{Persistence, credited_balance};
use super::models::{AccountRow, AoiRow, ResultRow, TransactionRow};
use crate::domain::{
    Aoi, AnalysisResult, AoiId, BaselineStatus, CreditRequest, DueAoi, MonitoringFrequency,
    NewAnalysisResult, TokenAccount, TokenTransaction, TransactionType, UserId,
};
use crate::error::MonitorError;

const TRANSACTION_COLUMNS: &str = "id, user_id, transaction_type, amount, balance_before, \
     balance_after, reference_id, admin_user_id, note, created_at";

const RESULT_COLUMNS: &str = "id, process_id, user_id, aoi_id, change_score, before_ref, \
     after_ref, heatmap_ref, metadata, tokens_charged, is_automatic, analyzed_at";

fn db(e: sqlx::Error) -> MonitorError {
    MonitorError::PersistenceError(e.to_string())
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed persistence layer using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Creates a new persistence layer with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool.
    ///
    /// # Errors
    ///
    /// Returns a [`MonitorError::PersistenceError`] if the database is
    /// unreachable.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, MonitorError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(db)?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`MonitorError::PersistenceError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), MonitorError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MonitorError::PersistenceError(e.to_string()))?;
        info!("database migrations applied");
        Ok(())
    }

    async fn insert_transaction(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user: UserId,
        kind: TransactionType,
        amount: i64,
        balance_before: i64,
        request: Option<&CreditRequest>,
        reference: Option<&str>,
    ) -> Result<TokenTransaction, MonitorError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO token_transactions \
             (user_id, transaction_type, amount, balance_before, balance_after, reference_id, admin_user_id, note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(user.get())
        .bind(kind.as_str())
        .bind(amount)
        .bind(balance_before)
        .bind(balance_before.saturating_add(amount))
        .bind(reference)
        .bind(request.and_then(|r| r.admin_user_id))
        .bind(request.and_then(|r| r.note.as_deref()))
        .fetch_one(&mut **tx)
        .await
        .map_err(db)?;
        TokenTransaction::try_from(row)
    }

    async fn lock_balance(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user: UserId,
    ) -> Result<Option<i64>, MonitorError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT balance FROM token_accounts WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(db)
    }

    async fn apply_balance_change(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user: UserId,
        amount: i64,
        used: i64,
    ) -> Result<(), MonitorError> {
        sqlx::query(
            "UPDATE token_accounts SET balance = balance + $2, \
             lifetime_used = lifetime_used + $3, updated_at = now() WHERE user_id = $1",
        )
        .bind(user.get())
        .bind(amount)
        .bind(used)
        .execute(&mut **tx)
        .await
        .map_err(db)?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn due_aois(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueAoi>, MonitorError> {
        let rows = sqlx::query_as::<_, (i64, i64, Option<DateTime<Utc>>)>(
            "SELECT id, user_id, next_run_at FROM aois \
             WHERE is_active AND baseline_status = 'completed' \
             AND monitoring_frequency IS NOT NULL \
             AND (next_run_at IS NULL OR next_run_at <= $1) \
             ORDER BY next_run_at ASC NULLS FIRST, id ASC LIMIT $2",
        )
        .bind(now)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        Ok(rows
            .into_iter()
            .map(|(id, user_id, next_run_at)| DueAoi {
                aoi_id: id.into(),
                user_id: user_id.into(),
                next_run_at,
            })
            .collect())
    }

    async fn load_aoi(&self, id: AoiId) -> Result<Option<Aoi>, MonitorError> {
        let row = sqlx::query_as::<_, AoiRow>(
            "SELECT id, user_id, name, min_lon, min_lat, max_lon, max_lat, monitoring_frequency, \
             next_run_at, is_active, baseline_status, baseline_reference, baseline_date \
             FROM aois WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(Aoi::try_from).transpose()
    }

    async fn count_scheduled(&self) -> Result<u64, MonitorError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM aois WHERE is_active AND monitoring_frequency IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn update_schedule(
        &self,
        id: AoiId,
        frequency: Option<MonitoringFrequency>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), MonitorError> {
        let result = sqlx::query(
            "UPDATE aois SET monitoring_frequency = $2, next_run_at = $3 WHERE id = $1",
        )
        .bind(id.get())
        .bind(frequency.map(MonitoringFrequency::as_str))
        .bind(next_run_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(MonitorError::AoiNotFound(id));
        }
        Ok(())
    }

    async fn advance_schedule(
        &self,
        id: AoiId,
        expected: (Option<MonitoringFrequency>, Option<DateTime<Utc>>),
        frequency: Option<MonitoringFrequency>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, MonitorError> {
        let result = sqlx::query(
            "UPDATE aois SET monitoring_frequency = $2, next_run_at = $3 \
             WHERE id = $1 AND monitoring_frequency IS NOT DISTINCT FROM $4 \
             AND next_run_at IS NOT DISTINCT FROM $5",
        )
        .bind(id.get())
        .bind(frequency.map(MonitoringFrequency::as_str))
        .bind(next_run_at)
        .bind(expected.0.map(MonitoringFrequency::as_str))
        .bind(expected.1)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_baseline(
        &self,
        id: AoiId,
        status: BaselineStatus,
        reference: Option<&str>,
        baseline_date: Option<DateTime<Utc>>,
    ) -> Result<(), MonitorError> {
        let result = sqlx::query(
            "UPDATE aois SET baseline_status = $2, \
             baseline_reference = COALESCE($3, baseline_reference), \
             baseline_date = COALESCE($4, baseline_date) WHERE id = $1",
        )
        .bind(id.get())
        .bind(status.as_str())
        .bind(reference)
        .bind(baseline_date)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            return Err(MonitorError::AoiNotFound(id));
        }
        Ok(())
    }

    async fn debit(
        &self,
        user: UserId,
        amount: i64,
        reference: &str,
    ) -> Result<TokenTransaction, MonitorError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let Some(balance) = Self::lock_balance(&mut tx, user).await? else {
            return Err(MonitorError::AccountNotFound(user));
        };
        if balance < amount {
            return Err(MonitorError::InsufficientFunds {
                user_id: user,
                balance,
                requested: amount,
            });
        }

        Self::apply_balance_change(&mut tx, user, -amount, amount).await?;
        let transaction = Self::insert_transaction(
            &mut tx,
            user,
            TransactionType::Usage,
            -amount,
            balance,
            None,
            Some(reference),
        )
        .await?;

        tx.commit().await.map_err(db)?;
        Ok(transaction)
    }

    async fn credit(
        &self,
        user: UserId,
        request: &CreditRequest,
    ) -> Result<TokenTransaction, MonitorError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query("INSERT INTO token_accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user.get())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        let balance = Self::lock_balance(&mut tx, user)
            .await?
            .ok_or(MonitorError::AccountNotFound(user))?;
        credited_balance(user, balance, request.amount)?;

        Self::apply_balance_change(&mut tx, user, request.amount, 0).await?;
        let transaction = Self::insert_transaction(
            &mut tx,
            user,
            request.transaction_type,
            request.amount,
            balance,
            Some(request),
            request.reference_id.as_deref(),
        )
        .await?;

        tx.commit().await.map_err(db)?;
        Ok(transaction)
    }

    async fn refund_usage(
        &self,
        reference: &str,
    ) -> Result<Option<TokenTransaction>, MonitorError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let usage = sqlx::query_as::<_, (i64, i64)>(
            "SELECT user_id, amount FROM token_transactions \
             WHERE reference_id = $1 AND transaction_type = 'usage' ORDER BY id LIMIT 1",
        )
        .bind(reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;
        let Some((user_id, amount)) = usage else {
            return Ok(None);
        };
        let user = UserId::new(user_id);

        // The account lock serializes concurrent refunds of one reference.
        let Some(balance) = Self::lock_balance(&mut tx, user).await? else {
            return Ok(None);
        };
        let already = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM token_transactions \
             WHERE reference_id = $1 AND transaction_type = 'refund')",
        )
        .bind(reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(db)?;
        if already {
            return Ok(None);
        }

        let request = CreditRequest::refund(-amount, reference.to_string());
        Self::apply_balance_change(&mut tx, user, request.amount, 0).await?;
        let transaction = Self::insert_transaction(
            &mut tx,
            user,
            TransactionType::Refund,
            request.amount,
            balance,
            Some(&request),
            Some(reference),
        )
        .await?;

        tx.commit().await.map_err(db)?;
        Ok(Some(transaction))
    }

    async fn account(&self, user: UserId) -> Result<Option<TokenAccount>, MonitorError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT user_id, balance, lifetime_used FROM token_accounts WHERE user_id = $1",
        )
        .bind(user.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.map(TokenAccount::from))
    }

    async fn transactions(
        &self,
        user: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<TokenTransaction>, MonitorError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM ( \
               SELECT {TRANSACTION_COLUMNS} FROM token_transactions \
               WHERE user_id = $1 ORDER BY id DESC LIMIT $2 \
             ) recent ORDER BY id ASC"
        ))
        .bind(user.get())
        .bind(limit.map_or(i64::MAX, sql_limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.into_iter().map(TokenTransaction::try_from).collect()
    }

    async fn insert_result(
        &self,
        result: NewAnalysisResult,
    ) -> Result<AnalysisResult, MonitorError> {
        let metadata = serde_json::to_value(&result.metadata)
            .map_err(|e| MonitorError::Internal(e.to_string()))?;

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO analysis_results \
             (process_id, user_id, aoi_id, change_score, before_ref, after_ref, heatmap_ref, \
              metadata, tokens_charged, is_automatic, analyzed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
        )
        .bind(*result.process_id.as_uuid())
        .bind(result.user_id.get())
        .bind(result.aoi_id.map(AoiId::get))
        .bind(result.change_score)
        .bind(&result.artifacts.before)
        .bind(&result.artifacts.after)
        .bind(&result.artifacts.heatmap)
        .bind(&metadata)
        .bind(result.tokens_charged)
        .bind(result.is_automatic)
        .bind(result.analyzed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;

        Ok(AnalysisResult::from_new(id, result))
    }

    async fn results_for_aoi(
        &self,
        aoi: AoiId,
        limit: usize,
    ) -> Result<Vec<AnalysisResult>, MonitorError> {
        let rows = sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {RESULT_COLUMNS} FROM analysis_results \
             WHERE aoi_id = $1 ORDER BY analyzed_at DESC, id DESC LIMIT $2"
        ))
        .bind(aoi.get())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.into_iter().map(AnalysisResult::try_from).collect()
    }
}
