//! Database row models and their conversion into domain types.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Aoi, AnalysisMetadata, AnalysisResult, ArtifactRefs, BaselineStatus, BoundingBox,
    MonitoringFrequency, ProcessId, TokenAccount, TokenTransaction,
};
use crate::error::MonitorError;

fn corrupt(column: &str, value: &str) -> MonitorError {
    MonitorError::PersistenceError(format!("unexpected {column} value: {value}"))
}

/// A row from the `aois` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AoiRow {
    /// Primary key.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Display name.
    pub name: String,
    /// Western edge.
    pub min_lon: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// `daily`, `weekly`, `monthly`, `once` or NULL.
    pub monitoring_frequency: Option<String>,
    /// Next scheduled run.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Soft-delete flag.
    pub is_active: bool,
    /// Baseline lifecycle state.
    pub baseline_status: String,
    /// Baseline artifact reference.
    pub baseline_reference: Option<String>,
    /// Acquisition date the baseline represents.
    pub baseline_date: Option<DateTime<Utc>>,
}

impl TryFrom<AoiRow> for Aoi {
    type Error = MonitorError;

    fn try_from(row: AoiRow) -> Result<Self, Self::Error> {
        let monitoring_frequency = match row.monitoring_frequency.as_deref() {
            Some(raw) => MonitoringFrequency::parse_optional(raw)
                .map_err(|e| corrupt("monitoring_frequency", &e))?,
            None => None,
        };
        let baseline_status = row
            .baseline_status
            .parse::<BaselineStatus>()
            .map_err(|e| corrupt("baseline_status", &e))?;
        Ok(Self {
            id: row.id.into(),
            user_id: row.user_id.into(),
            name: row.name,
            bbox: BoundingBox::from_array([row.min_lon, row.min_lat, row.max_lon, row.max_lat]),
            monitoring_frequency,
            next_run_at: row.next_run_at,
            is_active: row.is_active,
            baseline_status,
            baseline_reference: row.baseline_reference,
            baseline_date: row.baseline_date,
        })
    }
}

/// A row from the `token_accounts` table.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct AccountRow {
    /// Account owner.
    pub user_id: i64,
    /// Current balance.
    pub balance: i64,
    /// Tokens consumed over the account lifetime.
    pub lifetime_used: i64,
}

impl From<AccountRow> for TokenAccount {
    fn from(row: AccountRow) -> Self {
        Self {
            user_id: row.user_id.into(),
            balance: row.balance,
            lifetime_used: row.lifetime_used,
        }
    }
}

/// A row from the `token_transactions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    /// Primary key.
    pub id: i64,
    /// Account owner.
    pub user_id: i64,
    /// `grant`, `admin_grant`, `usage` or `refund`.
    pub transaction_type: String,
    /// Signed amount.
    pub amount: i64,
    /// Balance before the change.
    pub balance_before: i64,
    /// Balance after the change.
    pub balance_after: i64,
    /// Correlation reference, usually a process id.
    pub reference_id: Option<String>,
    /// Granting administrator.
    pub admin_user_id: Option<i64>,
    /// Free-form note.
    pub note: Option<String>,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for TokenTransaction {
    type Error = MonitorError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let transaction_type = row
            .transaction_type
            .parse()
            .map_err(|e: String| corrupt("transaction_type", &e))?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id.into(),
            transaction_type,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            reference_id: row.reference_id,
            admin_user_id: row.admin_user_id,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

/// A row from the `analysis_results` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResultRow {
    /// Primary key.
    pub id: i64,
    /// Correlation token.
    pub process_id: Uuid,
    /// Paying user.
    pub user_id: i64,
    /// Monitored AOI.
    pub aoi_id: Option<i64>,
    /// Change score.
    pub change_score: f64,
    /// Baseline artifact reference.
    pub before_ref: String,
    /// Current artifact reference.
    pub after_ref: String,
    /// Heatmap artifact reference.
    pub heatmap_ref: String,
    /// JSONB metadata.
    pub metadata: serde_json::Value,
    /// Tokens debited.
    pub tokens_charged: i64,
    /// Scheduled rather than forced.
    pub is_automatic: bool,
    /// Execution start.
    pub analyzed_at: DateTime<Utc>,
}

impl TryFrom<ResultRow> for AnalysisResult {
    type Error = MonitorError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let metadata: AnalysisMetadata = serde_json::from_value(row.metadata)
            .map_err(|e| MonitorError::PersistenceError(format!("corrupt metadata: {e}")))?;
        Ok(Self {
            id: row.id,
            process_id: ProcessId::from_uuid(row.process_id),
            user_id: row.user_id.into(),
            aoi_id: row.aoi_id.map(Into::into),
            change_score: row.change_score,
            artifacts: ArtifactRefs {
                before: row.before_ref,
                after: row.after_ref,
                heatmap: row.heatmap_ref,
            },
            metadata,
            tokens_charged: row.tokens_charged,
            is_automatic: row.is_automatic,
            analyzed_at: row.analyzed_at,
        })
    }
}
