//! Token accounts and their append-only transaction log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::UserId;

/// Kind of balance change recorded in a [`TokenTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Regular grant (signup bonus, purchase).
    Grant,
    /// Grant issued by an administrator.
    AdminGrant,
    /// Debit for an analysis.
    Usage,
    /// Credit returning a previous usage.
    Refund,
}

impl TransactionType {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::AdminGrant => "admin_grant",
            Self::Usage => "usage",
            Self::Refund => "refund",
        }
    }

    /// `true` for the credit kinds accepted by `TokenLedger::credit`.
    #[must_use]
    pub const fn is_credit(self) -> bool {
        !matches!(self, Self::Usage)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grant" => Ok(Self::Grant),
            "admin_grant" => Ok(Self::AdminGrant),
            "usage" => Ok(Self::Usage),
            "refund" => Ok(Self::Refund),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// Per-user balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct TokenAccount {
    /// Account owner.
    #[schema(value_type = i64)]
    pub user_id: UserId,
    /// Spendable tokens; never negative.
    pub balance: i64,
    /// Total tokens ever debited.
    pub lifetime_used: i64,
}

/// One immutable row of the ledger.
///
/// `balance_after == balance_before + amount` always holds; usage rows
/// carry a negative amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TokenTransaction {
    /// Transaction id.
    pub id: i64,
    /// Account owner.
    #[schema(value_type = i64)]
    pub user_id: UserId,
    /// Kind of change.
    pub transaction_type: TransactionType,
    /// Signed amount.
    pub amount: i64,
    /// Balance before this transaction.
    pub balance_before: i64,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Optional external reference (process id for usage and refunds).
    pub reference_id: Option<String>,
    /// Administrator that issued an admin grant.
    pub admin_user_id: Option<i64>,
    /// Free-form note.
    pub note: Option<String>,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
}

/// Parameters of a balance increase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRequest {
    /// Tokens to add; must be positive.
    pub amount: i64,
    /// One of the credit kinds.
    pub transaction_type: TransactionType,
    /// Optional external reference.
    pub reference_id: Option<String>,
    /// Issuing administrator for admin grants.
    pub admin_user_id: Option<i64>,
    /// Free-form note.
    pub note: Option<String>,
}

impl CreditRequest {
    /// Refund of `amount` tokens for the given process reference.
    #[must_use]
    pub fn refund(amount: i64, reference_id: String) -> Self {
        Self {
            amount,
            transaction_type: TransactionType::Refund,
            reference_id: Some(reference_id),
            admin_user_id: None,
            note: None,
        }
    }

    /// Grant issued by an administrator.
    #[must_use]
    pub fn admin_grant(amount: i64, admin_user_id: Option<i64>, note: Option<String>) -> Self {
        Self {
            amount,
            transaction_type: TransactionType::AdminGrant,
            reference_id: None,
            admin_user_id,
            note,
        }
    }
}
