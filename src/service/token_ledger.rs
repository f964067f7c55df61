//! Token ledger: atomic, auditable balance transitions.
//!
//! All balance mutation goes through [`TokenLedger`]. The ledger validates
//! requests and delegates the atomic read-modify-write to the
//! [`Persistence`] store, which locks the account row for the duration of
//! the change. Job code never touches balances directly.

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{CreditRequest, TokenAccount, TokenTransaction, TransactionType, UserId};
use crate::error::MonitorError;
use crate::persistence::Persistence;

/// Result of a committed balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct LedgerEntry {
    /// Id of the appended transaction row.
    pub transaction_id: i64,
    /// Balance after the change.
    pub new_balance: i64,
}

impl From<&TokenTransaction> for LedgerEntry {
    fn from(transaction: &TokenTransaction) -> Self {
        Self {
            transaction_id: transaction.id,
            new_balance: transaction.balance_after,
        }
    }
}

/// Replay of a user's transaction log against the stored account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LedgerAudit {
    /// Audited account.
    #[schema(value_type = i64)]
    pub user_id: UserId,
    /// Rows replayed.
    pub transaction_count: usize,
    /// Balance reconstructed from the log.
    pub replayed_balance: i64,
    /// Balance stored on the account.
    pub stored_balance: i64,
    /// Lifetime usage reconstructed from the log.
    pub replayed_lifetime_used: i64,
    /// Lifetime usage stored on the account.
    pub stored_lifetime_used: i64,
    /// Usage rows replayed.
    pub usage_count: usize,
    /// Every row chains onto its predecessor and satisfies
    /// `balance_after == balance_before + amount`.
    pub chain_intact: bool,
}

impl LedgerAudit {
    /// `true` when the log reconstructs the account exactly.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.chain_intact
            && self.replayed_balance == self.stored_balance
            && self.replayed_lifetime_used == self.stored_lifetime_used
    }

    fn replay(user_id: UserId, account: TokenAccount, log: &[TokenTransaction]) -> Self {
        let mut balance = 0_i64;
        let mut lifetime_used = 0_i64;
        let mut usage_count = 0;
        let mut chain_intact = true;

        for row in log {
            chain_intact &= row.balance_before == balance
                && row.balance_after == row.balance_before + row.amount
                && row.balance_after >= 0;
            balance = row.balance_after;
            if row.transaction_type == TransactionType::Usage {
                lifetime_used -= row.amount;
                usage_count += 1;
            }
        }

        Self {
            user_id,
            transaction_count: log.len(),
            replayed_balance: balance,
            stored_balance: account.balance,
            replayed_lifetime_used: lifetime_used,
            stored_lifetime_used: account.lifetime_used,
            usage_count,
            chain_intact,
        }
    }
}

/// Per-user consumable balance with exactly-once debit semantics.
#[derive(Debug, Clone)]
pub struct TokenLedger {
    store: Arc<dyn Persistence>,
}

impl TokenLedger {
    /// Creates a ledger over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    /// Debits `amount` tokens, recording `reference` on the usage row.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InsufficientFunds`] (with no state change)
    /// when the balance is below `amount`, and
    /// [`MonitorError::InvalidRequest`] for a non-positive amount.
    pub async fn debit(
        &self,
        user: UserId,
        amount: i64,
        reference: &str,
    ) -> Result<LedgerEntry, MonitorError> {
        if amount <= 0 {
            return Err(MonitorError::InvalidRequest(
                "debit amount must be positive".to_string(),
            ));
        }
        let transaction = self.store.debit(user, amount, reference).await?;
        tracing::debug!(
            %user,
            amount,
            reference,
            balance = transaction.balance_after,
            "tokens debited"
        );
        Ok(LedgerEntry::from(&transaction))
    }

    /// Credits tokens. Creates the account on first credit.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidRequest`] for a non-positive amount or
    /// a `usage` transaction type.
    pub async fn credit(
        &self,
        user: UserId,
        request: CreditRequest,
    ) -> Result<LedgerEntry, MonitorError> {
        if request.amount <= 0 {
            return Err(MonitorError::InvalidRequest(
                "credit amount must be positive".to_string(),
            ));
        }
        if !request.transaction_type.is_credit() {
            return Err(MonitorError::InvalidRequest(format!(
                "{} is not a credit",
                request.transaction_type
            )));
        }
        let transaction = self.store.credit(user, &request).await?;
        tracing::info!(
            %user,
            amount = request.amount,
            kind = %request.transaction_type,
            balance = transaction.balance_after,
            "tokens credited"
        );
        Ok(LedgerEntry::from(&transaction))
    }

    /// Refunds the usage debited under `reference`, at most once.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    pub async fn refund_usage(&self, reference: &str) -> Result<Option<LedgerEntry>, MonitorError> {
        let refund = self.store.refund_usage(reference).await?;
        if let Some(transaction) = &refund {
            tracing::info!(
                user = %transaction.user_id,
                reference,
                amount = transaction.amount,
                "usage refunded"
            );
        }
        Ok(refund.as_ref().map(LedgerEntry::from))
    }

    /// Current account state.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AccountNotFound`] if the user has no account.
    pub async fn account(&self, user: UserId) -> Result<TokenAccount, MonitorError> {
        self.store
            .account(user)
            .await?
            .ok_or(MonitorError::AccountNotFound(user))
    }

    /// Most recent transactions in commit order.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] on store failure.
    pub async fn history(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<TokenTransaction>, MonitorError> {
        self.store.transactions(user, Some(limit)).await
    }

    /// Replays the full transaction log and compares it to the account.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AccountNotFound`] if the user has no account.
    pub async fn audit(&self, user: UserId) -> Result<LedgerAudit, MonitorError> {
        let account = self.account(user).await?;
        let log = self.store.transactions(user, None).await?;
        let audit = LedgerAudit::replay(user, account, &log);
        if !audit.is_consistent() {
            tracing::warn!(%user, ?audit, "token ledger does not replay to stored balance");
        }
        Ok(audit)
    }
}
