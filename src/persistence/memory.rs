//! In-memory persistence used when the database is disabled and in tests.
//!
//! All tables sit behind one async mutex, so each trait method is a single
//! serializable unit, matching the per-call atomicity of the PostgreSQL
//! implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Persistence, credited_balance};
use crate::domain::{
    Aoi, AnalysisResult, AoiId, BaselineStatus, CreditRequest, DueAoi, MonitoringFrequency,
    NewAnalysisResult, TokenAccount, TokenTransaction, TransactionType, UserId,
};
use crate::error::MonitorError;

#[derive(Debug, Default)]
struct Tables {
    aois: BTreeMap<AoiId, Aoi>,
    accounts: HashMap<UserId, TokenAccount>,
    transactions: Vec<TokenTransaction>,
    results: Vec<AnalysisResult>,
}

impl Tables {
    fn append_transaction(
        &mut self,
        user: UserId,
        kind: TransactionType,
        amount: i64,
        balance_before: i64,
        request: Option<&CreditRequest>,
        reference: Option<&str>,
    ) -> TokenTransaction {
        let id = i64::try_from(self.transactions.len()).unwrap_or(i64::MAX) + 1;
        let transaction = TokenTransaction {
            id,
            user_id: user,
            transaction_type: kind,
            amount,
            balance_before,
            balance_after: balance_before.saturating_add(amount),
            reference_id: reference.map(str::to_string),
            admin_user_id: request.and_then(|r| r.admin_user_id),
            note: request.and_then(|r| r.note.clone()),
            created_at: Utc::now(),
        };
        self.transactions.push(transaction.clone());
        transaction
    }

    fn aoi_mut(&mut self, id: AoiId) -> Result<&mut Aoi, MonitorError> {
        self.aois.get_mut(&id).ok_or(MonitorError::AoiNotFound(id))
    }
}

/// [`Persistence`] implementation backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryPersistence {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an AOI.
    pub async fn insert_aoi(&self, aoi: Aoi) {
        self.tables.lock().await.aois.insert(aoi.id, aoi);
    }

    /// Opens an account with a starting `grant`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidRequest`] for a negative balance.
    pub async fn open_account(&self, user: UserId, balance: i64) -> Result<(), MonitorError> {
        if balance < 0 {
            return Err(MonitorError::InvalidRequest(
                "starting balance must not be negative".to_string(),
            ));
        }
        let mut tables = self.tables.lock().await;
        tables.accounts.entry(user).or_insert(TokenAccount {
            user_id: user,
            balance: 0,
            lifetime_used: 0,
        });
        if balance > 0 {
            let request = CreditRequest {
                amount: balance,
                transaction_type: TransactionType::Grant,
                reference_id: None,
                admin_user_id: None,
                note: Some("starting balance".to_string()),
            };
            apply_credit(&mut tables, user, &request)?;
        }
        Ok(())
    }

    /// Makes every call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), MonitorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MonitorError::PersistenceError(
                "store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn apply_credit(
    tables: &mut Tables,
    user: UserId,
    request: &CreditRequest,
) -> Result<TokenTransaction, MonitorError> {
    let account = tables.accounts.entry(user).or_insert(TokenAccount {
        user_id: user,
        balance: 0,
        lifetime_used: 0,
    });
    let before = account.balance;
    account.balance = credited_balance(user, before, request.amount)?;
    Ok(tables.append_transaction(
        user,
        request.transaction_type,
        request.amount,
        before,
        Some(request),
        request.reference_id.as_deref(),
    ))
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn due_aois(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueAoi>, MonitorError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut due: Vec<DueAoi> = tables
            .aois
            .values()
            .filter(|aoi| aoi.is_due(now))
            .map(|aoi| DueAoi {
                aoi_id: aoi.id,
                user_id: aoi.user_id,
                next_run_at: aoi.next_run_at,
            })
            .collect();
        // NULLS FIRST, then oldest, then id.
        due.sort_by_key(|d| (d.next_run_at.is_some(), d.next_run_at, d.aoi_id));
        due.truncate(limit);
        Ok(due)
    }

    async fn load_aoi(&self, id: AoiId) -> Result<Option<Aoi>, MonitorError> {
        self.check_available()?;
        Ok(self.tables.lock().await.aois.get(&id).cloned())
    }

    async fn count_scheduled(&self) -> Result<u64, MonitorError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let count = tables
            .aois
            .values()
            .filter(|aoi| aoi.is_active && aoi.monitoring_frequency.is_some())
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn update_schedule(
        &self,
        id: AoiId,
        frequency: Option<MonitoringFrequency>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), MonitorError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let aoi = tables.aoi_mut(id)?;
        aoi.monitoring_frequency = frequency;
        aoi.next_run_at = next_run_at;
        Ok(())
    }

    async fn advance_schedule(
        &self,
        id: AoiId,
        expected: (Option<MonitoringFrequency>, Option<DateTime<Utc>>),
        frequency: Option<MonitoringFrequency>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, MonitorError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let Some(aoi) = tables.aois.get_mut(&id) else {
            return Ok(false);
        };
        if (aoi.monitoring_frequency, aoi.next_run_at) != expected {
            return Ok(false);
        }
        aoi.monitoring_frequency = frequency;
        aoi.next_run_at = next_run_at;
        Ok(true)
    }

    async fn set_baseline(
        &self,
        id: AoiId,
        status: BaselineStatus,
        reference: Option<&str>,
        baseline_date: Option<DateTime<Utc>>,
    ) -> Result<(), MonitorError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let aoi = tables.aoi_mut(id)?;
        aoi.baseline_status = status;
        if let Some(reference) = reference {
            aoi.baseline_reference = Some(reference.to_string());
        }
        if baseline_date.is_some() {
            aoi.baseline_date = baseline_date;
        }
        Ok(())
    }

    async fn debit(
        &self,
        user: UserId,
        amount: i64,
        reference: &str,
    ) -> Result<TokenTransaction, MonitorError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .get_mut(&user)
            .ok_or(MonitorError::AccountNotFound(user))?;
        let before = account.balance;
        if before < amount {
            return Err(MonitorError::InsufficientFunds {
                user_id: user,
                balance: before,
                requested: amount,
            });
        }
        account.balance -= amount;
        account.lifetime_used += amount;
        Ok(tables.append_transaction(
            user,
            TransactionType::Usage,
            -amount,
            before,
            None,
            Some(reference),
        ))
    }

    async fn credit(
        &self,
        user: UserId,
        request: &CreditRequest,
    ) -> Result<TokenTransaction, MonitorError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        apply_credit(&mut tables, user, request)
    }

    async fn refund_usage(
        &self,
        reference: &str,
    ) -> Result<Option<TokenTransaction>, MonitorError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let is_for = |t: &TokenTransaction, kind: TransactionType| {
            t.transaction_type == kind && t.reference_id.as_deref() == Some(reference)
        };
        let Some(usage) = tables
            .transactions
            .iter()
            .find(|t| is_for(t, TransactionType::Usage))
            .cloned()
        else {
            return Ok(None);
        };
        if tables
            .transactions
            .iter()
            .any(|t| is_for(t, TransactionType::Refund))
        {
            return Ok(None);
        }
        let request = CreditRequest::refund(-usage.amount, reference.to_string());
        apply_credit(&mut tables, usage.user_id, &request).map(Some)
    }

    async fn account(&self, user: UserId) -> Result<Option<TokenAccount>, MonitorError> {
        self.check_available()?;
        Ok(self.tables.lock().await.accounts.get(&user).copied())
    }

    async fn transactions(
        &self,
        user: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<TokenTransaction>, MonitorError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mine: Vec<TokenTransaction> = tables
            .transactions
            .iter()
            .filter(|t| t.user_id == user)
            .cloned()
            .collect();
        let skip = limit.map_or(0, |l| mine.len().saturating_sub(l));
        Ok(mine.into_iter().skip(skip).collect())
    }

    async fn insert_result(
        &self,
        result: NewAnalysisResult,
    ) -> Result<AnalysisResult, MonitorError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        if tables
            .results
            .iter()
            .any(|r| r.process_id == result.process_id)
        {
            return Err(MonitorError::PersistenceError(format!(
                "duplicate process id {}",
                result.process_id
            )));
        }
        let id = i64::try_from(tables.results.len()).unwrap_or(i64::MAX) + 1;
        let stored = AnalysisResult::from_new(id, result);
        tables.results.push(stored.clone());
        Ok(stored)
    }

    async fn results_for_aoi(
        &self,
        aoi: AoiId,
        limit: usize,
    ) -> Result<Vec<AnalysisResult>, MonitorError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .results
            .iter()
            .rev()
            .filter(|r| r.aoi_id == Some(aoi))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support::{completed_aoi, hours_ago};

    #[tokio::test]
    async fn due_selection_orders_null_first_then_oldest() {
        let store = InMemoryPersistence::new();
        let now = Utc::now();
        let mut never_run = completed_aoi(1, 10);
        never_run.next_run_at = None;
        let mut old = completed_aoi(2, 10);
        old.next_run_at = Some(hours_ago(now, 5));
        let mut recent = completed_aoi(3, 10);
        recent.next_run_at = Some(hours_ago(now, 1));
        let mut future = completed_aoi(4, 10);
        future.next_run_at = Some(now + chrono::Duration::hours(1));
        for aoi in [recent, future, old, never_run] {
            store.insert_aoi(aoi).await;
        }

        let Ok(due) = store.due_aois(now, 10).await else {
            panic!("due query");
        };
        let ids: Vec<i64> = due.iter().map(|d| d.aoi_id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let Ok(capped) = store.due_aois(now, 2).await else {
            panic!("due query");
        };
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn inactive_and_unbaselined_aois_are_not_due() {
        let store = InMemoryPersistence::new();
        let now = Utc::now();
        let mut inactive = completed_aoi(1, 10);
        inactive.is_active = false;
        let mut pending = completed_aoi(2, 10);
        pending.baseline_status = BaselineStatus::Pending;
        let mut unscheduled = completed_aoi(3, 10);
        unscheduled.monitoring_frequency = None;
        unscheduled.next_run_at = None;
        for aoi in [inactive, pending, unscheduled] {
            store.insert_aoi(aoi).await;
        }
        let Ok(due) = store.due_aois(now, 10).await else {
            panic!("due query");
        };
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn debit_below_balance_changes_nothing() {
        let store = InMemoryPersistence::new();
        let user = UserId::new(10);
        let Ok(()) = store.open_account(user, 0).await else {
            panic!("account opens");
        };

        let result = store.debit(user, 1, "p-1").await;
        assert!(matches!(
            result,
            Err(MonitorError::InsufficientFunds { balance: 0, .. })
        ));
        let Ok(Some(account)) = store.account(user).await else {
            panic!("account exists");
        };
        assert_eq!(account.balance, 0);
        let Ok(log) = store.transactions(user, None).await else {
            panic!("transactions");
        };
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn refund_is_applied_once() {
        let store = InMemoryPersistence::new();
        let user = UserId::new(10);
        let Ok(()) = store.open_account(user, 3).await else {
            panic!("account opens");
        };
        let Ok(_) = store.debit(user, 1, "p-1").await else {
            panic!("debit");
        };

        let Ok(Some(refund)) = store.refund_usage("p-1").await else {
            panic!("first refund applies");
        };
        assert_eq!(refund.amount, 1);
        assert_eq!(refund.balance_after, 3);
        assert!(matches!(store.refund_usage("p-1").await, Ok(None)));
        assert!(matches!(store.refund_usage("unknown").await, Ok(None)));
    }

    #[tokio::test]
    async fn transactions_limit_keeps_most_recent() {
        let store = InMemoryPersistence::new();
        let user = UserId::new(1);
        let Ok(()) = store.open_account(user, 5).await else {
            panic!("account opens");
        };
        for reference in ["a", "b", "c"] {
            let Ok(_) = store.debit(user, 1, reference).await else {
                panic!("debit");
            };
        }
        let Ok(recent) = store.transactions(user, Some(2)).await else {
            panic!("transactions");
        };
        let refs: Vec<_> = recent.iter().map(|t| t.reference_id.as_deref()).collect();
        assert_eq!(refs, vec![Some("b"), Some("c")]);
    }

    #[tokio::test]
    async fn outage_surfaces_as_persistence_error() {
        let store = InMemoryPersistence::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.due_aois(Utc::now(), 1).await,
            Err(MonitorError::PersistenceError(_))
        ));
    }
}
