//! Points ledger: append-only balance mutations with a cached fold.
//!
//! Every balance change is a `LedgerEntry`; the account's cached balance
//! is kept equal to the sum of its entries inside the same transaction
//! that appends the entry. Idempotency is enforced by a unique index on
//! `(correlation_id, reason)`: replaying a credit or debit for the same
//! correlation returns the prior entry instead of appending a duplicate,
//! which is what prevents double-crediting when an approval is retried.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{is_constraint_violation, CoreError, EngineError, Result};

/// Reason code attached to every ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryReason {
    /// Base credit for an approved task instance.
    TaskApproval,
    /// Bonus derived from reported effort minutes.
    EffortBonus,
    /// Streak milestone bonus.
    StreakBonus,
    /// Store redemption debit.
    Redemption,
    /// Guardian-granted award outside any task.
    ManualAward,
    /// Correction debit reversing a prior approval.
    Reversal,
}

impl EntryReason {
    /// Stable storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryReason::TaskApproval => "task-approval",
            EntryReason::EffortBonus => "effort-bonus",
            EntryReason::StreakBonus => "streak-bonus",
            EntryReason::Redemption => "redemption",
            EntryReason::ManualAward => "manual-award",
            EntryReason::Reversal => "reversal",
        }
    }

    /// Parse the stable storage form. Unknown strings are an error, not a
    /// fallback branch.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task-approval" => Some(EntryReason::TaskApproval),
            "effort-bonus" => Some(EntryReason::EffortBonus),
            "streak-bonus" => Some(EntryReason::StreakBonus),
            "redemption" => Some(EntryReason::Redemption),
            "manual-award" => Some(EntryReason::ManualAward),
            "reversal" => Some(EntryReason::Reversal),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of a single balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: String,
    /// Signed point delta: positive for credits, negative for debits.
    pub delta: i64,
    pub reason: EntryReason,
    /// The task instance or redemption that caused this entry.
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a credit/debit call.
#[derive(Debug, Clone)]
pub struct AppliedEntry {
    pub entry: LedgerEntry,
    /// True when the (correlation, reason) pair had already been applied
    /// and the prior entry was returned without touching the balance.
    pub replayed: bool,
}

/// Atomic credit/debit operations over the ledger_entries table.
///
/// All methods take a `&Connection` so they compose into a caller's
/// transaction; each write pair (entry append + balance update) runs
/// under a savepoint, so a failed operation leaves no partial state even
/// when called outside an explicit transaction.
pub struct Ledger;

impl Ledger {
    /// Append a positive entry and increment the cached balance.
    ///
    /// # Errors
    /// `InvalidAmount` if `amount <= 0`; `NotFound` if the account does
    /// not exist.
    pub fn credit(
        conn: &Connection,
        account_id: &str,
        amount: i64,
        reason: EntryReason,
        correlation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<AppliedEntry> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount { amount }.into());
        }
        Self::apply(conn, account_id, amount, reason, correlation_id, at)
    }

    /// Append a negative entry and decrement the cached balance.
    ///
    /// # Errors
    /// `InvalidAmount` if `amount <= 0`; `InsufficientBalance` if the
    /// balance would go negative; `NotFound` if the account does not
    /// exist.
    pub fn debit(
        conn: &Connection,
        account_id: &str,
        amount: i64,
        reason: EntryReason,
        correlation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<AppliedEntry> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount { amount }.into());
        }
        Self::apply(conn, account_id, -amount, reason, correlation_id, at)
    }

    /// Current cached balance. Equal to the fold of the account's entries
    /// at all times; `fold_for` recomputes the fold for invariant checks.
    pub fn balance_of(conn: &Connection, account_id: &str) -> Result<i64> {
        conn.query_row(
            "SELECT balance FROM accounts WHERE id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(CoreError::from)?
        .ok_or_else(|| {
            EngineError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            }
            .into()
        })
    }

    /// Sum of all entry deltas for an account.
    pub fn fold_for(conn: &Connection, account_id: &str) -> Result<i64> {
        let sum = conn.query_row(
            "SELECT COALESCE(SUM(delta), 0) FROM ledger_entries WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    /// All entries for an account, oldest first.
    pub fn entries_for(conn: &Connection, account_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut stmt = conn.prepare(
            "SELECT id, account_id, delta, reason, correlation_id, created_at
             FROM ledger_entries WHERE account_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![account_id], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(CoreError::from)?);
        }
        Ok(entries)
    }

    fn apply(
        conn: &Connection,
        account_id: &str,
        delta: i64,
        reason: EntryReason,
        correlation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<AppliedEntry> {
        conn.execute_batch("SAVEPOINT ledger_apply")?;
        let outcome = Self::apply_inner(conn, account_id, delta, reason, correlation_id, at);
        match outcome {
            Ok(applied) => {
                conn.execute_batch("RELEASE SAVEPOINT ledger_apply")?;
                Ok(applied)
            }
            Err(err) => {
                conn.execute_batch(
                    "ROLLBACK TO SAVEPOINT ledger_apply; RELEASE SAVEPOINT ledger_apply",
                )?;
                Err(err)
            }
        }
    }

    fn apply_inner(
        conn: &Connection,
        account_id: &str,
        delta: i64,
        reason: EntryReason,
        correlation_id: &str,
        at: DateTime<Utc>,
    ) -> Result<AppliedEntry> {
        if let Some(prior) = Self::find(conn, correlation_id, reason)? {
            return Ok(AppliedEntry {
                entry: prior,
                replayed: true,
            });
        }

        let inserted = conn.execute(
            "INSERT INTO ledger_entries (account_id, delta, reason, correlation_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account_id,
                delta,
                reason.as_str(),
                correlation_id,
                at.to_rfc3339()
            ],
        );
        match inserted {
            Ok(_) => {}
            // Lost an insert race on the unique index: the entry exists now.
            Err(ref err) if is_constraint_violation(err) => {
                let prior = Self::find(conn, correlation_id, reason)?.ok_or_else(|| {
                    EngineError::ConcurrentModification {
                        entity: "ledger entry",
                        id: correlation_id.to_string(),
                    }
                })?;
                return Ok(AppliedEntry {
                    entry: prior,
                    replayed: true,
                });
            }
            Err(err) => return Err(err.into()),
        }
        let entry_id = conn.last_insert_rowid();

        let updated = if delta >= 0 {
            conn.execute(
                "UPDATE accounts SET balance = balance + ?1 WHERE id = ?2",
                params![delta, account_id],
            )?
        } else {
            conn.execute(
                "UPDATE accounts SET balance = balance + ?1 WHERE id = ?2 AND balance + ?1 >= 0",
                params![delta, account_id],
            )?
        };
        if updated == 0 {
            let balance: Option<i64> = conn
                .query_row(
                    "SELECT balance FROM accounts WHERE id = ?1",
                    params![account_id],
                    |row| row.get(0),
                )
                .optional()?;
            return match balance {
                Some(balance) => Err(EngineError::InsufficientBalance {
                    account_id: account_id.to_string(),
                    balance,
                    requested: -delta,
                }
                .into()),
                None => Err(EngineError::NotFound {
                    entity: "account",
                    id: account_id.to_string(),
                }
                .into()),
            };
        }

        Ok(AppliedEntry {
            entry: LedgerEntry {
                id: entry_id,
                account_id: account_id.to_string(),
                delta,
                reason,
                correlation_id: correlation_id.to_string(),
                created_at: at,
            },
            replayed: false,
        })
    }

    fn find(
        conn: &Connection,
        correlation_id: &str,
        reason: EntryReason,
    ) -> Result<Option<LedgerEntry>> {
        conn.query_row(
            "SELECT id, account_id, delta, reason, correlation_id, created_at
             FROM ledger_entries WHERE correlation_id = ?1 AND reason = ?2",
            params![correlation_id, reason.as_str()],
            row_to_entry,
        )
        .optional()
        .map_err(CoreError::from)
    }
}

fn row_to_entry(row: &rusqlite::Row) -> Result<LedgerEntry, rusqlite::Error> {
    let reason_str: String = row.get(3)?;
    let reason = EntryReason::parse(&reason_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown ledger reason '{reason_str}'").into(),
        )
    })?;
    let created_str: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?
        .with_timezone(&Utc);
    Ok(LedgerEntry {
        id: row.get(0)?,
        account_id: row.get(1)?,
        delta: row.get(2)?,
        reason,
        correlation_id: row.get(4)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, Role};
    use crate::storage::{insert_account, Database};

    fn db_with_account(id: &str) -> Database {
        let db = Database::open_memory().unwrap();
        let account = Account::new(id, "Kid", Role::Dependent, "fam-1", Utc::now());
        insert_account(db.conn(), &account).unwrap();
        db
    }

    #[test]
    fn credit_appends_and_updates_balance() {
        let db = db_with_account("kid-1");
        let applied =
            Ledger::credit(db.conn(), "kid-1", 10, EntryReason::TaskApproval, "inst-1", Utc::now())
                .unwrap();
        assert!(!applied.replayed);
        assert_eq!(applied.entry.delta, 10);
        assert_eq!(Ledger::balance_of(db.conn(), "kid-1").unwrap(), 10);
        assert_eq!(Ledger::fold_for(db.conn(), "kid-1").unwrap(), 10);
    }

    #[test]
    fn credit_rejects_non_positive_amounts() {
        let db = db_with_account("kid-1");
        for amount in [0, -5] {
            let err = Ledger::credit(
                db.conn(),
                "kid-1",
                amount,
                EntryReason::ManualAward,
                "award-1",
                Utc::now(),
            )
            .unwrap_err();
            assert!(matches!(
                err,
                CoreError::Engine(EngineError::InvalidAmount { .. })
            ));
        }
        assert_eq!(Ledger::fold_for(db.conn(), "kid-1").unwrap(), 0);
    }

    #[test]
    fn repeated_correlation_is_a_no_op() {
        let db = db_with_account("kid-1");
        let first =
            Ledger::credit(db.conn(), "kid-1", 10, EntryReason::TaskApproval, "inst-1", Utc::now())
                .unwrap();
        let second =
            Ledger::credit(db.conn(), "kid-1", 10, EntryReason::TaskApproval, "inst-1", Utc::now())
                .unwrap();
        assert!(second.replayed);
        assert_eq!(second.entry.id, first.entry.id);
        assert_eq!(Ledger::balance_of(db.conn(), "kid-1").unwrap(), 10);
        assert_eq!(Ledger::entries_for(db.conn(), "kid-1").unwrap().len(), 1);
    }

    #[test]
    fn same_correlation_different_reason_is_distinct() {
        let db = db_with_account("kid-1");
        Ledger::credit(db.conn(), "kid-1", 10, EntryReason::TaskApproval, "inst-1", Utc::now())
            .unwrap();
        Ledger::credit(db.conn(), "kid-1", 5, EntryReason::EffortBonus, "inst-1", Utc::now())
            .unwrap();
        assert_eq!(Ledger::balance_of(db.conn(), "kid-1").unwrap(), 15);
        assert_eq!(Ledger::entries_for(db.conn(), "kid-1").unwrap().len(), 2);
    }

    #[test]
    fn debit_blocks_negative_balance() {
        let db = db_with_account("kid-1");
        Ledger::credit(db.conn(), "kid-1", 10, EntryReason::TaskApproval, "inst-1", Utc::now())
            .unwrap();
        let err = Ledger::debit(
            db.conn(),
            "kid-1",
            25,
            EntryReason::Redemption,
            "redeem-1",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Engine(EngineError::InsufficientBalance { balance: 10, requested: 25, .. })
        ));
        // Failed debit leaves no partial entry behind.
        assert_eq!(Ledger::balance_of(db.conn(), "kid-1").unwrap(), 10);
        assert_eq!(Ledger::fold_for(db.conn(), "kid-1").unwrap(), 10);
        assert_eq!(Ledger::entries_for(db.conn(), "kid-1").unwrap().len(), 1);
    }

    #[test]
    fn debit_appends_negative_entry() {
        let db = db_with_account("kid-1");
        Ledger::credit(db.conn(), "kid-1", 30, EntryReason::TaskApproval, "inst-1", Utc::now())
            .unwrap();
        let applied = Ledger::debit(
            db.conn(),
            "kid-1",
            20,
            EntryReason::Redemption,
            "redeem-1",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(applied.entry.delta, -20);
        assert_eq!(Ledger::balance_of(db.conn(), "kid-1").unwrap(), 10);
        assert_eq!(Ledger::fold_for(db.conn(), "kid-1").unwrap(), 10);
    }

    #[test]
    fn unknown_account_is_not_found() {
        let db = Database::open_memory().unwrap();
        let err = Ledger::credit(
            db.conn(),
            "ghost",
            10,
            EntryReason::ManualAward,
            "award-1",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Engine(EngineError::NotFound { entity: "account", .. })
        ));
        assert!(Ledger::balance_of(db.conn(), "ghost").is_err());
    }
}
