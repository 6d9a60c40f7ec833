use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::EntryReason;
use crate::task::TaskStatus;

/// Every state change in the engine produces an Event.
/// The GUI polls for events; callers drain them after each operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    AccountRegistered {
        account_id: String,
        at: DateTime<Utc>,
    },
    TaskGenerated {
        instance_id: String,
        definition_id: String,
        assignee_id: String,
        due_date: NaiveDate,
        status: TaskStatus,
        at: DateTime<Utc>,
    },
    /// Pre-staged instance became visible to its assignee.
    TaskActivated {
        instance_id: String,
        assignee_id: String,
        at: DateTime<Utc>,
    },
    TaskSubmitted {
        instance_id: String,
        submitter_id: String,
        auto_approved: bool,
        at: DateTime<Utc>,
    },
    TaskApproved {
        instance_id: String,
        assignee_id: String,
        /// Total delta credited: base points plus any bonuses.
        awarded_points: i64,
        reviewer_id: Option<String>,
        at: DateTime<Utc>,
    },
    TaskRejected {
        instance_id: String,
        reviewer_id: String,
        at: DateTime<Utc>,
    },
    TaskSkipped {
        instance_id: String,
        at: DateTime<Utc>,
    },
    PointsCredited {
        account_id: String,
        amount: i64,
        reason: EntryReason,
        correlation_id: String,
        at: DateTime<Utc>,
    },
    PointsDebited {
        account_id: String,
        amount: i64,
        reason: EntryReason,
        correlation_id: String,
        at: DateTime<Utc>,
    },
    StreakAdvanced {
        account_id: String,
        current_streak: u32,
        longest_streak: u32,
        at: DateTime<Utc>,
    },
    /// A streak threshold was reached for the first time.
    MilestoneReached {
        account_id: String,
        threshold_days: u32,
        bonus_points: i64,
        at: DateTime<Utc>,
    },
}
