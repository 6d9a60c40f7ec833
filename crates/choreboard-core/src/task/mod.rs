//! Task types: recurring definitions and dated instances.
//!
//! A `TaskDefinition` is the recurring template a guardian creates; the
//! scheduler expands it into `TaskInstance` rows, one per occurrence. Each
//! instance carries its own lifecycle status:
//!
//!   SCHEDULED ──> ASSIGNED ──> PENDING_APPROVAL ──> APPROVED
//!       |             |                |
//!       |             |                +──────────> REJECTED
//!       +──> SKIPPED <+
//!
//! Auto-approved submissions jump ASSIGNED -> APPROVED directly and never
//! observe PENDING_APPROVAL. APPROVED, REJECTED and SKIPPED are terminal;
//! no transition moves a terminal instance back.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task instance.
///
/// A closed enum: unknown stored values are a deserialization error in the
/// storage layer, never a runtime fallback branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Generated ahead of time, not yet visible to the assignee.
    /// Only produced by pre-staging definitions (pet-care schedules).
    Scheduled,
    /// Visible to the assignee, awaiting action.
    Assigned,
    /// Submitted, awaiting guardian review.
    PendingApproval,
    /// Approved and credited (terminal).
    Approved,
    /// Rejected by the reviewer, no credit (terminal).
    Rejected,
    /// Deliberately bypassed, e.g. superseded by regeneration (terminal).
    Skipped,
}

impl TaskStatus {
    /// Check if a transition is valid.
    pub fn can_transition_to(&self, to: &TaskStatus) -> bool {
        match self {
            TaskStatus::Scheduled => matches!(to, TaskStatus::Assigned | TaskStatus::Skipped),
            TaskStatus::Assigned => matches!(
                to,
                TaskStatus::PendingApproval | TaskStatus::Approved | TaskStatus::Skipped
            ),
            TaskStatus::PendingApproval => {
                matches!(to, TaskStatus::Approved | TaskStatus::Rejected)
            }
            TaskStatus::Approved | TaskStatus::Rejected | TaskStatus::Skipped => false,
        }
    }

    /// Get valid next statuses for this status.
    pub fn valid_transitions(&self) -> &[TaskStatus] {
        match self {
            TaskStatus::Scheduled => &[TaskStatus::Assigned, TaskStatus::Skipped],
            TaskStatus::Assigned => &[
                TaskStatus::PendingApproval,
                TaskStatus::Approved,
                TaskStatus::Skipped,
            ],
            TaskStatus::PendingApproval => &[TaskStatus::Approved, TaskStatus::Rejected],
            TaskStatus::Approved | TaskStatus::Rejected | TaskStatus::Skipped => &[],
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Stable storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Assigned => "assigned",
            TaskStatus::PendingApproval => "pending_approval",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence cadence of a task definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// Every calendar day.
    Daily,
    /// Once per week, on the definition's weekday.
    Weekly,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
        }
    }
}

/// A recurring chore/pet-care template.
///
/// Definitions are soft-deactivated, never physically deleted; instances
/// already generated from them stay untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    /// Guardian who owns the template.
    pub guardian_id: String,
    /// Display name; also the key the auto-approval policy matches on.
    pub name: String,
    /// Points credited per approved instance, copied onto each instance
    /// at generation time.
    pub points: i64,
    pub cadence: Cadence,
    /// Weekday for weekly cadence. Defaults to the anchor date's weekday.
    pub weekday: Option<Weekday>,
    /// Due time-of-day for generated instances. Default: end of day.
    pub due_time: Option<NaiveTime>,
    /// Ordered list of eligible assignee account ids. Rotation walks this
    /// list keyed by date.
    pub assignees: Vec<String>,
    /// Date the rotation was anchored: the day index 0 of the assignee
    /// list is (or was) on duty.
    pub anchor_date: NaiveDate,
    /// Pre-stage future occurrences as `scheduled` instead of `assigned`.
    pub prestage: bool,
    pub active: bool,
    /// Optimistic-concurrency version, bumped on every mutation.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskDefinition {
    /// Create a new active definition anchored at `anchor_date`.
    pub fn new(
        guardian_id: impl Into<String>,
        name: impl Into<String>,
        points: i64,
        cadence: Cadence,
        assignees: Vec<String>,
        anchor_date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Self {
        TaskDefinition {
            id: format!("def-{}", uuid::Uuid::new_v4()),
            guardian_id: guardian_id.into(),
            name: name.into(),
            points,
            cadence,
            weekday: None,
            due_time: None,
            assignees,
            anchor_date,
            prestage: false,
            active: true,
            version: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Weekday this definition fires on, for weekly cadence.
    pub fn effective_weekday(&self) -> Weekday {
        self.weekday.unwrap_or_else(|| self.anchor_date.weekday())
    }

    /// Does this definition produce an occurrence on `date`?
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        match self.cadence {
            Cadence::Daily => true,
            Cadence::Weekly => date.weekday() == self.effective_weekday(),
        }
    }
}

/// One concrete, dated occurrence of a definition.
///
/// Instances are never deleted; together with the ledger they form the
/// audit/history trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: String,
    pub definition_id: String,
    pub assignee_id: String,
    /// Full due timestamp (date at the definition's due time-of-day).
    pub due_at: DateTime<Utc>,
    /// Calendar date of the occurrence; unique per definition.
    pub due_date: NaiveDate,
    /// Point value copied from the definition at generation time. Later
    /// definition edits never change already-generated instances.
    pub points: i64,
    pub status: TaskStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submission_notes: Option<String>,
    /// Minutes the assignee reported spending, feeds the effort bonus.
    pub effort_minutes: Option<u32>,
    /// Number of submit attempts (rejected-and-resubmitted flows).
    pub attempt_count: u32,
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Reviewer account id; `None` for auto-approved instances.
    pub reviewer_id: Option<String>,
    /// Total point delta credited on approval (base + bonuses).
    pub awarded_points: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TaskInstance {
    /// Create a fresh instance in the given initial status.
    pub fn new(
        definition_id: impl Into<String>,
        assignee_id: impl Into<String>,
        due_at: DateTime<Utc>,
        due_date: NaiveDate,
        points: i64,
        status: TaskStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        TaskInstance {
            id: format!("inst-{}", uuid::Uuid::new_v4()),
            definition_id: definition_id.into(),
            assignee_id: assignee_id.into(),
            due_at,
            due_date,
            points,
            status,
            submitted_at: None,
            submission_notes: None,
            effort_minutes: None,
            attempt_count: 0,
            reviewed_at: None,
            reviewer_id: None,
            awarded_points: None,
            created_at,
        }
    }
}
