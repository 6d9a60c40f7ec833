//! Reward fulfillment engine.
//!
//! The engine is a request-scoped service: each public operation runs to
//! completion as a single IMMEDIATE transaction against the database, so
//! a failed operation leaves no partial state and callers may retry
//! safely. Retries are idempotent through the ledger's correlation keys
//! and the conditional status updates; the loser of two racing reviews
//! gets `InvalidState`, never a second credit.
//!
//! Operations take `now` from the caller. The engine never reads the
//! wall clock, which keeps every operation replayable.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::account::{Account, Role};
use crate::error::{EngineError, Result};
use crate::events::Event;
use crate::ledger::{EntryReason, Ledger, LedgerEntry};
use crate::policy::AutoApprovePolicy;
use crate::scheduler::ScheduleGenerator;
use crate::storage::{self, Database};
use crate::streak::{MilestoneSchedule, StreakRecord, StreakTracker};
use crate::task::{Cadence, TaskDefinition, TaskInstance, TaskStatus};

/// Effort-based bonus: up to `max_minutes` of reported effort earn half a
/// point per minute, capped at `max_points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffortBonusConfig {
    pub max_minutes: u32,
    pub max_points: i64,
}

impl Default for EffortBonusConfig {
    fn default() -> Self {
        Self {
            max_minutes: 20,
            max_points: 10,
        }
    }
}

impl EffortBonusConfig {
    /// floor(min(minutes, max_minutes) / 2), capped at max_points.
    pub fn points_for(&self, minutes: u32) -> i64 {
        i64::from(minutes.min(self.max_minutes) / 2).min(self.max_points)
    }
}

/// Injected engine configuration. Product-tunable constants live here,
/// never as module-level state, so tests can vary them per case.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default generation horizon in days.
    pub days_ahead: u32,
    /// Due time-of-day applied when a definition has none.
    pub default_due_time: NaiveTime,
    pub effort_bonus: EffortBonusConfig,
    pub milestones: MilestoneSchedule,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            days_ahead: 7,
            default_due_time: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            effort_bonus: EffortBonusConfig::default(),
            milestones: MilestoneSchedule::default(),
        }
    }
}

/// Parameters for creating a recurring task definition.
#[derive(Debug, Clone)]
pub struct NewTaskDefinition {
    pub guardian_id: String,
    pub name: String,
    pub points: i64,
    pub cadence: Cadence,
    pub weekday: Option<Weekday>,
    pub due_time: Option<NaiveTime>,
    pub assignees: Vec<String>,
    /// Rotation anchor: the date index 0 of the assignee list is on duty.
    pub anchor_date: NaiveDate,
    pub prestage: bool,
}

/// Optional submission details.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub notes: Option<String>,
    pub effort_minutes: Option<u32>,
}

/// Guardian review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// The stateful workflow turning recurring definitions into scheduled
/// instances, carrying each through the approval lifecycle, and mutating
/// point balances exactly once per qualifying event.
pub struct RewardEngine {
    db: Database,
    config: EngineConfig,
    policy: Box<dyn AutoApprovePolicy>,
    generator: ScheduleGenerator,
    tracker: StreakTracker,
    events: Vec<Event>,
}

impl RewardEngine {
    /// Create an engine over `db` with injected configuration and
    /// auto-approval policy.
    pub fn new(db: Database, config: EngineConfig, policy: Box<dyn AutoApprovePolicy>) -> Self {
        let generator = ScheduleGenerator::with_default_due_time(config.default_due_time);
        let tracker = StreakTracker::with_schedule(config.milestones.clone());
        Self {
            db,
            config,
            policy,
            generator,
            tracker,
            events: Vec::new(),
        }
    }

    /// Read access to the underlying database (list queries, CLI output).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Drain events produced by operations since the last call.
    /// Events are only recorded for committed operations.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // ── Accounts & ledger ────────────────────────────────────────────

    /// Register an account. Dependents get a zeroed streak record.
    pub fn register_account(
        &mut self,
        id: &str,
        display_name: &str,
        role: Role,
        family_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let tx = self.db.transaction()?;
        let account = Account::new(id, display_name, role, family_id, now);
        storage::insert_account(&tx, &account)?;
        if role == Role::Dependent {
            tx.execute(
                "INSERT INTO streaks (account_id, current_streak, longest_streak) VALUES (?1, 0, 0)",
                params![id],
            )?;
        }
        tx.commit()?;
        info!(account_id = id, role = role.as_str(), "account registered");
        self.events.push(Event::AccountRegistered {
            account_id: id.to_string(),
            at: now,
        });
        Ok(account)
    }

    /// Current cached balance.
    pub fn balance_of(&self, account_id: &str) -> Result<i64> {
        Ledger::balance_of(self.db.conn(), account_id)
    }

    /// Full ledger history for an account, oldest first.
    pub fn ledger_of(&self, account_id: &str) -> Result<Vec<LedgerEntry>> {
        Ledger::entries_for(self.db.conn(), account_id)
    }

    /// Stored streak record for an account.
    pub fn streak_of(&self, account_id: &str) -> Result<Option<StreakRecord>> {
        StreakTracker::get(self.db.conn(), account_id)
    }

    /// Debit points for a store redemption. Idempotent per redemption id.
    pub fn redeem(
        &mut self,
        account_id: &str,
        amount: i64,
        redemption_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let tx = self.db.transaction()?;
        let applied = Ledger::debit(&tx, account_id, amount, EntryReason::Redemption, redemption_id, now)?;
        tx.commit()?;
        info!(account_id, amount, redemption_id, "redemption debited");
        if !applied.replayed {
            self.events.push(Event::PointsDebited {
                account_id: account_id.to_string(),
                amount,
                reason: EntryReason::Redemption,
                correlation_id: redemption_id.to_string(),
                at: now,
            });
        }
        Ok(applied.entry)
    }

    /// Guardian-granted award outside any task. Idempotent per correlation.
    pub fn award(
        &mut self,
        account_id: &str,
        amount: i64,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let tx = self.db.transaction()?;
        let applied =
            Ledger::credit(&tx, account_id, amount, EntryReason::ManualAward, correlation_id, now)?;
        tx.commit()?;
        info!(account_id, amount, correlation_id, "manual award credited");
        if !applied.replayed {
            self.events.push(Event::PointsCredited {
                account_id: account_id.to_string(),
                amount,
                reason: EntryReason::ManualAward,
                correlation_id: correlation_id.to_string(),
                at: now,
            });
        }
        Ok(applied.entry)
    }

    // ── Definitions ──────────────────────────────────────────────────

    /// Create a recurring task definition.
    pub fn define_task(&mut self, params: NewTaskDefinition, now: DateTime<Utc>) -> Result<TaskDefinition> {
        if params.points <= 0 {
            return Err(EngineError::InvalidAmount { amount: params.points }.into());
        }
        let mut definition = TaskDefinition::new(
            params.guardian_id,
            params.name,
            params.points,
            params.cadence,
            params.assignees,
            params.anchor_date,
            now,
        );
        definition.weekday = params.weekday;
        definition.due_time = params.due_time;
        definition.prestage = params.prestage;

        let tx = self.db.transaction()?;
        storage::insert_definition(&tx, &definition)?;
        tx.commit()?;
        info!(definition_id = %definition.id, name = %definition.name, "definition created");
        Ok(definition)
    }

    /// Replace the eligible-assignee list, re-anchoring the rotation at
    /// `now`'s date. Future generation uses the new list; persisted
    /// instances are never recomputed.
    pub fn set_assignees(
        &mut self,
        definition_id: &str,
        assignees: Vec<String>,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.db.transaction()?;
        storage::update_definition_assignees(
            &tx,
            definition_id,
            &assignees,
            now.date_naive(),
            expected_version,
            now,
        )?;
        tx.commit()?;
        info!(definition_id, count = assignees.len(), "assignee list replaced");
        Ok(())
    }

    /// Soft-deactivate a definition; its instances stay untouched.
    pub fn deactivate_definition(
        &mut self,
        definition_id: &str,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.db.transaction()?;
        storage::deactivate_definition(&tx, definition_id, expected_version, now)?;
        tx.commit()?;
        info!(definition_id, "definition deactivated");
        Ok(())
    }

    // ── Generation ───────────────────────────────────────────────────

    /// Expand a definition over `[start_date, start_date + days_ahead)`
    /// and persist the new instances.
    ///
    /// Dates already present are skipped; a concurrent generation call
    /// racing for the same date loses on the `(definition, date)`
    /// uniqueness index with `DuplicateGeneration` and the whole call
    /// rolls back.
    pub fn generate(
        &mut self,
        definition_id: &str,
        start_date: NaiveDate,
        days_ahead: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskInstance>> {
        let horizon = days_ahead.unwrap_or(self.config.days_ahead);
        let tx = self.db.transaction()?;

        let definition = storage::get_definition(&tx, definition_id)?.ok_or_else(|| {
            EngineError::NotFound {
                entity: "definition",
                id: definition_id.to_string(),
            }
        })?;
        if !definition.active {
            return Err(EngineError::InactiveDefinition {
                definition_id: definition_id.to_string(),
            }
            .into());
        }
        if definition.assignees.is_empty() {
            return Err(EngineError::NoAssignees {
                definition_id: definition_id.to_string(),
            }
            .into());
        }

        let existing = storage::existing_dates_for_definition(&tx, definition_id)?;
        let instances = self
            .generator
            .expand(&definition, start_date, horizon, &existing, now);

        let mut events = Vec::with_capacity(instances.len());
        for instance in &instances {
            storage::insert_instance(&tx, instance)?;
            events.push(Event::TaskGenerated {
                instance_id: instance.id.clone(),
                definition_id: definition_id.to_string(),
                assignee_id: instance.assignee_id.clone(),
                due_date: instance.due_date,
                status: instance.status,
                at: now,
            });
        }
        tx.commit()?;
        debug!(definition_id, count = instances.len(), "instances generated");
        self.events.extend(events);
        Ok(instances)
    }

    /// Flip pre-staged `scheduled` instances whose due date has arrived
    /// to `assigned`. Invoked by an external periodic trigger.
    pub fn activate_due(&mut self, today: NaiveDate, now: DateTime<Utc>) -> Result<Vec<TaskInstance>> {
        let tx = self.db.transaction()?;
        let due = storage::due_scheduled_instances(&tx, today)?;
        let mut activated = Vec::new();
        let mut events = Vec::new();
        for instance in due {
            let updated = tx.execute(
                "UPDATE task_instances SET status = 'assigned' WHERE id = ?1 AND status = 'scheduled'",
                params![instance.id],
            )?;
            if updated == 0 {
                continue; // already moved by a concurrent caller
            }
            events.push(Event::TaskActivated {
                instance_id: instance.id.clone(),
                assignee_id: instance.assignee_id.clone(),
                at: now,
            });
            activated.push(TaskInstance {
                status: TaskStatus::Assigned,
                ..instance
            });
        }
        tx.commit()?;
        debug!(count = activated.len(), "pre-staged instances activated");
        self.events.extend(events);
        Ok(activated)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Submit a completed task for approval.
    ///
    /// Legal only from `assigned`, and only by the instance's assignee.
    /// If the auto-approval policy matches the task name, the instance
    /// transitions straight to `approved` and the approval side effects
    /// run inside this same operation; it never observes
    /// `pending_approval`.
    pub fn submit(
        &mut self,
        instance_id: &str,
        submitter_id: &str,
        options: SubmitOptions,
        now: DateTime<Utc>,
    ) -> Result<TaskInstance> {
        let tx = self.db.transaction()?;

        let instance = fetch_instance(&tx, instance_id)?;
        if instance.assignee_id != submitter_id {
            return Err(EngineError::NotAssignee {
                instance_id: instance_id.to_string(),
                submitter_id: submitter_id.to_string(),
            }
            .into());
        }
        if instance.status != TaskStatus::Assigned {
            return Err(EngineError::InvalidState {
                from: instance.status,
                operation: "submit",
            }
            .into());
        }

        let definition = storage::get_definition(&tx, &instance.definition_id)?.ok_or_else(|| {
            EngineError::NotFound {
                entity: "definition",
                id: instance.definition_id.clone(),
            }
        })?;
        let auto = self.policy.should_auto_approve(&definition.name);
        let target = if auto {
            TaskStatus::Approved
        } else {
            TaskStatus::PendingApproval
        };

        let updated = tx.execute(
            "UPDATE task_instances
             SET status = ?2, submitted_at = ?3, submission_notes = ?4, effort_minutes = ?5,
                 attempt_count = attempt_count + 1, reviewed_at = ?6
             WHERE id = ?1 AND status = 'assigned'",
            params![
                instance_id,
                target.as_str(),
                now.to_rfc3339(),
                options.notes,
                options.effort_minutes,
                auto.then(|| now.to_rfc3339()),
            ],
        )?;
        if updated == 0 {
            // Lost the race: someone else transitioned this instance.
            let current = fetch_instance(&tx, instance_id)?;
            return Err(EngineError::InvalidState {
                from: current.status,
                operation: "submit",
            }
            .into());
        }

        let mut events = vec![Event::TaskSubmitted {
            instance_id: instance_id.to_string(),
            submitter_id: submitter_id.to_string(),
            auto_approved: auto,
            at: now,
        }];

        let mut instance = fetch_instance(&tx, instance_id)?;
        if auto {
            let (awarded, approval_events) = apply_approval(
                &tx,
                &self.config.effort_bonus,
                &self.tracker,
                &instance,
                None,
                now,
            )?;
            instance.awarded_points = Some(awarded);
            events.extend(approval_events);
        }

        tx.commit()?;
        info!(
            instance_id,
            submitter_id,
            auto_approved = auto,
            "task submitted"
        );
        self.events.extend(events);
        Ok(instance)
    }

    /// Review a pending submission.
    ///
    /// Legal only from `pending_approval`. Approval runs the credit side
    /// effects exactly once; rejection writes nothing to the ledger.
    /// Concurrent reviews of the same instance are serialized by the
    /// conditional update: the loser gets `InvalidState`.
    pub fn review(
        &mut self,
        instance_id: &str,
        reviewer_id: &str,
        decision: ReviewDecision,
        now: DateTime<Utc>,
    ) -> Result<TaskInstance> {
        let tx = self.db.transaction()?;

        let instance = fetch_instance(&tx, instance_id)?;
        if instance.status != TaskStatus::PendingApproval {
            return Err(EngineError::InvalidState {
                from: instance.status,
                operation: "review",
            }
            .into());
        }

        let target = match decision {
            ReviewDecision::Approve => TaskStatus::Approved,
            ReviewDecision::Reject => TaskStatus::Rejected,
        };
        let updated = tx.execute(
            "UPDATE task_instances SET status = ?2, reviewed_at = ?3, reviewer_id = ?4
             WHERE id = ?1 AND status = 'pending_approval'",
            params![instance_id, target.as_str(), now.to_rfc3339(), reviewer_id],
        )?;
        if updated == 0 {
            let current = fetch_instance(&tx, instance_id)?;
            return Err(EngineError::InvalidState {
                from: current.status,
                operation: "review",
            }
            .into());
        }

        let mut instance = fetch_instance(&tx, instance_id)?;
        let mut events = Vec::new();
        match decision {
            ReviewDecision::Approve => {
                let (awarded, approval_events) = apply_approval(
                    &tx,
                    &self.config.effort_bonus,
                    &self.tracker,
                    &instance,
                    Some(reviewer_id),
                    now,
                )?;
                instance.awarded_points = Some(awarded);
                events.extend(approval_events);
            }
            ReviewDecision::Reject => {
                events.push(Event::TaskRejected {
                    instance_id: instance_id.to_string(),
                    reviewer_id: reviewer_id.to_string(),
                    at: now,
                });
            }
        }

        tx.commit()?;
        info!(instance_id, reviewer_id, decision = ?decision, "task reviewed");
        self.events.extend(events);
        Ok(instance)
    }

    /// Mark an instance deliberately bypassed (e.g. superseded by
    /// regeneration). Legal from `scheduled` and `assigned`.
    pub fn skip(&mut self, instance_id: &str, now: DateTime<Utc>) -> Result<TaskInstance> {
        let tx = self.db.transaction()?;
        let instance = fetch_instance(&tx, instance_id)?;
        if !instance.status.can_transition_to(&TaskStatus::Skipped) {
            return Err(EngineError::InvalidState {
                from: instance.status,
                operation: "skip",
            }
            .into());
        }
        let updated = tx.execute(
            "UPDATE task_instances SET status = 'skipped' WHERE id = ?1 AND status = ?2",
            params![instance_id, instance.status.as_str()],
        )?;
        if updated == 0 {
            let current = fetch_instance(&tx, instance_id)?;
            return Err(EngineError::InvalidState {
                from: current.status,
                operation: "skip",
            }
            .into());
        }
        let instance = fetch_instance(&tx, instance_id)?;
        tx.commit()?;
        info!(instance_id, "task skipped");
        self.events.push(Event::TaskSkipped {
            instance_id: instance_id.to_string(),
            at: now,
        });
        Ok(instance)
    }

    /// Debit back an approved instance's awarded points.
    ///
    /// The instance stays `approved` -- the ledger records the
    /// correction, keyed on the instance id so a retried reversal is a
    /// no-op.
    pub fn reverse_approval(&mut self, instance_id: &str, now: DateTime<Utc>) -> Result<LedgerEntry> {
        let tx = self.db.transaction()?;
        let instance = fetch_instance(&tx, instance_id)?;
        if instance.status != TaskStatus::Approved {
            return Err(EngineError::InvalidState {
                from: instance.status,
                operation: "reverse",
            }
            .into());
        }
        let awarded = instance.awarded_points.unwrap_or(0);
        let applied = Ledger::debit(
            &tx,
            &instance.assignee_id,
            awarded,
            EntryReason::Reversal,
            instance_id,
            now,
        )?;
        tx.commit()?;
        info!(instance_id, amount = awarded, "approval reversed");
        if !applied.replayed {
            self.events.push(Event::PointsDebited {
                account_id: instance.assignee_id,
                amount: awarded,
                reason: EntryReason::Reversal,
                correlation_id: instance_id.to_string(),
                at: now,
            });
        }
        Ok(applied.entry)
    }
}

fn fetch_instance(conn: &Connection, instance_id: &str) -> Result<TaskInstance> {
    storage::get_instance(conn, instance_id)?.ok_or_else(|| {
        EngineError::NotFound {
            entity: "instance",
            id: instance_id.to_string(),
        }
        .into()
    })
}

/// Approval side effects, shared by auto-approval and guardian review.
///
/// Executed at most once per instance: every credit is keyed on the
/// instance id, so re-entry (a retried approval) replays the stored
/// entries instead of crediting again.
fn apply_approval(
    tx: &Connection,
    effort_bonus: &EffortBonusConfig,
    tracker: &StreakTracker,
    instance: &TaskInstance,
    reviewer_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(i64, Vec<Event>)> {
    let assignee = instance.assignee_id.as_str();
    let mut events = Vec::new();
    let mut awarded = 0i64;

    let base = Ledger::credit(
        tx,
        assignee,
        instance.points,
        EntryReason::TaskApproval,
        &instance.id,
        now,
    )?;
    awarded += base.entry.delta;
    if !base.replayed {
        events.push(Event::PointsCredited {
            account_id: assignee.to_string(),
            amount: base.entry.delta,
            reason: EntryReason::TaskApproval,
            correlation_id: instance.id.clone(),
            at: now,
        });
    }

    if let Some(minutes) = instance.effort_minutes {
        let bonus = effort_bonus.points_for(minutes);
        if bonus > 0 {
            let applied = Ledger::credit(
                tx,
                assignee,
                bonus,
                EntryReason::EffortBonus,
                &instance.id,
                now,
            )?;
            awarded += applied.entry.delta;
            if !applied.replayed {
                events.push(Event::PointsCredited {
                    account_id: assignee.to_string(),
                    amount: bonus,
                    reason: EntryReason::EffortBonus,
                    correlation_id: instance.id.clone(),
                    at: now,
                });
            }
        }
    }

    // The streak measures the day the work was done, not when it was
    // reviewed.
    let completion_date = instance.submitted_at.unwrap_or(now).date_naive();
    let update = tracker.record_completion(tx, assignee, completion_date)?;
    if update.advanced {
        events.push(Event::StreakAdvanced {
            account_id: assignee.to_string(),
            current_streak: update.current_streak,
            longest_streak: update.longest_streak,
            at: now,
        });
    }
    if let Some(milestone) = update.crossed_milestone {
        let correlation = format!("{}::milestone-{}", instance.id, milestone.days);
        let applied = Ledger::credit(
            tx,
            assignee,
            milestone.bonus,
            EntryReason::StreakBonus,
            &correlation,
            now,
        )?;
        awarded += applied.entry.delta;
        if !applied.replayed {
            events.push(Event::MilestoneReached {
                account_id: assignee.to_string(),
                threshold_days: milestone.days,
                bonus_points: milestone.bonus,
                at: now,
            });
        }
    }

    tx.execute(
        "UPDATE task_instances SET awarded_points = ?2 WHERE id = ?1",
        params![instance.id, awarded],
    )?;

    events.push(Event::TaskApproved {
        instance_id: instance.id.clone(),
        assignee_id: assignee.to_string(),
        awarded_points: awarded,
        reviewer_id: reviewer_id.map(str::to_string),
        at: now,
    });

    Ok((awarded, events))
}
