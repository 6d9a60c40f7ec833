//! Recurring schedule generator.
//!
//! Expands a recurring task definition into concrete dated instances over
//! a horizon of days. Expansion is pure: the generator only creates new
//! instances, never mutates existing ones, and the assignee for a date is
//! a function of the date itself, so regenerating any date always yields
//! the same assignee. The persisting wrapper lives on `RewardEngine`.

use std::collections::HashSet;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};

use crate::task::{TaskDefinition, TaskInstance, TaskStatus};

/// Rotation: whole days between the definition's anchor date and the
/// target date, floor-modulo the assignee count. Dates before the anchor
/// still map to a non-negative index.
pub fn rotation_index(anchor: NaiveDate, date: NaiveDate, assignee_count: usize) -> usize {
    debug_assert!(assignee_count > 0);
    let days = (date - anchor).num_days();
    days.rem_euclid(assignee_count as i64) as usize
}

/// Expands definitions into dated task instances.
#[derive(Debug, Clone)]
pub struct ScheduleGenerator {
    /// Due time-of-day applied when the definition has none.
    default_due_time: NaiveTime,
}

impl ScheduleGenerator {
    /// Create a generator with the end-of-day default due time.
    pub fn new() -> Self {
        Self {
            default_due_time: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        }
    }

    /// Create with a custom default due time-of-day.
    pub fn with_default_due_time(default_due_time: NaiveTime) -> Self {
        Self { default_due_time }
    }

    /// Expand `definition` over `[start_date, start_date + days_ahead)`.
    ///
    /// Emits one instance per calendar day matching the definition's
    /// cadence and not already present in `existing_dates`, ascending by
    /// date. Pre-staging definitions emit strictly-future dates as
    /// `scheduled`; everything else is `assigned`.
    pub fn expand(
        &self,
        definition: &TaskDefinition,
        start_date: NaiveDate,
        days_ahead: u32,
        existing_dates: &HashSet<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Vec<TaskInstance> {
        if definition.assignees.is_empty() {
            return Vec::new();
        }

        let due_time = definition.due_time.unwrap_or(self.default_due_time);
        let mut instances = Vec::new();

        for offset in 0..u64::from(days_ahead) {
            let Some(date) = start_date.checked_add_days(Days::new(offset)) else {
                break;
            };
            if !definition.matches_date(date) || existing_dates.contains(&date) {
                continue;
            }

            let index = rotation_index(definition.anchor_date, date, definition.assignees.len());
            let assignee = definition.assignees[index].clone();
            let status = if definition.prestage && date > start_date {
                TaskStatus::Scheduled
            } else {
                TaskStatus::Assigned
            };

            instances.push(TaskInstance::new(
                definition.id.clone(),
                assignee,
                date.and_time(due_time).and_utc(),
                date,
                definition.points,
                status,
                now,
            ));
        }

        instances
    }
}

impl Default for ScheduleGenerator {
    fn default() -> Self {
        Self::new()
    }
}
