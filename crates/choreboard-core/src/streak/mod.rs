//! Consecutive-day completion streaks and milestone bonuses.
//!
//! A streak counts consecutive calendar days on which a dependent had at
//! least one approved completion. Multiple completions on one day do not
//! inflate the streak; a gap of more than one day resets it to 1.

use chrono::{Days, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A streak bonus threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Streak length (days) that earns the bonus.
    pub days: u32,
    /// Bonus points credited when the streak reaches `days`.
    pub bonus: i64,
}

/// Configuration for streak milestone bonuses.
///
/// The thresholds are product-tunable; defaults follow the shipped table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSchedule {
    pub milestones: Vec<Milestone>,
}

impl Default for MilestoneSchedule {
    fn default() -> Self {
        Self {
            milestones: vec![
                Milestone { days: 3, bonus: 10 },
                Milestone { days: 7, bonus: 25 },
                Milestone { days: 14, bonus: 50 },
                Milestone { days: 30, bonus: 100 },
            ],
        }
    }
}

impl MilestoneSchedule {
    /// Bonus for a streak that just reached exactly `days`, if `days` is a
    /// configured threshold.
    pub fn bonus_for(&self, days: u32) -> Option<Milestone> {
        self.milestones.iter().copied().find(|m| m.days == days)
    }
}

/// Per-dependent streak state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub account_id: String,
    /// Consecutive qualifying days ending at `last_completion_date`.
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_completion_date: Option<NaiveDate>,
}

/// Result of recording one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakUpdate {
    pub current_streak: u32,
    pub longest_streak: u32,
    /// True when this call moved the streak (increment or reset); false
    /// for a repeated completion on an already-counted day.
    pub advanced: bool,
    /// Set the first time the streak reaches a configured threshold.
    pub crossed_milestone: Option<Milestone>,
}

/// Derives streak state from approval history, one record per dependent.
pub struct StreakTracker {
    schedule: MilestoneSchedule,
}

impl StreakTracker {
    /// Create a tracker with the default milestone table.
    pub fn new() -> Self {
        Self {
            schedule: MilestoneSchedule::default(),
        }
    }

    /// Create with a custom milestone schedule.
    pub fn with_schedule(schedule: MilestoneSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &MilestoneSchedule {
        &self.schedule
    }

    /// Record a qualifying completion on `date` and return the new state.
    ///
    /// - exactly one day after the stored date: streak increments;
    /// - same day: no change;
    /// - longer gap, or no prior record: streak resets to 1;
    /// - `date` before the stored date (out-of-order approval): no change.
    ///
    /// `crossed_milestone` is only reported when the streak moved onto a
    /// threshold in this call; the caller pairs it with a milestone-specific
    /// correlation id so the ledger keeps re-entries idempotent.
    pub fn record_completion(
        &self,
        conn: &Connection,
        account_id: &str,
        date: NaiveDate,
    ) -> Result<StreakUpdate> {
        let prior = Self::get(conn, account_id)?;

        let (current, longest, advanced) = match prior {
            Some(StreakRecord {
                current_streak,
                longest_streak,
                last_completion_date: Some(last),
                ..
            }) => {
                if date == last {
                    (current_streak, longest_streak, false)
                } else if Some(date) == last.checked_add_days(Days::new(1)) {
                    let next = current_streak + 1;
                    (next, longest_streak.max(next), true)
                } else if date > last {
                    (1, longest_streak.max(1), true)
                } else {
                    (current_streak, longest_streak, false)
                }
            }
            Some(StreakRecord { longest_streak, .. }) => (1, longest_streak.max(1), true),
            None => (1, 1, true),
        };

        if advanced {
            conn.execute(
                "INSERT INTO streaks (account_id, current_streak, longest_streak, last_completion_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(account_id) DO UPDATE SET
                     current_streak = excluded.current_streak,
                     longest_streak = excluded.longest_streak,
                     last_completion_date = excluded.last_completion_date",
                params![account_id, current, longest, date.to_string()],
            )?;
        }

        let crossed_milestone = if advanced {
            self.schedule.bonus_for(current)
        } else {
            None
        };

        Ok(StreakUpdate {
            current_streak: current,
            longest_streak: longest,
            advanced,
            crossed_milestone,
        })
    }

    /// Read the stored streak record, if any.
    pub fn get(conn: &Connection, account_id: &str) -> Result<Option<StreakRecord>> {
        conn.query_row(
            "SELECT account_id, current_streak, longest_streak, last_completion_date
             FROM streaks WHERE account_id = ?1",
            params![account_id],
            |row| {
                let date_str: Option<String> = row.get(3)?;
                let last_completion_date = match date_str {
                    Some(s) => Some(s.parse::<NaiveDate>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?),
                    None => None,
                };
                Ok(StreakRecord {
                    account_id: row.get(0)?,
                    current_streak: row.get(1)?,
                    longest_streak: row.get(2)?,
                    last_completion_date,
                })
            },
        )
        .optional()
        .map_err(CoreError::from)
    }
}

impl Default for StreakTracker {
    fn default() -> Self {
        Self::new()
    }
}
