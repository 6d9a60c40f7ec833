pub mod account;
pub mod config;
pub mod ledger;
pub mod task;

use chrono::{DateTime, NaiveDate, Utc};
use choreboard_core::storage::Config;
use choreboard_core::{Database, RewardEngine, TaskStatus};

/// Open the engine with the on-disk database and configuration.
pub fn open_engine() -> Result<RewardEngine, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Database::open()?;
    let engine_config = config.to_engine_config()?;
    let policy = Box::new(config.allow_list());
    Ok(RewardEngine::new(db, engine_config, policy))
}

/// The request timestamp for every CLI-invoked operation.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn parse_date(value: &str) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    value
        .parse::<NaiveDate>()
        .map_err(|e| format!("invalid date '{value}': {e}").into())
}

pub fn parse_status(value: &str) -> Result<TaskStatus, Box<dyn std::error::Error>> {
    match value {
        "scheduled" => Ok(TaskStatus::Scheduled),
        "assigned" => Ok(TaskStatus::Assigned),
        "pending_approval" => Ok(TaskStatus::PendingApproval),
        "approved" => Ok(TaskStatus::Approved),
        "rejected" => Ok(TaskStatus::Rejected),
        "skipped" => Ok(TaskStatus::Skipped),
        other => Err(format!("unknown status '{other}'").into()),
    }
}
