mod config;
pub mod database;

pub use config::{AutoApprovalFileConfig, BonusFileConfig, Config, EngineFileConfig};
pub use database::{
    deactivate_definition, due_scheduled_instances, existing_dates_for_definition, get_account,
    get_definition, get_instance, insert_account, insert_definition, insert_instance,
    list_definitions, list_instances_by_assignee, list_instances_for_definition,
    update_definition_assignees, Database,
};

use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Returns `~/.config/choreboard[-dev]/` based on CHOREBOARD_ENV.
///
/// Set CHOREBOARD_ENV=dev to use a development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("CHOREBOARD_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("choreboard-dev")
    } else {
        base_dir.join("choreboard")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::LoadFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}
