//! TOML-based application configuration.
//!
//! Stores the product-tunable constants of the engine:
//! - generation horizon and default due time
//! - effort-bonus caps and streak milestone table
//! - the auto-approval allow-list
//!
//! Configuration is stored at `<data_dir>/config.toml`. All values carry
//! serde defaults, so a missing or partial file yields the shipped
//! defaults rather than an error.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::engine::{EffortBonusConfig, EngineConfig};
use crate::error::{ConfigError, Result};
use crate::policy::AllowList;
use crate::streak::{Milestone, MilestoneSchedule};

/// Generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineFileConfig {
    /// How many days ahead `generate` expands by default.
    #[serde(default = "default_days_ahead")]
    pub days_ahead: u32,
    /// Due time-of-day applied when a definition has none ("HH:MM:SS").
    #[serde(default = "default_due_time")]
    pub default_due_time: String,
}

impl Default for EngineFileConfig {
    fn default() -> Self {
        Self {
            days_ahead: default_days_ahead(),
            default_due_time: default_due_time(),
        }
    }
}

/// Bonus settings: effort caps and streak milestones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusFileConfig {
    #[serde(default = "default_effort_max_minutes")]
    pub effort_max_minutes: u32,
    #[serde(default = "default_effort_max_points")]
    pub effort_max_points: i64,
    #[serde(default = "default_milestones")]
    pub milestones: Vec<Milestone>,
}

impl Default for BonusFileConfig {
    fn default() -> Self {
        Self {
            effort_max_minutes: default_effort_max_minutes(),
            effort_max_points: default_effort_max_points(),
            milestones: default_milestones(),
        }
    }
}

/// Auto-approval settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoApprovalFileConfig {
    /// Task names approved without guardian review (exact match).
    #[serde(default)]
    pub task_names: Vec<String>,
}

/// Application configuration, persisted as TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineFileConfig,
    #[serde(default)]
    pub bonus: BonusFileConfig,
    #[serde(default)]
    pub auto_approval: AutoApprovalFileConfig,
}

impl Config {
    fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing the defaults on first run.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be parsed or the
    /// default cannot be written.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: Config =
                    toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                        path,
                        message: e.to_string(),
                    })?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    /// Returns an error if the config cannot be serialized or written.
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Load, falling back to defaults on any error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Convert the file values into the engine's injected configuration.
    ///
    /// # Errors
    /// Returns `InvalidValue` if the due time string does not parse.
    pub fn to_engine_config(&self) -> Result<EngineConfig> {
        let default_due_time = NaiveTime::parse_from_str(&self.engine.default_due_time, "%H:%M:%S")
            .map_err(|e| ConfigError::InvalidValue {
                key: "engine.default_due_time".to_string(),
                message: e.to_string(),
            })?;
        Ok(EngineConfig {
            days_ahead: self.engine.days_ahead,
            default_due_time,
            effort_bonus: EffortBonusConfig {
                max_minutes: self.bonus.effort_max_minutes,
                max_points: self.bonus.effort_max_points,
            },
            milestones: MilestoneSchedule {
                milestones: self.bonus.milestones.clone(),
            },
        })
    }

    /// Build the auto-approval allow-list from the configured names.
    pub fn allow_list(&self) -> AllowList {
        AllowList::new(self.auto_approval.task_names.iter().cloned())
    }
}

fn default_days_ahead() -> u32 {
    7
}

fn default_due_time() -> String {
    "23:59:59".to_string()
}

fn default_effort_max_minutes() -> u32 {
    20
}

fn default_effort_max_points() -> i64 {
    10
}

fn default_milestones() -> Vec<Milestone> {
    MilestoneSchedule::default().milestones
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_constants() {
        let config = Config::default();
        assert_eq!(config.engine.days_ahead, 7);
        assert_eq!(config.bonus.effort_max_minutes, 20);
        assert_eq!(config.bonus.effort_max_points, 10);
        assert_eq!(config.bonus.milestones.len(), 4);
        assert!(config.auto_approval.task_names.is_empty());
    }

    #[test]
    fn toml_round_trip() {
        let mut config = Config::default();
        config.auto_approval.task_names = vec!["Feed Pet".to_string()];
        config.engine.days_ahead = 14;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let decoded: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(decoded.engine.days_ahead, 14);
        assert_eq!(decoded.auto_approval.task_names, vec!["Feed Pet"]);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.engine.days_ahead = 21;
        config.bonus.milestones = vec![Milestone { days: 5, bonus: 15 }];
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let decoded: Config =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(decoded.engine.days_ahead, 21);
        assert_eq!(decoded.bonus.milestones, vec![Milestone { days: 5, bonus: 15 }]);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let decoded: Config = toml::from_str("[engine]\ndays_ahead = 3\n").unwrap();
        assert_eq!(decoded.engine.days_ahead, 3);
        assert_eq!(decoded.engine.default_due_time, "23:59:59");
        assert_eq!(decoded.bonus.effort_max_points, 10);
    }

    #[test]
    fn engine_config_conversion() {
        let config = Config::default();
        let engine = config.to_engine_config().unwrap();
        assert_eq!(engine.days_ahead, 7);
        assert_eq!(
            engine.default_due_time,
            NaiveTime::from_hms_opt(23, 59, 59).unwrap()
        );
        assert_eq!(engine.milestones.bonus_for(7).unwrap().bonus, 25);
    }

    #[test]
    fn bad_due_time_is_invalid_value() {
        let mut config = Config::default();
        config.engine.default_due_time = "midnight".to_string();
        assert!(config.to_engine_config().is_err());
    }

    #[test]
    fn allow_list_uses_configured_names() {
        let mut config = Config::default();
        config.auto_approval.task_names = vec!["Feed Pet".to_string()];
        let policy = config.allow_list();
        use crate::policy::AutoApprovePolicy;
        assert!(policy.should_auto_approve("Feed Pet"));
        assert!(!policy.should_auto_approve("feed pet"));
    }
}
