//! Runtime configuration loaded from `~/.sentinel/config.toml`.
//!
//! Every section and field has a default, so a missing file or a partial
//! file both produce a usable config. `validate` catches values that would
//! make the engine misbehave (zero periods, broken ladders).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SentinelError};
use crate::incident::NotifyWindows;
use crate::ladder::{default_stages, LadderStage, RecoveryAction};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".sentinel/config.toml";
const DEFAULT_STORE_RELATIVE_PATH: &str = ".sentinel/records.db";

pub const ACCOUNT_ENV: &str = "SENTINEL_ACCOUNT";
pub const LOG_LEVEL_ENV: &str = "SENTINEL_LOG_LEVEL";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IncidentsConfig {
    #[serde(default = "default_classified_window_secs")]
    pub classified_window_secs: u64,
    #[serde(default = "default_unclassified_window_secs")]
    pub unclassified_window_secs: u64,
}

impl Default for IncidentsConfig {
    fn default() -> Self {
        Self {
            classified_window_secs: default_classified_window_secs(),
            unclassified_window_secs: default_unclassified_window_secs(),
        }
    }
}

impl IncidentsConfig {
    pub fn windows(&self) -> NotifyWindows {
        NotifyWindows {
            classified: Duration::from_secs(self.classified_window_secs),
            unclassified: Duration::from_secs(self.unclassified_window_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct LadderStageConfig {
    pub delay_secs: u64,
    pub action: RecoveryAction,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LadderConfig {
    #[serde(default = "default_ladder_stages")]
    pub stages: Vec<LadderStageConfig>,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            stages: default_ladder_stages(),
        }
    }
}

impl LadderConfig {
    pub fn stages(&self) -> Vec<LadderStage> {
        self.stages
            .iter()
            .map(|stage| LadderStage {
                delay: Duration::from_secs(stage.delay_secs),
                action: stage.action,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WatchdogConfig {
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: default_inactivity_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CycleConfig {
    #[serde(default = "default_max_cycle_ms")]
    pub max_duration_ms: u64,
    #[serde(default = "default_long_cycle_window_secs")]
    pub long_cycle_window_secs: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_cycle_ms(),
            long_cycle_window_secs: default_long_cycle_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetentionConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days.saturating_mul(24 * 60 * 60))
    }
}

/// Intervals for the session producers the host registers by name.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProducersConfig {
    #[serde(default = "default_lean_poll_secs")]
    pub lean_poll_secs: u64,
    #[serde(default = "default_full_reload_secs")]
    pub full_reload_secs: u64,
    #[serde(default = "default_dialog_poll_secs")]
    pub dialog_poll_secs: u64,
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,
}

impl ProducersConfig {
    pub fn lean_poll(&self) -> Duration {
        Duration::from_secs(self.lean_poll_secs)
    }

    pub fn full_reload(&self) -> Duration {
        Duration::from_secs(self.full_reload_secs)
    }

    pub fn dialog_poll(&self) -> Duration {
        Duration::from_secs(self.dialog_poll_secs)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_secs(self.snapshot_secs)
    }
}

impl Default for ProducersConfig {
    fn default() -> Self {
        Self {
            lean_poll_secs: default_lean_poll_secs(),
            full_reload_secs: default_full_reload_secs(),
            dialog_poll_secs: default_dialog_poll_secs(),
            snapshot_secs: default_snapshot_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(default = "default_record_label")]
    pub label: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite file. Defaults to `~/.sentinel/records.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => home_relative(DEFAULT_STORE_RELATIVE_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_console_level")]
    pub console_level: String,
    #[serde(default = "default_file_level")]
    pub file_level: String,
    /// Directory for daily log files. No file logging when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: default_console_level(),
            file_level: default_file_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TimersConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SentinelConfig {
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default)]
    pub incidents: IncidentsConfig,
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub producers: ProducersConfig,
    #[serde(default = "default_collections")]
    pub collections: Vec<CollectionConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub timers: TimersConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            incidents: IncidentsConfig::default(),
            ladder: LadderConfig::default(),
            watchdog: WatchdogConfig::default(),
            cycle: CycleConfig::default(),
            retention: RetentionConfig::default(),
            producers: ProducersConfig::default(),
            collections: default_collections(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            timers: TimersConfig::default(),
        }
    }
}

impl SentinelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.account.trim().is_empty() {
            return Err(invalid("account must not be empty"));
        }
        if self.incidents.classified_window_secs == 0 || self.incidents.unclassified_window_secs == 0
        {
            return Err(invalid("incident notification windows must be positive"));
        }
        if self.watchdog.inactivity_secs == 0 {
            return Err(invalid("watchdog.inactivity_secs must be positive"));
        }
        if self.retention.max_age_days == 0 || self.retention.sweep_interval_secs == 0 {
            return Err(invalid("retention periods must be positive"));
        }
        if self.timers.tick_ms == 0 {
            return Err(invalid("timers.tick_ms must be positive"));
        }
        for (name, secs) in [
            ("lean_poll_secs", self.producers.lean_poll_secs),
            ("full_reload_secs", self.producers.full_reload_secs),
            ("dialog_poll_secs", self.producers.dialog_poll_secs),
            ("snapshot_secs", self.producers.snapshot_secs),
        ] {
            if secs == 0 {
                return Err(invalid(&format!("producers.{name} must be positive")));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            if collection.name.trim().is_empty() {
                return Err(invalid("collection names must not be empty"));
            }
            if !seen.insert(collection.name.as_str()) {
                return Err(invalid(&format!(
                    "collection {} is configured twice",
                    collection.name
                )));
            }
        }

        validate_ladder(&self.ladder.stages)
    }

    /// Applies `SENTINEL_ACCOUNT` and `SENTINEL_LOG_LEVEL` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(ACCOUNT_ENV).ok(),
            std::env::var(LOG_LEVEL_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, account: Option<String>, log_level: Option<String>) {
        if let Some(account) = account.filter(|value| !value.trim().is_empty()) {
            self.account = account;
        }
        if let Some(level) = log_level.filter(|value| !value.trim().is_empty()) {
            self.logging.console_level = level;
        }
    }

    pub fn labels(&self) -> std::collections::HashMap<String, String> {
        self.collections
            .iter()
            .map(|collection| (collection.name.clone(), collection.label.clone()))
            .collect()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|collection| collection.name.clone())
            .collect()
    }
}

fn validate_ladder(stages: &[LadderStageConfig]) -> Result<()> {
    let Some(last) = stages.last() else {
        return Err(invalid("ladder needs at least one stage"));
    };
    if last.action != RecoveryAction::Restart {
        return Err(invalid("the last ladder stage must be restart"));
    }
    if stages[..stages.len() - 1]
        .iter()
        .any(|stage| stage.action == RecoveryAction::Restart)
    {
        return Err(invalid("restart may only be the last ladder stage"));
    }
    if last.delay_secs == 0 {
        return Err(invalid("the restart stage needs a positive delay"));
    }
    if stages
        .windows(2)
        .any(|pair| pair[0].delay_secs >= pair[1].delay_secs)
    {
        return Err(invalid("ladder stage delays must be strictly increasing"));
    }
    Ok(())
}

fn invalid(message: &str) -> SentinelError {
    SentinelError::ConfigInvalid(message.to_string())
}

fn home_relative(relative: &str) -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(SentinelError::HomeDirNotFound)?;
    Ok(home.join(relative))
}

pub fn default_config_path() -> Result<PathBuf> {
    home_relative(DEFAULT_CONFIG_RELATIVE_PATH)
}

/// Reads the config at `path` (or the default location), applies environment
/// overrides and validates the result. A missing file yields defaults.
pub fn load_config(path: Option<PathBuf>) -> Result<SentinelConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    let mut config = read_config_file(&config_path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<SentinelConfig> {
    if !path.exists() {
        return Ok(SentinelConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| SentinelError::Io {
        context: format!("read config {}", path.display()),
        source,
    })?;
    toml::from_str::<SentinelConfig>(&content).map_err(|err| SentinelError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

fn default_account() -> String {
    "sentinel".to_string()
}

fn default_classified_window_secs() -> u64 {
    120
}

fn default_unclassified_window_secs() -> u64 {
    300
}

fn default_ladder_stages() -> Vec<LadderStageConfig> {
    default_stages()
        .into_iter()
        .map(|stage| LadderStageConfig {
            delay_secs: stage.delay.as_secs(),
            action: stage.action,
        })
        .collect()
}

fn default_inactivity_secs() -> u64 {
    180
}

fn default_max_cycle_ms() -> u64 {
    15_000
}

fn default_long_cycle_window_secs() -> u64 {
    300
}

fn default_max_age_days() -> u64 {
    7
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_lean_poll_secs() -> u64 {
    5
}

fn default_full_reload_secs() -> u64 {
    600
}

fn default_dialog_poll_secs() -> u64 {
    30
}

fn default_snapshot_secs() -> u64 {
    3600
}

fn default_record_label() -> String {
    "New record".to_string()
}

fn default_collections() -> Vec<CollectionConfig> {
    vec![CollectionConfig {
        name: "open".to_string(),
        label: "New open record".to_string(),
    }]
}

fn default_console_level() -> String {
    "info".to_string()
}

fn default_file_level() -> String {
    "debug".to_string()
}

fn default_tick_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, body).expect("write config");
        (temp_dir, path)
    }

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = read_config_file(&temp_dir.path().join("missing.toml")).expect("load");

        assert_eq!(config, SentinelConfig::default());
        assert_eq!(config.incidents.windows(), NotifyWindows::default());
        assert_eq!(config.ladder.stages(), default_stages());
        assert_eq!(config.retention.max_age(), Duration::from_secs(7 * 24 * 60 * 60));
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, path) = write_config(
            r#"
account = "punter-7"

[watchdog]
inactivity_secs = 60

[[collections]]
name = "open"
label = "New open bet"

[[collections]]
name = "settled"
"#,
        );
        let config = read_config_file(&path).expect("load");

        assert_eq!(config.account, "punter-7");
        assert_eq!(config.watchdog.inactivity_secs, 60);
        assert_eq!(config.incidents, IncidentsConfig::default());
        assert_eq!(config.collections.len(), 2);
        assert_eq!(config.collections[1].label, "New record");
        assert_eq!(
            config.labels().get("open").map(String::as_str),
            Some("New open bet")
        );
    }

    #[test]
    fn custom_ladder_parses_actions() {
        let (_dir, path) = write_config(
            r#"
[[ladder.stages]]
delay_secs = 10
action = "mild_recovery"

[[ladder.stages]]
delay_secs = 40
action = "restart"
"#,
        );
        let config = read_config_file(&path).expect("load");
        config.validate().expect("valid ladder");
        assert_eq!(
            config.ladder.stages(),
            vec![
                LadderStage {
                    delay: Duration::from_secs(10),
                    action: RecoveryAction::MildRecovery,
                },
                LadderStage {
                    delay: Duration::from_secs(40),
                    action: RecoveryAction::Restart,
                },
            ]
        );
    }

    #[test]
    fn malformed_file_reports_path() {
        let (_dir, path) = write_config("account = [");
        let err = read_config_file(&path).expect_err("malformed");
        assert!(matches!(err, SentinelError::ConfigMalformed { path: p, .. } if p == path));
    }

    #[test]
    fn rejects_broken_ladders() {
        let stage = |delay_secs, action| LadderStageConfig { delay_secs, action };

        let mut config = SentinelConfig::default();
        config.ladder.stages = Vec::new();
        assert!(config.validate().is_err());

        config.ladder.stages = vec![stage(30, RecoveryAction::MildRecovery)];
        assert!(config.validate().is_err());

        config.ladder.stages = vec![
            stage(30, RecoveryAction::Restart),
            stage(60, RecoveryAction::Restart),
        ];
        assert!(config.validate().is_err());

        config.ladder.stages = vec![
            stage(60, RecoveryAction::MildRecovery),
            stage(30, RecoveryAction::Restart),
        ];
        assert!(config.validate().is_err());

        config.ladder.stages = vec![stage(0, RecoveryAction::Restart)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_periods_and_duplicate_collections() {
        let mut config = SentinelConfig::default();
        config.watchdog.inactivity_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SentinelConfig::default();
        config.producers.lean_poll_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SentinelConfig::default();
        let duplicate = config.collections[0].clone();
        config.collections.push(duplicate);
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_replace_account_and_console_level() {
        let mut config = SentinelConfig::default();
        config.apply_overrides(Some("acct-2".to_string()), Some("trace".to_string()));
        assert_eq!(config.account, "acct-2");
        assert_eq!(config.logging.console_level, "trace");

        config.apply_overrides(Some("  ".to_string()), None);
        assert_eq!(config.account, "acct-2");
    }
}
