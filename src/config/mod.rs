use crate::board::{BedId, BedStatus, BoardRules};
use crate::engine::{EngineSettings, MergeStrategy};
use crate::history::{DisplayFormat, RetentionPolicy};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Complete bed board configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub board: BoardSection,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Bed set and status vocabulary
#[derive(Debug, Clone, Deserialize)]
pub struct BoardSection {
    #[serde(default = "default_beds")]
    pub beds: Vec<String>,
    #[serde(default = "default_initial_status")]
    pub initial_status: String,
    /// Allowed statuses; empty accepts any
    #[serde(default = "default_statuses")]
    pub statuses: Vec<String>,
}

fn default_beds() -> Vec<String> {
    (1..=20).map(|n| n.to_string()).collect()
}

fn default_initial_status() -> String {
    "available".to_string()
}

fn default_statuses() -> Vec<String> {
    ["available", "occupied", "cleaning"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for BoardSection {
    fn default() -> Self {
        Self {
            beds: default_beds(),
            initial_status: default_initial_status(),
            statuses: default_statuses(),
        }
    }
}

/// Retention and undo behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Newest entries to keep (0 = no count cap)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Age window in milliseconds (0 = no age cap)
    #[serde(default = "default_max_age_millis")]
    pub max_age_millis: i64,
    /// Undo never removes the oldest entry
    #[serde(default)]
    pub preserve_initial_entry: bool,
    #[serde(default)]
    pub merge: MergeStrategy,
}

fn default_max_entries() -> usize {
    100
}

fn default_max_age_millis() -> i64 {
    24 * 60 * 60 * 1000
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_age_millis: default_max_age_millis(),
            preserve_initial_entry: false,
            merge: MergeStrategy::default(),
        }
    }
}

impl HistoryConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_entries: (self.max_entries > 0).then_some(self.max_entries),
            max_age_millis: (self.max_age_millis > 0).then_some(self.max_age_millis),
        }
    }
}

/// SQLite persistence
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_persistence_enabled() -> bool {
    true
}

fn default_db_path() -> String {
    "bedboard.db".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            db_path: default_db_path(),
        }
    }
}

/// How `displayTime` is rendered
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_utc_offset_minutes() -> i32 {
    8 * 60
}

fn default_pattern() -> String {
    "%Y/%m/%d %H:%M:%S".to_string()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            pattern: default_pattern(),
        }
    }
}

impl DisplayConfig {
    pub fn format(&self) -> Result<DisplayFormat> {
        match DisplayFormat::new(self.utc_offset_minutes, &self.pattern) {
            Some(format) => Ok(format),
            None => bail!(
                "invalid display format: offset {} minutes, pattern {:?}",
                self.utc_offset_minutes,
                self.pattern
            ),
        }
    }
}

/// HTTP server and channel sizing
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Views buffered per observer before it is considered lagged
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Commands waiting for the engine before submitters back off
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_port() -> u16 {
    3000
}

fn default_broadcast_capacity() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            broadcast_capacity: default_broadcast_capacity(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BoardConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.board.beds.is_empty() {
            bail!("[board] beds must name at least one bed");
        }
        if self.board.beds.iter().any(|b| b.trim().is_empty()) {
            bail!("[board] bed ids must not be blank");
        }
        if self.board.initial_status.trim().is_empty() {
            bail!("[board] initial_status must not be blank");
        }
        if !self.board.statuses.is_empty()
            && !self.board.statuses.contains(&self.board.initial_status)
        {
            bail!(
                "[board] initial_status {:?} is not one of the allowed statuses",
                self.board.initial_status
            );
        }
        if self.history.max_age_millis < 0 {
            bail!("[history] max_age_millis must not be negative");
        }
        if self.server.broadcast_capacity == 0 {
            bail!("[server] broadcast_capacity must be at least 1");
        }
        if self.server.queue_capacity == 0 {
            bail!("[server] queue_capacity must be at least 1");
        }
        self.display.format()?;
        Ok(())
    }

    pub fn rules(&self) -> BoardRules {
        BoardRules::new(
            self.board.beds.iter().map(BedId::new),
            BedStatus::new(self.board.initial_status.as_str()),
            self.board.statuses.iter().map(BedStatus::new),
        )
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            rules: self.rules(),
            retention: self.history.retention(),
            display: self.display.format()?,
            merge: self.history.merge,
            preserve_initial_entry: self.history.preserve_initial_entry,
            broadcast_capacity: self.server.broadcast_capacity,
        })
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<BoardConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config: BoardConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path))?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults
pub fn load_config_or_default(path: &str) -> Result<BoardConfig> {
    if Path::new(path).exists() {
        load_config(path)
    } else {
        info!(path = %path, "Config file not found, using defaults");
        Ok(BoardConfig::default())
    }
}
