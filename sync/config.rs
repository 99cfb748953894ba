use crate::error::SyncError;
use log::info;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Which side of the bus this process plays. Supplied from outside (launch
/// argument, config file); the subsystem never negotiates it.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Player,
    Controller,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DriftConfig {
    /// Below this absolute offset (seconds) the tracks count as synced.
    pub synced_threshold: f64,
    /// Above this absolute offset (seconds) the secondary is hard-seeked.
    pub major_threshold: f64,
    pub slow_rate: f64,
    pub fast_rate: f64,
    pub resume_cooldown_ms: u64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            synced_threshold: 0.15,
            major_threshold: 1.0,
            slow_rate: 0.95,
            fast_rate: 1.05,
            resume_cooldown_ms: 1_000,
        }
    }
}

impl DriftConfig {
    pub fn resume_cooldown(&self) -> Duration {
        Duration::from_millis(self.resume_cooldown_ms)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub role: Role,
    pub debounce_ms: u64,
    pub stale_threshold_ms: u64,
    pub pong_window_ms: u64,
    pub liveness_tick_ms: u64,
    /// How long a starting Player listens for an already active Player.
    /// Zero disables the probe.
    pub conflict_probe_ms: u64,
    pub log_level: String,
    pub accent_color: Option<String>,
    pub drift: DriftConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            role: Role::Player,
            debounce_ms: 100,
            stale_threshold_ms: 10_000,
            pong_window_ms: 3_000,
            liveness_tick_ms: 1_000,
            conflict_probe_ms: 250,
            log_level: "info".to_string(),
            accent_color: None,
            drift: DriftConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn liveness_tick(&self) -> Duration {
        Duration::from_millis(self.liveness_tick_ms)
    }

    pub fn conflict_probe(&self) -> Duration {
        Duration::from_millis(self.conflict_probe_ms)
    }

    pub fn from_toml(content: &str) -> Result<Self, SyncError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads the config file, falling back to defaults when it does not exist.
    pub async fn load(file_path: &Path) -> Result<Self, SyncError> {
        if !file_path.exists() {
            info!("No config at {}, using defaults", file_path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(file_path).await?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = SyncConfig::from_toml("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(100));
        assert_eq!(config.stale_threshold_ms, 10_000);
    }

    #[test]
    fn partial_drift_table_keeps_other_defaults() {
        let config = SyncConfig::from_toml(
            r##"
            role = "controller"
            accent_color = "#ff8800"

            [drift]
            major_threshold = 2.5
            "##,
        )
        .unwrap();
        assert_eq!(config.role, Role::Controller);
        assert_eq!(config.accent_color.as_deref(), Some("#ff8800"));
        assert!((config.drift.major_threshold - 2.5).abs() < f64::EPSILON);
        assert!((config.drift.synced_threshold - 0.15).abs() < f64::EPSILON);
        assert_eq!(config.drift.resume_cooldown(), Duration::from_millis(1_000));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(matches!(
            SyncConfig::from_toml("role = \"observer\""),
            Err(SyncError::TomlParsing(_))
        ));
    }
}
