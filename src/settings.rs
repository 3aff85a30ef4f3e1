use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::sensing::ScoringMode;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// User-tunable settings, persisted as JSON next to the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FocusSettings {
    pub api_base_url: String,
    pub default_duration_minutes: u32,
    pub weekly_goal_hours: f64,
    pub sample_interval_ms: u64,
    pub jpeg_quality: u8,
    pub scoring: ScoringMode,
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            default_duration_minutes: 25,
            weekly_goal_hours: 20.0,
            sample_interval_ms: 1500,
            jpeg_quality: 80,
            scoring: ScoringMode::Remote,
        }
    }
}

impl FocusSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(100))
    }

    /// Applies `FOCUSFY_API_URL` on top of the stored value.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("FOCUSFY_API_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        self
    }
}

/// Bearer credential for the collector, from `FOCUSFY_TOKEN`.
pub fn token_from_env() -> Option<String> {
    std::env::var("FOCUSFY_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `FOCUSFY_DEBUG=1|true` emits a heartbeat on every tick.
pub fn debug_mode_from_env() -> bool {
    std::env::var("FOCUSFY_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<FocusSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            FocusSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> FocusSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: FocusSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &FocusSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
