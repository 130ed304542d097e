//! Panel configuration
//!
//! Handles:
//! - Per-layout color arrays (one textual expression per LED slot)
//! - Refresh cadence, animation cycle and metrics staleness
//! - Temperature units and GPU vendor selection
//! - JSON load/save from an OS-specific location

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::color::{ExprError, FALLBACK_COLOR};
use crate::layout::{LayoutMode, LedGroupIndex};
use crate::metrics::{GpuVendor, TempUnit, TemperatureUnits};

/// Environment override for the config file location
pub const CONFIG_ENV_VAR: &str = "LEDPANEL_CONFIG";

const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not find config directory")]
    NoConfigDir,
    #[error("Unknown LED group: {0}")]
    UnknownGroup(String),
    #[error("LED slot {slot} out of range (layout has {count} LEDs)")]
    SlotOutOfRange { slot: usize, count: usize },
    #[error("Invalid color expression: {0}")]
    Color(#[from] ExprError),
}

/// Which stored color array drives the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKey {
    Time,
    Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorSet {
    pub colors: Vec<String>,
}

impl ColorSet {
    pub fn filled(expr: &str, count: usize) -> Self {
        Self {
            colors: vec![expr.to_string(); count],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub layout_mode: LayoutMode,
    pub display_mode: String,
    pub time: ColorSet,
    pub metrics: ColorSet,
    /// Seconds between frames
    pub update_interval: f64,
    /// Seconds a metrics snapshot stays fresh
    pub metrics_update_interval: f64,
    /// Seconds per animation cycle
    pub cycle_duration: f64,
    pub cpu_temperature_unit: TempUnit,
    pub gpu_temperature_unit: TempUnit,
    pub gpu_vendor: GpuVendor,
    pub cpu_min_temp: f64,
    pub cpu_max_temp: f64,
    pub gpu_min_temp: f64,
    pub gpu_max_temp: f64,
    pub product_id: String,
    pub vendor_id: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        let count = LedGroupIndex::for_mode(LayoutMode::Big).led_count();
        Self {
            layout_mode: LayoutMode::Big,
            display_mode: "metrics".to_string(),
            time: ColorSet::filled("FF0000-00FF00-0000FF-FF0000", count),
            metrics: ColorSet::filled(&FALLBACK_COLOR.to_string(), count),
            update_interval: 0.1,
            metrics_update_interval: 0.5,
            cycle_duration: 5.0,
            cpu_temperature_unit: TempUnit::Celsius,
            gpu_temperature_unit: TempUnit::Celsius,
            gpu_vendor: GpuVendor::Nvidia,
            cpu_min_temp: 30.0,
            cpu_max_temp: 90.0,
            gpu_min_temp: 30.0,
            gpu_max_temp: 90.0,
            product_id: String::new(),
            vendor_id: String::new(),
        }
    }
}

impl PanelConfig {
    /// Small layouts always use the metrics colors; big ones follow the display mode
    pub fn active_color_key(&self) -> ColorKey {
        match self.layout_mode {
            LayoutMode::Big if self.display_mode == "time" => ColorKey::Time,
            _ => ColorKey::Metrics,
        }
    }

    pub fn colors(&self, key: ColorKey) -> &ColorSet {
        match key {
            ColorKey::Time => &self.time,
            ColorKey::Metrics => &self.metrics,
        }
    }

    pub fn colors_mut(&mut self, key: ColorKey) -> &mut ColorSet {
        match key {
            ColorKey::Time => &mut self.time,
            ColorKey::Metrics => &mut self.metrics,
        }
    }

    pub fn update_interval(&self) -> Duration {
        seconds_or(self.update_interval, Duration::from_millis(100))
    }

    pub fn metrics_update_interval(&self) -> Duration {
        seconds_or(self.metrics_update_interval, Duration::from_millis(500))
    }

    pub fn temperature_units(&self) -> TemperatureUnits {
        TemperatureUnits {
            cpu: self.cpu_temperature_unit,
            gpu: self.gpu_temperature_unit,
        }
    }

    /// Load config, falling back to defaults when missing or unreadable
    pub async fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::try_load(path).await {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Invalid config {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub async fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save config as pretty JSON, creating parent directories
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Explicit path, else `$LEDPANEL_CONFIG`, else the OS config directory
    pub fn resolve_path(explicit: Option<String>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit.or_else(|| std::env::var(CONFIG_ENV_VAR).ok()) {
            return Ok(PathBuf::from(path));
        }
        Self::config_file_path()
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("ledpanel");
        path.push("config.json");
        Ok(path)
    }
}

fn seconds_or(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| *d >= MIN_INTERVAL)
        .unwrap_or_else(|| {
            warn!("Interval {}s is unusable, using {:?}", value, fallback);
            fallback
        })
}
