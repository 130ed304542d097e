//! Hardware telemetry for the panel
//!
//! Provides the four signals the panel can display or key colors on:
//! - CPU and GPU temperature (Celsius internally)
//! - CPU and GPU utilization (percent)
//!
//! Backends are resolved once from ordered candidate lists (`registry`),
//! then polled under a staleness window (`cache`).

mod backends;
mod cache;
mod command;
mod probe;
mod registry;

pub use backends::{default_candidates, AmdGpuSysfs, AmdReading, NvidiaSmi, SysinfoComponentTemp,
    SysinfoCpuUsage, ThermalZoneTemp, VcgencmdTemp, WmiThermalZoneTemp};
pub use cache::MetricsCache;
pub use probe::{Candidates, MetricProbe, ProbeError, ProbeFuture};
pub use registry::MetricsRegistry;

#[cfg(test)]
pub(crate) use probe::testing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Telemetry signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    CpuTemp,
    GpuTemp,
    CpuUsage,
    GpuUsage,
}

impl Signal {
    pub const ALL: [Signal; 4] = [Signal::CpuTemp, Signal::GpuTemp, Signal::CpuUsage, Signal::GpuUsage];

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::CpuTemp => "cpu_temp",
            Signal::GpuTemp => "gpu_temp",
            Signal::CpuUsage => "cpu_usage",
            Signal::GpuUsage => "gpu_usage",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str().eq_ignore_ascii_case(key))
    }

    pub fn device(self) -> Device {
        match self {
            Signal::CpuTemp | Signal::CpuUsage => Device::Cpu,
            Signal::GpuTemp | Signal::GpuUsage => Device::Gpu,
        }
    }

    pub fn is_temperature(self) -> bool {
        matches!(self, Signal::CpuTemp | Signal::GpuTemp)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Gpu,
}

/// GPU vendor selector, drives which GPU candidates are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    #[default]
    Nvidia,
    Amd,
    /// No GPU backends are tried
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

/// Per-device temperature unit selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemperatureUnits {
    pub cpu: TempUnit,
    pub gpu: TempUnit,
}

impl TemperatureUnits {
    pub fn for_device(&self, device: Device) -> TempUnit {
        match device {
            Device::Cpu => self.cpu,
            Device::Gpu => self.gpu,
        }
    }
}

/// `F = round(C * 9/5 + 32)`
pub fn celsius_to_fahrenheit(celsius: i32) -> i32 {
    (f64::from(celsius) * 9.0 / 5.0 + 32.0).round() as i32
}

/// One reading per signal plus the time it was computed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub cpu_temp: i32,
    pub gpu_temp: i32,
    pub cpu_usage: i32,
    pub gpu_usage: i32,
    pub computed_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// All signals at the 0 sentinel
    pub fn zeroed(computed_at: DateTime<Utc>) -> Self {
        Self {
            cpu_temp: 0,
            gpu_temp: 0,
            cpu_usage: 0,
            gpu_usage: 0,
            computed_at,
        }
    }

    pub fn get(&self, signal: Signal) -> i32 {
        match signal {
            Signal::CpuTemp => self.cpu_temp,
            Signal::GpuTemp => self.gpu_temp,
            Signal::CpuUsage => self.cpu_usage,
            Signal::GpuUsage => self.gpu_usage,
        }
    }

    pub fn set(&mut self, signal: Signal, value: i32) {
        match signal {
            Signal::CpuTemp => self.cpu_temp = value,
            Signal::GpuTemp => self.gpu_temp = value,
            Signal::CpuUsage => self.cpu_usage = value,
            Signal::GpuUsage => self.gpu_usage = value,
        }
    }

    /// Copy with temperatures converted for presentation
    pub fn with_units(&self, units: TemperatureUnits) -> Self {
        let mut converted = self.clone();
        for signal in Signal::ALL.into_iter().filter(|s| s.is_temperature()) {
            if units.for_device(signal.device()) == TempUnit::Fahrenheit {
                converted.set(signal, celsius_to_fahrenheit(self.get(signal)));
            }
        }
        converted
    }
}
