//! Concrete sensor backends and the default candidate ordering
//!
//! CPU temperature: sysinfo sensors, Linux thermal zone, Windows ACPI, Raspberry Pi.
//! CPU usage: sysinfo.
//! GPU temperature/usage: `nvidia-smi` or amdgpu sysfs depending on vendor,
//! with sysinfo sensors as a temperature fallback.

use futures::FutureExt;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{Components, System};
use tokio::task::spawn_blocking;
use tracing::debug;

use super::command::{run_probe_command, PROBE_COMMAND_TIMEOUT};
use super::probe::{Candidates, MetricProbe, ProbeError, ProbeFuture};
use super::{GpuVendor, Signal};

/// Build the ordered candidate lists for a GPU vendor
pub fn default_candidates(vendor: GpuVendor) -> Candidates {
    let cpu_temp: Vec<Box<dyn MetricProbe>> = vec![
        Box::new(SysinfoComponentTemp::cpu()),
        Box::new(ThermalZoneTemp::default()),
        Box::new(WmiThermalZoneTemp),
        Box::new(VcgencmdTemp),
    ];
    let cpu_usage: Vec<Box<dyn MetricProbe>> = vec![Box::new(SysinfoCpuUsage::new())];

    let (gpu_temp, gpu_usage): (Vec<Box<dyn MetricProbe>>, Vec<Box<dyn MetricProbe>>) = match vendor {
        GpuVendor::Nvidia => (
            vec![Box::new(NvidiaSmi::temperature()), Box::new(SysinfoComponentTemp::nvidia())],
            vec![Box::new(NvidiaSmi::utilization())],
        ),
        GpuVendor::Amd => (
            vec![Box::new(AmdGpuSysfs::temperature()), Box::new(SysinfoComponentTemp::amd())],
            vec![Box::new(AmdGpuSysfs::busy())],
        ),
        GpuVendor::Other => (Vec::new(), Vec::new()),
    };

    let mut candidates = Candidates::new();
    candidates.insert(Signal::CpuTemp, cpu_temp);
    candidates.insert(Signal::GpuTemp, gpu_temp);
    candidates.insert(Signal::CpuUsage, cpu_usage);
    candidates.insert(Signal::GpuUsage, gpu_usage);
    candidates
}

/// Temperature from the first sysinfo sensor whose label matches, in label priority order.
/// Sensor refreshes run on the blocking pool.
pub struct SysinfoComponentTemp {
    name: &'static str,
    labels: &'static [&'static str],
    components: Arc<Mutex<Option<Components>>>,
}

impl SysinfoComponentTemp {
    pub fn new(name: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            labels,
            components: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cpu() -> Self {
        Self::new("sysinfo-cpu-sensors", &["coretemp", "cpu_thermal", "k10temp", "acpitz"])
    }

    pub fn nvidia() -> Self {
        Self::new("sysinfo-nvidia-sensors", &["nvidia", "nouveau"])
    }

    pub fn amd() -> Self {
        Self::new("sysinfo-amdgpu-sensors", &["amdgpu", "edge"])
    }

}

fn sample_components(components: &Mutex<Option<Components>>, labels: &[&str]) -> Option<f64> {
    let mut guard = components.lock();
    let components = guard.get_or_insert_with(Components::new_with_refreshed_list);
    components.refresh();

    labels.iter().find_map(|wanted| {
        components
            .list()
            .iter()
            .find(|c| c.label().to_ascii_lowercase().contains(wanted))
            .map(|c| f64::from(c.temperature()))
    })
}

impl MetricProbe for SysinfoComponentTemp {
    fn name(&self) -> &str {
        self.name
    }

    fn read(&self) -> ProbeFuture<'_> {
        let components = self.components.clone();
        let labels = self.labels;
        async move { Ok(spawn_blocking(move || sample_components(&components, labels)).await?) }.boxed()
    }
}

/// Global CPU utilization. The first sample after creation reads 0.
pub struct SysinfoCpuUsage {
    system: Arc<Mutex<System>>,
}

impl SysinfoCpuUsage {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SysinfoCpuUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricProbe for SysinfoCpuUsage {
    fn name(&self) -> &str {
        "sysinfo-cpu-usage"
    }

    fn read(&self) -> ProbeFuture<'_> {
        let system = self.system.clone();
        async move {
            let usage = spawn_blocking(move || {
                let mut sys = system.lock();
                sys.refresh_cpu_usage();
                f64::from(sys.global_cpu_info().cpu_usage())
            })
            .await?;
            Ok(Some(usage))
        }
        .boxed()
    }
}

/// Linux thermal zone file, in milli-degrees Celsius
pub struct ThermalZoneTemp {
    path: PathBuf,
}

impl ThermalZoneTemp {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ThermalZoneTemp {
    fn default() -> Self {
        Self::new("/sys/class/thermal/thermal_zone0/temp")
    }
}

impl MetricProbe for ThermalZoneTemp {
    fn name(&self) -> &str {
        "linux-thermal-zone"
    }

    fn read(&self) -> ProbeFuture<'_> {
        async move {
            let text = tokio::fs::read_to_string(&self.path).await?;
            let millis = parse_first_number(&text)?;
            Ok(Some(millis / 1000.0))
        }
        .boxed()
    }
}

/// Windows ACPI thermal zone through PowerShell/CIM, reported in tenths of Kelvin
pub struct WmiThermalZoneTemp;

impl MetricProbe for WmiThermalZoneTemp {
    fn name(&self) -> &str {
        "windows-acpi-thermal-zone"
    }

    fn read(&self) -> ProbeFuture<'_> {
        async move {
            if !cfg!(target_os = "windows") {
                return Err(ProbeError::Unsupported);
            }
            let output = run_probe_command(
                "powershell",
                &[
                    "-NoProfile",
                    "-Command",
                    "(Get-CimInstance -Namespace root/wmi -ClassName MSAcpi_ThermalZoneTemperature \
                     | Select-Object -First 1).CurrentTemperature",
                ],
                PROBE_COMMAND_TIMEOUT,
            )
            .await?;
            let decikelvin = parse_first_number(&output)?;
            Ok(Some(decikelvin / 10.0 - 273.15))
        }
        .boxed()
    }
}

/// Raspberry Pi firmware sensor (`temp=48.3'C`)
pub struct VcgencmdTemp;

impl MetricProbe for VcgencmdTemp {
    fn name(&self) -> &str {
        "vcgencmd"
    }

    fn read(&self) -> ProbeFuture<'_> {
        async move {
            let output = run_probe_command("vcgencmd", &["measure_temp"], PROBE_COMMAND_TIMEOUT).await?;
            Ok(Some(parse_vcgencmd(&output)?))
        }
        .boxed()
    }
}

/// `nvidia-smi --query-gpu=<field>` on the first GPU
pub struct NvidiaSmi {
    name: &'static str,
    field: &'static str,
}

impl NvidiaSmi {
    pub fn temperature() -> Self {
        Self {
            name: "nvidia-smi-temperature",
            field: "temperature.gpu",
        }
    }

    pub fn utilization() -> Self {
        Self {
            name: "nvidia-smi-utilization",
            field: "utilization.gpu",
        }
    }
}

impl MetricProbe for NvidiaSmi {
    fn name(&self) -> &str {
        self.name
    }

    fn read(&self) -> ProbeFuture<'_> {
        async move {
            let query = format!("--query-gpu={}", self.field);
            let output = run_probe_command(
                "nvidia-smi",
                &[query.as_str(), "--format=csv,noheader,nounits"],
                PROBE_COMMAND_TIMEOUT,
            )
            .await?;
            Ok(Some(parse_first_number(&output)?))
        }
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmdReading {
    /// `hwmon*/temp1_input`, milli-degrees Celsius
    Temperature,
    /// `gpu_busy_percent`
    Busy,
}

/// amdgpu sysfs attributes of the first AMD card under a DRM root
pub struct AmdGpuSysfs {
    drm_root: PathBuf,
    reading: AmdReading,
}

const AMD_PCI_VENDOR: &str = "0x1002";

impl AmdGpuSysfs {
    pub fn new(drm_root: impl Into<PathBuf>, reading: AmdReading) -> Self {
        Self {
            drm_root: drm_root.into(),
            reading,
        }
    }

    pub fn temperature() -> Self {
        Self::new("/sys/class/drm", AmdReading::Temperature)
    }

    pub fn busy() -> Self {
        Self::new("/sys/class/drm", AmdReading::Busy)
    }

    async fn sample(&self) -> Result<Option<f64>, ProbeError> {
        for card in card_dirs(&self.drm_root).await? {
            let device = card.join("device");
            let vendor = tokio::fs::read_to_string(device.join("vendor")).await.unwrap_or_default();
            if vendor.trim() != AMD_PCI_VENDOR {
                debug!("Skipping non-AMD DRM card {}", card.display());
                continue;
            }
            let value = match self.reading {
                AmdReading::Busy => read_number(&device.join("gpu_busy_percent")).await,
                AmdReading::Temperature => first_hwmon_temp(&device).await.map(|millis| millis / 1000.0),
            };
            if value.is_some() {
                return Ok(value);
            }
        }
        Ok(None)
    }
}

impl MetricProbe for AmdGpuSysfs {
    fn name(&self) -> &str {
        match self.reading {
            AmdReading::Temperature => "amdgpu-sysfs-temperature",
            AmdReading::Busy => "amdgpu-sysfs-busy",
        }
    }

    fn read(&self) -> ProbeFuture<'_> {
        self.sample().boxed()
    }
}

/// `cardN` directories (connectors like `card0-DP-1` excluded), sorted
async fn card_dirs(drm_root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(drm_root).await?;
    let mut cards = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let is_card = name
            .to_string_lossy()
            .strip_prefix("card")
            .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);
        if is_card {
            cards.push(entry.path());
        }
    }
    cards.sort();
    Ok(cards)
}

async fn first_hwmon_temp(device: &Path) -> Option<f64> {
    let mut entries = tokio::fs::read_dir(device.join("hwmon")).await.ok()?;
    let mut hwmons = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        hwmons.push(entry.path());
    }
    hwmons.sort();
    for hwmon in hwmons {
        if let Some(value) = read_number(&hwmon.join("temp1_input")).await {
            return Some(value);
        }
    }
    None
}

async fn read_number(path: &Path) -> Option<f64> {
    tokio::fs::read_to_string(path).await.ok()?.trim().parse().ok()
}

/// First number on the first non-empty line, `%` suffix tolerated
fn parse_first_number(text: &str) -> Result<f64, ProbeError> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ProbeError::Parse(text.to_string()))?;
    let token = line.split_whitespace().next().unwrap_or(line).trim_end_matches('%');
    token.parse::<f64>().map_err(|_| ProbeError::Parse(line.to_string()))
}

fn parse_vcgencmd(text: &str) -> Result<f64, ProbeError> {
    let rest = text
        .split("temp=")
        .nth(1)
        .ok_or_else(|| ProbeError::Parse(text.trim().to_string()))?;
    let number: String = rest.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    number.parse().map_err(|_| ProbeError::Parse(text.trim().to_string()))
}
