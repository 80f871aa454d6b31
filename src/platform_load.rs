//! Platform load: reshape the workload service's `view=stats` payload into
//! used/free figures for the dashboard.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// A figure that upstream sends either as a bare number or with a unit
/// suffix ("5032G").
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(f64),
    Text(String),
}

impl Default for Quantity {
    fn default() -> Self {
        Quantity::Number(0.0)
    }
}

impl Quantity {
    pub fn value(&self) -> Option<f64> {
        match self {
            Quantity::Number(n) => Some(*n),
            Quantity::Text(s) => parse_unit_number(s),
        }
    }
}

/// Parse "5032G" as 5032. Everything from the first letter on is dropped.
pub fn parse_unit_number(raw: &str) -> Option<f64> {
    let end = raw
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(raw.len());
    let number = raw[..end].trim();
    if number.is_empty() {
        return None;
    }
    number.parse().ok()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    #[serde(default)]
    pub instances: InstanceStats,
    #[serde(default)]
    pub cores: CoreStats,
    #[serde(default)]
    pub ram: RamStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStats {
    #[serde(default)]
    pub session: u64,
    #[serde(default)]
    pub desktop_app: u64,
    #[serde(default)]
    pub headless: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreStats {
    #[serde(default, rename = "requestedCPUCores")]
    pub requested: Quantity,
    #[serde(default, rename = "cpuCoresAvailable", alias = "coresAvailable")]
    pub available: Quantity,
    #[serde(default)]
    pub max_cores: Option<MaxCores>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxCores {
    #[serde(default)]
    pub cores: Quantity,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RamStats {
    #[serde(default, rename = "requestedRAM")]
    pub requested: Quantity,
    #[serde(default)]
    pub ram_available: Quantity,
    #[serde(default, rename = "maxRAM")]
    pub max_ram: Option<MaxRam>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MaxRam {
    #[serde(default)]
    pub ram: Quantity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Usage {
    pub used: f64,
    pub free: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceUsage {
    pub used: u64,
    /// Signed and wider than the inputs: capacity can be below the running
    /// total, and both sides may use the full `u64` range.
    pub free: i128,
    pub headless: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaxValues {
    pub cores: f64,
    pub ram: f64,
    pub instances: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformLoad {
    pub cpu: Usage,
    pub ram: Usage,
    pub instances: InstanceUsage,
    pub max_values: MaxValues,
}

fn required(quantity: &Quantity, field: &str) -> Result<f64, ApiError> {
    quantity
        .value()
        .ok_or_else(|| ApiError::Upstream(format!("Invalid platform stats: {field}")))
}

/// `free = available - used` for every resource. Negative results are kept
/// as-is.
pub fn transform(stats: &PlatformStats, max_instances: u64) -> Result<PlatformLoad, ApiError> {
    let cpu_used = required(&stats.cores.requested, "requestedCPUCores")?;
    let cpu_available = required(&stats.cores.available, "cpuCoresAvailable")?;
    let ram_used = required(&stats.ram.requested, "requestedRAM")?;
    let ram_available = required(&stats.ram.ram_available, "ramAvailable")?;

    let max_cores = stats
        .cores
        .max_cores
        .as_ref()
        .and_then(|m| m.cores.value())
        .unwrap_or(cpu_available);
    let max_ram = stats
        .ram
        .max_ram
        .as_ref()
        .and_then(|m| m.ram.value())
        .unwrap_or(ram_available);

    let instances_used = stats.instances.total;

    Ok(PlatformLoad {
        cpu: Usage {
            used: cpu_used,
            free: cpu_available - cpu_used,
        },
        ram: Usage {
            used: ram_used,
            free: round2(ram_available - ram_used),
        },
        instances: InstanceUsage {
            used: instances_used,
            free: i128::from(max_instances) - i128::from(instances_used),
            headless: stats.instances.headless,
        },
        max_values: MaxValues {
            cores: max_cores,
            ram: max_ram,
            instances: max_instances,
        },
    })
}
