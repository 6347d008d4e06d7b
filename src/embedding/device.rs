//! Compute device selection and memory accounting.
//!
//! The device is resolved once at startup from config and then carried as part
//! of the [`ModelProvider`](super::ModelProvider)'s identity.

use std::collections::BTreeMap;
use std::process::Command;

use anyhow::{bail, Result};

/// Memory figures reported in health checks, in megabytes.
pub type MemoryMetrics = BTreeMap<String, f64>;

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// CUDA device by ordinal.
    Cuda(u32),
}

/// Device preference as written in config, before probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Exact(Device),
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Exact(Device::Cpu)),
            "cuda" | "gpu" => Ok(Self::Exact(Device::Cuda(0))),
            other => match other.strip_prefix("cuda:") {
                Some(ordinal) => match ordinal.parse() {
                    Ok(n) => Ok(Self::Exact(Device::Cuda(n))),
                    Err(_) => bail!("invalid CUDA ordinal in device `{other}`"),
                },
                None => bail!("unknown device `{other}`. Supported: auto, cpu, cuda, cuda:N"),
            },
        }
    }
}

impl DevicePreference {
    /// Resolve `auto` by probing for a GPU. Exact preferences are returned as-is.
    pub fn resolve(self) -> Device {
        match self {
            Self::Exact(device) => device,
            Self::Auto => {
                if cuda_device_count() > 0 {
                    Device::Cuda(0)
                } else {
                    Device::Cpu
                }
            }
        }
    }
}

impl Device {
    /// Label used in responses and logs (`cpu`, `cuda:0`).
    pub fn label(&self) -> String {
        match self {
            Self::Cpu => "cpu".into(),
            Self::Cuda(n) => format!("cuda:{n}"),
        }
    }

    /// Memory figures for the whole device (all processes, not just this one).
    /// Empty on CPU or when the query fails. Runs `nvidia-smi`, so call it off
    /// the async runtime.
    pub fn memory_metrics(&self) -> MemoryMetrics {
        match self {
            Self::Cpu => MemoryMetrics::new(),
            Self::Cuda(n) => query_gpu_memory(*n).unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Count visible NVIDIA GPUs via `nvidia-smi`. Zero if the tool is missing or fails.
fn cuda_device_count() -> usize {
    match Command::new("nvidia-smi")
        .arg("--query-gpu=count")
        .arg("--format=csv,noheader")
        .output()
    {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            stdout
                .lines()
                .next()
                .and_then(|l| l.trim().parse().ok())
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn query_gpu_memory(ordinal: u32) -> Option<MemoryMetrics> {
    let visible = std::env::var("CUDA_VISIBLE_DEVICES").ok();
    let Some(id) = nvidia_smi_id(ordinal, visible.as_deref()) else {
        tracing::debug!(ordinal, ?visible, "CUDA ordinal not in CUDA_VISIBLE_DEVICES");
        return None;
    };
    let output = Command::new("nvidia-smi")
        .arg("--query-gpu=memory.used,memory.total")
        .arg("--format=csv,noheader,nounits")
        .arg(format!("--id={id}"))
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::debug!(ordinal, "nvidia-smi memory query failed");
        return None;
    }
    parse_memory_line(&String::from_utf8_lossy(&output.stdout))
}

/// Map a CUDA ordinal (relative to `CUDA_VISIBLE_DEVICES`) to the index or UUID
/// `nvidia-smi --id` expects. `None` when the ordinal is past the visible list.
fn nvidia_smi_id(ordinal: u32, visible: Option<&str>) -> Option<String> {
    match visible.map(str::trim).filter(|v| !v.is_empty()) {
        None => Some(ordinal.to_string()),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .nth(ordinal as usize)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
    }
}

/// Parse `"<used>, <total>"` (MiB, as printed by nvidia-smi with `nounits`).
fn parse_memory_line(stdout: &str) -> Option<MemoryMetrics> {
    let line = stdout.lines().next()?;
    let mut parts = line.split(',').map(|p| p.trim().parse::<f64>());
    let used = parts.next()?.ok()?;
    let total = parts.next()?.ok()?;

    let mut metrics = MemoryMetrics::new();
    metrics.insert("device_used_mb".into(), used);
    metrics.insert("total_mb".into(), total);
    Some(metrics)
}
