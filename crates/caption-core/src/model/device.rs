//! Device selection.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DevicePreference;

/// Environment variable read by [`EnvDeviceProbe`], formatted `name[:memory_gb]`.
pub const ACCELERATOR_ENV: &str = "CAPTION_ACCELERATOR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    pub name: String,
    pub total_memory_bytes: u64,
}

impl AcceleratorInfo {
    pub fn new(name: impl Into<String>, total_memory_bytes: u64) -> Self {
        Self {
            name: name.into(),
            total_memory_bytes,
        }
    }

    pub fn memory_gb(&self) -> f64 {
        self.total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Accelerator,
    Cpu,
}

/// A device a model can be bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub accelerator: Option<AcceleratorInfo>,
}

impl Device {
    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            accelerator: None,
        }
    }

    pub fn accelerator(info: AcceleratorInfo) -> Self {
        Self {
            kind: DeviceKind::Accelerator,
            accelerator: Some(info),
        }
    }

    /// Stable identifier used in resource keys and records.
    pub fn id(&self) -> &'static str {
        match self.kind {
            DeviceKind::Accelerator => "cuda",
            DeviceKind::Cpu => "cpu",
        }
    }

    pub fn is_accelerator(&self) -> bool {
        self.kind == DeviceKind::Accelerator
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Reports whether an accelerator is usable in this environment.
pub trait DeviceProbe: Send + Sync {
    fn accelerator(&self) -> Option<AcceleratorInfo>;
}

/// Reads accelerator availability from [`ACCELERATOR_ENV`].
#[derive(Debug, Default, Clone)]
pub struct EnvDeviceProbe;

impl EnvDeviceProbe {
    fn parse(raw: &str) -> Option<AcceleratorInfo> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (name, memory) = match raw.split_once(':') {
            Some((name, gb)) => {
                let gb = match gb.trim().parse::<f64>() {
                    Ok(gb) if gb.is_finite() && gb >= 0.0 => gb,
                    _ => {
                        warn!(
                            value = %gb.trim(),
                            "unparseable accelerator memory in {ACCELERATOR_ENV}; reporting 0 GB"
                        );
                        0.0
                    }
                };
                (name.trim(), (gb * 1024.0 * 1024.0 * 1024.0) as u64)
            }
            None => (raw, 0),
        };
        Some(AcceleratorInfo::new(name, memory))
    }
}

impl DeviceProbe for EnvDeviceProbe {
    fn accelerator(&self) -> Option<AcceleratorInfo> {
        std::env::var(ACCELERATOR_ENV)
            .ok()
            .and_then(|raw| Self::parse(&raw))
    }
}

/// Pick a device: an accelerator when one is reported and not ruled out by
/// `preference`, the CPU otherwise. Same probe answer, same device.
pub fn select_device(preference: DevicePreference, probe: &dyn DeviceProbe) -> Device {
    let device = match (preference, probe.accelerator()) {
        (DevicePreference::Cpu, _) => Device::cpu(),
        (DevicePreference::Auto | DevicePreference::Cuda, Some(info)) => Device::accelerator(info),
        (DevicePreference::Cuda, None) => {
            warn!("accelerator requested but none reported; falling back to cpu");
            Device::cpu()
        }
        (DevicePreference::Auto, None) => Device::cpu(),
    };

    match &device.accelerator {
        Some(info) => info!(
            device = device.id(),
            gpu = %info.name,
            memory_gb = %format!("{:.1}", info.memory_gb()),
            "using accelerator"
        ),
        None => info!(device = device.id(), "using cpu for inference"),
    }
    device
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    struct FixedProbe(Option<AcceleratorInfo>);

    impl DeviceProbe for FixedProbe {
        fn accelerator(&self) -> Option<AcceleratorInfo> {
            self.0.clone()
        }
    }

    fn gpu() -> FixedProbe {
        FixedProbe(Some(AcceleratorInfo::new("Test GPU", 8 * 1024 * 1024 * 1024)))
    }

    #[test]
    fn test_auto_prefers_accelerator() {
        let device = select_device(DevicePreference::Auto, &gpu());
        assert_eq!(device.id(), "cuda");
        assert!(device.is_accelerator());
        assert_eq!(device.accelerator.unwrap().memory_gb(), 8.0);
    }

    #[test]
    fn test_auto_falls_back_to_cpu() {
        let device = select_device(DevicePreference::Auto, &FixedProbe(None));
        assert_eq!(device, Device::cpu());
    }

    #[test]
    fn test_cpu_preference_ignores_accelerator() {
        let device = select_device(DevicePreference::Cpu, &gpu());
        assert_eq!(device.id(), "cpu");
    }

    #[test]
    fn test_cuda_preference_without_accelerator_uses_cpu() {
        let device = select_device(DevicePreference::Cuda, &FixedProbe(None));
        assert_eq!(device.id(), "cpu");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let probe = gpu();
        let a = select_device(DevicePreference::Auto, &probe);
        let b = select_device(DevicePreference::Auto, &probe);
        assert_eq!(a, b);
    }

    #[test]
    fn test_env_probe_parsing() {
        let info = EnvDeviceProbe::parse("RTX 4090:24").unwrap();
        assert_eq!(info.name, "RTX 4090");
        assert_eq!(info.memory_gb(), 24.0);

        let info = EnvDeviceProbe::parse("A100").unwrap();
        assert_eq!(info.total_memory_bytes, 0);

        assert!(EnvDeviceProbe::parse("   ").is_none());
    }

    #[traced_test]
    #[test]
    fn test_env_probe_warns_on_malformed_memory() {
        let info = EnvDeviceProbe::parse("RTX:lots").unwrap();
        assert_eq!(info.name, "RTX");
        assert_eq!(info.total_memory_bytes, 0);
        assert!(logs_contain("unparseable accelerator memory"));
    }
}
