pub mod backend;
pub mod select;

use crate::error::{DeviceError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tch::Device;

pub use backend::{DeviceBackend, TorchBackend};
pub use select::{placement_spec, select_device};

/// The two classes of compute target the runtime reports.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "CPU",
            DeviceKind::Gpu => "GPU",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "gpu" | "cuda" | "mps" => Ok(DeviceKind::Gpu),
            _ => Err(DeviceError::InvalidSpec(s.to_string())),
        }
    }
}

/// A device as the framework discovered it, before any visibility filtering.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhysicalDevice {
    pub name: String,
    pub kind: DeviceKind,
    pub index: usize,
    #[serde(skip)]
    pub backing: Device,
}

impl PhysicalDevice {
    pub fn new(kind: DeviceKind, index: usize, backing: Device) -> Self {
        PhysicalDevice {
            name: format!("/physical_device:{}:{}", kind, index),
            kind,
            index,
            backing,
        }
    }
}

impl fmt::Display for PhysicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PhysicalDevice(name='{}', device_type='{}')",
            self.name, self.kind
        )
    }
}

/// A visible device after initialization. Indices are dense per kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogicalDevice {
    pub name: String,
    pub kind: DeviceKind,
    pub index: usize,
    #[serde(skip)]
    pub backing: Device,
}

impl LogicalDevice {
    pub fn new(kind: DeviceKind, index: usize, backing: Device) -> Self {
        LogicalDevice {
            name: format!("/device:{}:{}", kind, index),
            kind,
            index,
            backing,
        }
    }

    /// Fully qualified name used in placement log lines.
    pub fn placement_name(&self) -> String {
        format!("/job:localhost/replica:0/task:0/device:{}:{}", self.kind, self.index)
    }
}

impl fmt::Display for LogicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LogicalDevice(name='{}', device_type='{}')",
            self.name, self.kind
        )
    }
}

/// A user-supplied placement target such as `/CPU:0` or `cuda:1`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub index: usize,
}

impl DeviceSpec {
    pub fn new(kind: DeviceKind, index: usize) -> Self {
        DeviceSpec { kind, index }
    }

    /// Accepts `/CPU:0`, `/device:GPU:1`, fully qualified
    /// `/job:localhost/replica:0/task:0/device:CPU:0` names, and the short
    /// torch-style forms `cpu`, `gpu`, `cuda:1`, `mps`. A missing index means 0.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || DeviceError::InvalidSpec(input.to_string());

        let last = input
            .trim()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .last()
            .ok_or_else(invalid)?;

        let local = match last.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("device:") => &last[7..],
            _ => last,
        };

        let mut parts = local.split(':');
        let kind: DeviceKind = parts
            .next()
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let index = match parts.next() {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(DeviceSpec { kind, index })
    }
}

impl FromStr for DeviceSpec {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        DeviceSpec::parse(s)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/device:{}:{}", self.kind, self.index)
    }
}

/// Lists every physical device the backend reports: the host CPU first, then
/// one GPU per CUDA device. Without CUDA, an MPS device stands in as `GPU:0`.
pub fn enumerate<B: DeviceBackend + ?Sized>(backend: &B) -> Vec<PhysicalDevice> {
    let mut devices = vec![PhysicalDevice::new(DeviceKind::Cpu, 0, Device::Cpu)];

    let cuda_count = backend.cuda_device_count();
    for index in 0..cuda_count {
        devices.push(PhysicalDevice::new(DeviceKind::Gpu, index, Device::Cuda(index)));
    }

    if cuda_count == 0 && backend.has_mps() {
        devices.push(PhysicalDevice::new(DeviceKind::Gpu, 0, Device::Mps));
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_specs() {
        assert_eq!(DeviceSpec::parse("/CPU:0").unwrap(), DeviceSpec::new(DeviceKind::Cpu, 0));
        assert_eq!(DeviceSpec::parse("/GPU:1").unwrap(), DeviceSpec::new(DeviceKind::Gpu, 1));
        assert_eq!(DeviceSpec::parse("cpu").unwrap(), DeviceSpec::new(DeviceKind::Cpu, 0));
        assert_eq!(DeviceSpec::parse("cuda:2").unwrap(), DeviceSpec::new(DeviceKind::Gpu, 2));
        assert_eq!(DeviceSpec::parse("mps").unwrap(), DeviceSpec::new(DeviceKind::Gpu, 0));
    }

    #[test]
    fn test_parse_qualified_specs() {
        assert_eq!(
            DeviceSpec::parse("/device:GPU:0").unwrap(),
            DeviceSpec::new(DeviceKind::Gpu, 0)
        );
        assert_eq!(
            DeviceSpec::parse("/job:localhost/replica:0/task:0/device:CPU:0").unwrap(),
            DeviceSpec::new(DeviceKind::Cpu, 0)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "/", "/TPU:0", "/CPU:x", "/CPU:0:1", "device:"] {
            assert!(
                matches!(DeviceSpec::parse(bad), Err(DeviceError::InvalidSpec(_))),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_device_display_matches_framework_repr() {
        let gpu = PhysicalDevice::new(DeviceKind::Gpu, 0, Device::Cuda(0));
        assert_eq!(
            gpu.to_string(),
            "PhysicalDevice(name='/physical_device:GPU:0', device_type='GPU')"
        );

        let cpu = LogicalDevice::new(DeviceKind::Cpu, 0, Device::Cpu);
        assert_eq!(cpu.name, "/device:CPU:0");
        assert_eq!(
            cpu.placement_name(),
            "/job:localhost/replica:0/task:0/device:CPU:0"
        );
    }
}
