#[macro_use]
pub mod common;
pub mod device;
pub mod error;
pub mod probe;
pub mod runtime;
pub mod version;

pub use device::{DeviceBackend, DeviceKind, DeviceSpec, LogicalDevice, PhysicalDevice, TorchBackend};
pub use error::{DeviceError, Result};
pub use probe::{check_gpu, test_cpu, CpuProbeOptions, CpuReport, GpuOutcome, GpuReport};
pub use runtime::Runtime;
