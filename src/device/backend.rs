//! The seam between the device runtime and the framework that owns the hardware.

use crate::version;

/// What the runtime needs to know from the ML framework. `TorchBackend` asks
/// libtorch; tests substitute a fixed inventory.
pub trait DeviceBackend {
    fn framework_version(&self) -> String;
    fn cuda_device_count(&self) -> usize;
    fn has_mps(&self) -> bool;
    fn cpu_threads(&self) -> usize;
}

/// Queries libtorch through `tch`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TorchBackend;

impl DeviceBackend for TorchBackend {
    fn framework_version(&self) -> String {
        version::framework_version()
    }

    fn cuda_device_count(&self) -> usize {
        usize::try_from(tch::Cuda::device_count()).unwrap_or(0)
    }

    fn has_mps(&self) -> bool {
        tch::utils::has_mps()
    }

    fn cpu_threads(&self) -> usize {
        usize::try_from(tch::get_num_threads()).unwrap_or(1)
    }
}
