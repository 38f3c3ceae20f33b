use log::{info, warn};
use std::env;
use tch::Device;

/// Environment variable that overrides automatic device selection.
pub const DEVICE_ENV_VAR: &str = "DEVCHECK_DEVICE";

/// Selects the best available device for tensor operations
/// Priority: Environment variable > MPS (macOS) > CUDA > CPU
pub fn select_device() -> Device {
    if let Ok(device_str) = env::var(DEVICE_ENV_VAR) {
        if let Some(device) = device_from_request(&device_str) {
            return device;
        }
    }

    #[cfg(target_os = "macos")]
    {
        if tch::utils::has_mps() {
            info!("Using MPS device (Metal Performance Shaders on macOS)");
            return Device::Mps;
        }
    }

    if tch::Cuda::is_available() {
        info!("Using CUDA device");
        return Device::Cuda(0);
    }

    info!("Using CPU device");
    Device::Cpu
}

/// Placement spec for a selected device, e.g. `/GPU:1`. MPS is reported as `GPU:0`.
pub fn placement_spec(device: Device) -> String {
    match device {
        Device::Cuda(index) => format!("/GPU:{}", index),
        Device::Mps => "/GPU:0".to_string(),
        _ => "/CPU:0".to_string(),
    }
}

/// Resolves an explicit request. `None` means the request was not understood
/// and auto-detection should run instead.
fn device_from_request(device_str: &str) -> Option<Device> {
    let requested = device_str.trim().to_lowercase();
    let (name, index) = match requested.split_once(':') {
        Some((name, index)) => (name, index.parse::<usize>().ok()?),
        None => (requested.as_str(), 0),
    };

    match name {
        "cpu" => {
            info!("Using CPU device (from environment variable)");
            Some(Device::Cpu)
        }
        "cuda" | "gpu" => {
            let available = usize::try_from(tch::Cuda::device_count()).unwrap_or(0);
            if index < available {
                info!("Using CUDA device {} (from environment variable)", index);
                Some(Device::Cuda(index))
            } else {
                warn!("CUDA device {} requested but not available, falling back to CPU", index);
                Some(Device::Cpu)
            }
        }
        "mps" => {
            if tch::utils::has_mps() {
                info!("Using MPS device (from environment variable)");
                Some(Device::Mps)
            } else {
                warn!("MPS requested but not available, falling back to CPU");
                Some(Device::Cpu)
            }
        }
        _ => {
            warn!("Unknown device '{}' in {}, using auto-detection", device_str, DEVICE_ENV_VAR);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_request_is_honoured() {
        assert_eq!(device_from_request("CPU"), Some(Device::Cpu));
        assert_eq!(device_from_request(" cpu "), Some(Device::Cpu));
    }

    #[test]
    fn test_placement_spec() {
        assert_eq!(placement_spec(Device::Cpu), "/CPU:0");
        assert_eq!(placement_spec(Device::Cuda(3)), "/GPU:3");
        assert_eq!(placement_spec(Device::Mps), "/GPU:0");
    }

    #[test]
    fn test_unknown_request_defers_to_auto_detection() {
        assert_eq!(device_from_request("tpu"), None);
        assert_eq!(device_from_request("cuda:abc"), None);
    }

    #[test]
    fn test_unavailable_cuda_index_falls_back_to_cpu() {
        assert_eq!(device_from_request("cuda:4096"), Some(Device::Cpu));
    }
}
