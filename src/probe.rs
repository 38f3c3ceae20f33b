//! The two diagnostics: which GPUs the framework sees, and whether a small
//! matmul lands on the device it was pinned to.

use crate::device::{DeviceBackend, DeviceKind, PhysicalDevice};
use crate::error::{DeviceError, Result};
use crate::runtime::Runtime;
use log::{info, warn};
use serde::Serialize;
use std::slice;
use tch::{Device, Kind, Tensor};

/// Left operand of the placement check (2x3).
pub const LHS: [[f32; 3]; 2] = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
/// Right operand of the placement check (3x2).
pub const RHS: [[f32; 2]; 3] = [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GpuOutcome {
    NoGpu,
    Restricted {
        physical: usize,
        logical: usize,
        device_name: String,
    },
    /// Visibility could not be changed because the runtime was already initialized.
    RuntimeError { message: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct GpuReport {
    pub version: String,
    pub gpus: Vec<PhysicalDevice>,
    pub outcome: GpuOutcome,
}

impl GpuReport {
    pub fn render(&self) -> String {
        let mut lines = vec![self.version.clone()];
        if !self.gpus.is_empty() {
            lines.push(format!("gpus= {}", device_list(&self.gpus)));
        }
        match &self.outcome {
            GpuOutcome::NoGpu => {}
            GpuOutcome::Restricted { physical, logical, .. } => {
                lines.push(format!("{} Physical GPUs, {} Logical GPU", physical, logical));
            }
            GpuOutcome::RuntimeError { message } => lines.push(message.clone()),
        }
        lines.join("\n")
    }
}

/// Lists the physical GPUs and, if there are any, restricts the runtime to the
/// one at `gpu_index`. Changing visibility on an initialized runtime is
/// reported in the outcome rather than returned as an error.
pub fn check_gpu<B: DeviceBackend>(runtime: &mut Runtime<B>, gpu_index: usize) -> Result<GpuReport> {
    let version = runtime.version().to_string();
    let gpus = runtime.list_physical_devices(Some(DeviceKind::Gpu));
    info!("Found {} physical GPU(s)", gpus.len());

    if gpus.is_empty() {
        return Ok(GpuReport {
            version,
            gpus,
            outcome: GpuOutcome::NoGpu,
        });
    }

    let target = gpus
        .get(gpu_index)
        .ok_or_else(|| DeviceError::UnknownDevice(format!("/physical_device:GPU:{}", gpu_index)))?;

    let outcome = match runtime.set_visible_devices(slice::from_ref(target), DeviceKind::Gpu) {
        Ok(()) => {
            let logical = runtime.list_logical_devices(Some(DeviceKind::Gpu));
            let device_name = runtime.gpu_device_name();
            info!("Default GPU device: {}", device_name);
            GpuOutcome::Restricted {
                physical: gpus.len(),
                logical: logical.len(),
                device_name,
            }
        }
        Err(e @ DeviceError::VisibilityAfterInit) => {
            warn!("{}", e);
            GpuOutcome::RuntimeError {
                message: e.to_string(),
            }
        }
        Err(e) => return Err(e),
    };

    Ok(GpuReport {
        version,
        gpus,
        outcome,
    })
}

/// A rank-2 result copied back to the host.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatrixReport {
    pub values: Vec<Vec<f32>>,
    pub shape: Vec<i64>,
    pub dtype: String,
}

impl MatrixReport {
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let host = tensor.f_to_device(Device::Cpu)?;
        let shape = host.size();
        if shape.len() != 2 {
            return Err(DeviceError::ShapeMismatch {
                left: shape,
                right: Vec::new(),
            });
        }
        let values = (0..shape[0])
            .map(|i| {
                (0..shape[1])
                    .map(|j| host.f_double_value(&[i, j]).map(|v| v as f32))
                    .collect::<std::result::Result<Vec<f32>, _>>()
            })
            .collect::<std::result::Result<Vec<Vec<f32>>, _>>()?;
        Ok(MatrixReport {
            values,
            shape,
            dtype: dtype_name(host.kind()),
        })
    }
}

impl std::fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_tensor(&self.values, &self.shape, &self.dtype))
    }
}

#[derive(Clone, Debug)]
pub struct CpuProbeOptions {
    pub device: String,
    pub log_device_placement: bool,
}

impl Default for CpuProbeOptions {
    fn default() -> Self {
        CpuProbeOptions {
            device: "/CPU:0".to_string(),
            log_device_placement: true,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CpuReport {
    pub version: String,
    pub cpus: Vec<PhysicalDevice>,
    pub cpu_threads: usize,
    pub device: String,
    pub result: MatrixReport,
    pub placements: Vec<String>,
}

impl CpuReport {
    pub fn render(&self) -> String {
        [
            self.version.clone(),
            format!("cpus= {}", device_list(&self.cpus)),
            self.result.to_string(),
        ]
        .join("\n")
    }
}

/// Pins `LHS @ RHS` to `options.device` and reports the product together
/// with the placement lines it produced.
pub fn test_cpu<B: DeviceBackend>(runtime: &mut Runtime<B>, options: &CpuProbeOptions) -> Result<CpuReport> {
    let version = runtime.version().to_string();
    let cpus = runtime.list_physical_devices(Some(DeviceKind::Cpu));
    let cpu_threads = runtime.backend().cpu_threads();

    runtime.set_log_device_placement(options.log_device_placement);
    let already_logged = runtime.placement_log().len();

    let (device, product) = runtime.with_device(&options.device, |rt| {
        let a = rt.constant(&LHS)?;
        let b = rt.constant(&RHS)?;
        let c = rt.matmul(&a, &b)?;
        Ok((rt.current_device().name, c))
    })?;

    let result = MatrixReport::from_tensor(&product)?;
    let placements = runtime.placement_log()[already_logged..].to_vec();

    Ok(CpuReport {
        version,
        cpus,
        cpu_threads,
        device,
        result,
        placements,
    })
}

/// Renders a rank-2 tensor as `tensor([[22., 28.],\n        [49., 64.]], shape=(2, 2), dtype=float32)`.
pub fn format_tensor(values: &[Vec<f32>], shape: &[i64], dtype: &str) -> String {
    let rows = values
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|v| format_scalar(*v)).collect();
            format!("[{}]", cells.join(", "))
        })
        .collect::<Vec<_>>()
        .join(",\n        ");
    let dims = shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ");
    format!("tensor([{}], shape=({}), dtype={})", rows, dims, dtype)
}

fn format_scalar(value: f32) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.0}.", value)
    } else {
        value.to_string()
    }
}

fn dtype_name(kind: Kind) -> String {
    match kind {
        Kind::Float => "float32".to_string(),
        Kind::Double => "float64".to_string(),
        Kind::Half => "float16".to_string(),
        Kind::BFloat16 => "bfloat16".to_string(),
        Kind::Int => "int32".to_string(),
        Kind::Int64 => "int64".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

fn device_list(devices: &[PhysicalDevice]) -> String {
    let items: Vec<String> = devices.iter().map(|d| d.to_string()).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tensor_whole_numbers() {
        let values = vec![vec![22.0, 28.0], vec![49.0, 64.0]];
        assert_eq!(
            format_tensor(&values, &[2, 2], "float32"),
            "tensor([[22., 28.],\n        [49., 64.]], shape=(2, 2), dtype=float32)"
        );
    }

    #[test]
    fn test_format_tensor_fractions_and_empty() {
        assert_eq!(
            format_tensor(&[vec![0.5, -1.0]], &[1, 2], "float32"),
            "tensor([[0.5, -1.]], shape=(1, 2), dtype=float32)"
        );
        assert_eq!(
            format_tensor(&[], &[0, 0], "float32"),
            "tensor([], shape=(0, 0), dtype=float32)"
        );
    }

    #[test]
    fn test_gpu_report_render_restricted() {
        let report = GpuReport {
            version: "2.6.0".to_string(),
            gpus: vec![
                PhysicalDevice::new(DeviceKind::Gpu, 0, Device::Cuda(0)),
                PhysicalDevice::new(DeviceKind::Gpu, 1, Device::Cuda(1)),
            ],
            outcome: GpuOutcome::Restricted {
                physical: 2,
                logical: 1,
                device_name: "/device:GPU:0".to_string(),
            },
        };
        assert_eq!(
            report.render(),
            "2.6.0\n\
             gpus= [PhysicalDevice(name='/physical_device:GPU:0', device_type='GPU'), \
             PhysicalDevice(name='/physical_device:GPU:1', device_type='GPU')]\n\
             2 Physical GPUs, 1 Logical GPU"
        );
    }

    #[test]
    fn test_gpu_report_render_without_gpus_is_version_only() {
        let report = GpuReport {
            version: "2.6.0".to_string(),
            gpus: Vec::new(),
            outcome: GpuOutcome::NoGpu,
        };
        assert_eq!(report.render(), "2.6.0");
    }
}
