//! Device registry, visibility and placement on top of the framework backend.
//!
//! A `Runtime` starts uninitialized: physical devices can be listed and the
//! visible set can be narrowed. The first call that needs logical devices
//! (listing them, entering a placement scope, creating a tensor) initializes
//! it, after which visibility is frozen.

use crate::device::{
    self, DeviceBackend, DeviceKind, DeviceSpec, LogicalDevice, PhysicalDevice, TorchBackend,
};
use crate::error::{DeviceError, Result};
use log::{debug, info};
use tch::Tensor;

pub struct Runtime<B: DeviceBackend = TorchBackend> {
    backend: B,
    version: String,
    physical: Vec<PhysicalDevice>,
    /// Parallel to `physical`.
    visible: Vec<bool>,
    initialized: bool,
    log_device_placement: bool,
    placement_log: Vec<String>,
    scopes: Vec<LogicalDevice>,
}

impl Runtime<TorchBackend> {
    /// Runtime over the libtorch install `tch` is linked against.
    pub fn new() -> Self {
        Self::with_backend(TorchBackend)
    }
}

impl Default for Runtime<TorchBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: DeviceBackend> Runtime<B> {
    pub fn with_backend(backend: B) -> Self {
        let version = backend.framework_version();
        let physical = device::enumerate(&backend);
        debug!(
            "Discovered {} physical devices ({} CPU threads)",
            physical.len(),
            backend.cpu_threads()
        );
        let visible = vec![true; physical.len()];
        Runtime {
            backend,
            version,
            physical,
            visible,
            initialized: false,
            log_device_placement: false,
            placement_log: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Physical devices, optionally of one kind. Does not initialize.
    pub fn list_physical_devices(&self, kind: Option<DeviceKind>) -> Vec<PhysicalDevice> {
        self.physical
            .iter()
            .filter(|d| kind.is_none_or(|k| d.kind == k))
            .cloned()
            .collect()
    }

    /// Restricts the visible devices of `kind` to `devices`.
    pub fn set_visible_devices(&mut self, devices: &[PhysicalDevice], kind: DeviceKind) -> Result<()> {
        if self.initialized {
            return Err(DeviceError::VisibilityAfterInit);
        }

        for requested in devices {
            if requested.kind != kind {
                return Err(DeviceError::KindMismatch {
                    name: requested.name.clone(),
                    expected: kind,
                    found: requested.kind,
                });
            }
            if !self.physical.iter().any(|d| d.name == requested.name) {
                return Err(DeviceError::UnknownDevice(requested.name.clone()));
            }
        }

        if kind == DeviceKind::Cpu && devices.is_empty() {
            return Err(DeviceError::CpuRequired);
        }

        for (device, visible) in self.physical.iter().zip(self.visible.iter_mut()) {
            if device.kind == kind {
                *visible = devices.iter().any(|d| d.name == device.name);
            }
        }
        info!(
            "Visible {} devices set to [{}]",
            kind,
            devices.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(())
    }

    /// Visible devices, renumbered per kind. Initializes the runtime.
    pub fn list_logical_devices(&mut self, kind: Option<DeviceKind>) -> Vec<LogicalDevice> {
        self.initialize();
        self.logical_devices()
            .into_iter()
            .filter(|d| kind.is_none_or(|k| d.kind == k))
            .collect()
    }

    /// `/device:GPU:0` when a GPU is visible, otherwise the empty string.
    /// Initializes the runtime.
    pub fn gpu_device_name(&mut self) -> String {
        self.list_logical_devices(Some(DeviceKind::Gpu))
            .into_iter()
            .next()
            .map(|d| d.name)
            .unwrap_or_default()
    }

    pub fn set_log_device_placement(&mut self, enabled: bool) {
        self.log_device_placement = enabled;
    }

    pub fn log_device_placement(&self) -> bool {
        self.log_device_placement
    }

    /// Placement lines recorded while placement logging was on.
    pub fn placement_log(&self) -> &[String] {
        &self.placement_log
    }

    /// Device the next op runs on: the innermost scope, else the first visible
    /// GPU, else the CPU.
    pub fn current_device(&mut self) -> LogicalDevice {
        self.initialize();
        if let Some(scoped) = self.scopes.last() {
            return scoped.clone();
        }
        let logical = self.logical_devices();
        logical
            .iter()
            .find(|d| d.kind == DeviceKind::Gpu)
            .or_else(|| logical.first())
            .cloned()
            .unwrap_or_else(|| LogicalDevice::new(DeviceKind::Cpu, 0, tch::Device::Cpu))
    }

    /// Runs `f` with ops placed on `spec`, restoring the enclosing scope
    /// afterwards whether or not `f` succeeds.
    pub fn with_device<T, F>(&mut self, spec: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let spec = DeviceSpec::parse(spec)?;
        self.with_device_spec(spec, f)
    }

    pub fn with_device_spec<T, F>(&mut self, spec: DeviceSpec, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.initialize();
        let target = self
            .logical_devices()
            .into_iter()
            .find(|d| d.kind == spec.kind && d.index == spec.index)
            .ok_or_else(|| DeviceError::Unplaceable(spec.to_string()))?;

        debug!("Entering placement scope {}", target.name);
        self.scopes.push(target);
        let result = f(self);
        self.scopes.pop();
        result
    }

    /// Rank-2 float32 constant on the current device.
    pub fn constant<R: AsRef<[f32]>>(&mut self, rows: &[R]) -> Result<Tensor> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (row, r) in rows.iter().enumerate() {
            let r = r.as_ref();
            if r.len() != cols {
                return Err(DeviceError::RaggedConstant {
                    row,
                    expected: cols,
                    found: r.len(),
                });
            }
            values.extend_from_slice(r);
        }

        let device = self.current_device();
        let tensor = Tensor::from_slice(values.as_slice())
            .f_reshape([rows.len() as i64, cols as i64])?
            .f_to_device(device.backing)?;
        self.record_placement("Const", &device);
        Ok(tensor)
    }

    /// `a @ b` on the current device.
    pub fn matmul(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let left = a.size();
        let right = b.size();
        if left.len() != 2 || right.len() != 2 || left[1] != right[0] {
            return Err(DeviceError::ShapeMismatch { left, right });
        }

        let device = self.current_device();
        let product = a
            .f_to_device(device.backing)?
            .f_matmul(&b.f_to_device(device.backing)?)?;
        self.record_placement("MatMul", &device);
        Ok(product)
    }

    fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        let visible = self.visible.iter().filter(|v| **v).count();
        info!(
            "Runtime initialized with {} of {} physical devices visible",
            visible,
            self.physical.len()
        );
    }

    fn logical_devices(&self) -> Vec<LogicalDevice> {
        let mut cpus = 0;
        let mut gpus = 0;
        self.physical
            .iter()
            .zip(self.visible.iter())
            .filter(|(_, visible)| **visible)
            .map(|(d, _)| {
                let counter = match d.kind {
                    DeviceKind::Cpu => &mut cpus,
                    DeviceKind::Gpu => &mut gpus,
                };
                let logical = LogicalDevice::new(d.kind, *counter, d.backing);
                *counter += 1;
                logical
            })
            .collect()
    }

    fn record_placement(&mut self, op: &str, device: &LogicalDevice) {
        if !self.log_device_placement {
            return;
        }
        let line = format!("Executing op {} in device {}", op, device.placement_name());
        info!("{}", line);
        self.placement_log.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CpuOnly;

    impl DeviceBackend for CpuOnly {
        fn framework_version(&self) -> String {
            "test".to_string()
        }
        fn cuda_device_count(&self) -> usize {
            0
        }
        fn has_mps(&self) -> bool {
            false
        }
        fn cpu_threads(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_listing_physical_devices_does_not_initialize() {
        let runtime = Runtime::with_backend(CpuOnly);
        assert_eq!(runtime.list_physical_devices(None).len(), 1);
        assert!(!runtime.is_initialized());
    }

    #[test]
    fn test_cpu_cannot_be_hidden() {
        let mut runtime = Runtime::with_backend(CpuOnly);
        assert!(matches!(
            runtime.set_visible_devices(&[], DeviceKind::Cpu),
            Err(DeviceError::CpuRequired)
        ));
    }

    #[test]
    fn test_scope_is_restored_after_error() {
        let mut runtime = Runtime::with_backend(CpuOnly);
        let result: Result<()> = runtime.with_device("/CPU:0", |_| {
            Err(DeviceError::UnknownDevice("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(runtime.scopes.is_empty());
    }

    #[test]
    fn test_ragged_constant_is_rejected() {
        let mut runtime = Runtime::with_backend(CpuOnly);
        let rows: [&[f32]; 2] = [&[1.0, 2.0], &[3.0]];
        assert!(matches!(
            runtime.constant(&rows),
            Err(DeviceError::RaggedConstant { row: 1, expected: 2, found: 1 })
        ));
    }
}
