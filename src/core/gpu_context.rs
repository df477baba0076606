use std::sync::Arc;

use log::info;
use wgpu::{Adapter, Device, DeviceDescriptor, Features, Instance, Limits, Queue};

use crate::error::{BackendError, BackendResult};

/// Headless device and queue shared by the GPU scene adapter.
///
/// Cloning is cheap (Arc).
#[derive(Clone)]
pub struct GpuContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
    adapter_name: String,
}

impl GpuContext {
    /// Create a context without a surface
    pub async fn new() -> BackendResult<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = Self::request_adapter_headless(&instance).await?;
        let adapter_name = adapter.get_info().name;
        let (device, queue) = Self::request_device(&adapter).await?;
        info!("GPU context created on '{}'", adapter_name);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
        })
    }

    /// Blocking variant of [`GpuContext::new`]
    pub fn new_blocking() -> BackendResult<Self> {
        pollster::block_on(Self::new())
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Rejects allocations larger than the device allows for one buffer
    pub fn check_buffer_size(&self, what: &str, bytes: u64) -> BackendResult<()> {
        let limits = self.device.limits();
        let max = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64);
        if bytes > max {
            return Err(BackendError::allocation(what, bytes));
        }
        Ok(())
    }

    /// Runs `create` inside an out-of-memory error scope and turns a
    /// captured error into an allocation failure
    pub fn allocate<T>(&self, what: &str, bytes: u64, create: impl FnOnce(&Device) -> T) -> BackendResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let resource = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(_) => Err(BackendError::allocation(what, bytes)),
            None => Ok(resource),
        }
    }

    /// Request adapter without surface (headless)
    async fn request_adapter_headless(instance: &Instance) -> BackendResult<Adapter> {
        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| BackendError::Device(format!("Failed to find appropriate adapter: {:?}", e)))
    }

    /// Request device and queue
    async fn request_device(adapter: &Adapter) -> BackendResult<(Device, Queue)> {
        let limits = Limits {
            max_storage_buffer_binding_size: adapter.limits().max_storage_buffer_binding_size,
            max_buffer_size: adapter.limits().max_buffer_size,
            ..Default::default()
        };

        adapter
            .request_device(&DeviceDescriptor {
                label: Some("Scene Adapter Device"),
                required_features: Features::empty(),
                required_limits: limits,
                memory_hints: Default::default(),
                experimental_features: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| BackendError::Device(format!("Failed to create device: {:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_semantics() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<GpuContext>();
    }

    #[test]
    fn test_oversized_buffer_is_allocation_failure() {
        // Needs an adapter; skipped on machines without one
        let Ok(gpu) = GpuContext::new_blocking() else {
            return;
        };
        let err = gpu.check_buffer_size("spheres", u64::MAX).unwrap_err();
        assert!(matches!(err, BackendError::AllocationFailure { .. }));
    }
}
