//! Graphics instance.
//!
//! The [`GraphicsInstance`] is the top-level entry point: it loads a backend,
//! enumerates adapters and opens the [`GpuDevice`] the renderer runs on.

use crate::backend::{self, GpuInstance};
use crate::device::{AdapterInfo, GpuDevice, rank_adapters};
use crate::error::GraphicsError;

/// Which GPU backend to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Vulkan if available, otherwise the dummy backend.
    #[default]
    Auto,
    /// Simulated GPU.
    Dummy,
    /// Native Vulkan through ash.
    Vulkan,
}

/// Parameters for creating a [`GraphicsInstance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceParameters {
    pub backend: BackendType,
    /// Enable API validation and the message filter.
    pub validation: bool,
    /// Application name reported to the driver.
    pub app_name: String,
}

impl Default for InstanceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            validation: cfg!(debug_assertions),
            app_name: "Lumen".to_string(),
        }
    }
}

impl InstanceParameters {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }
}

/// Loaded backend plus its adapter list.
pub struct GraphicsInstance {
    inner: Box<dyn GpuInstance>,
}

impl GraphicsInstance {
    /// Create a graphics instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested backend cannot be loaded.
    pub fn new(params: &InstanceParameters) -> Result<Self, GraphicsError> {
        log::info!("Creating GraphicsInstance");
        let inner = backend::create_instance(params)?;
        log::info!("Using GPU backend: {}", inner.name());
        Ok(Self { inner })
    }

    /// Wrap an already created backend instance.
    pub fn from_backend(inner: Box<dyn GpuInstance>) -> Self {
        Self { inner }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.name()
    }

    /// Enumerate available graphics adapters.
    pub fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.inner.enumerate_adapters()
    }

    /// Create a device on the best qualifying adapter.
    ///
    /// Qualifying adapters are tried in order of dedicated memory until one
    /// opens a device.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InitializationFailed`] if no adapter
    /// qualifies or device creation fails on every one of them.
    pub fn create_device(&self) -> Result<GpuDevice, GraphicsError> {
        let adapters = self.enumerate_adapters();
        for adapter in &adapters {
            log::debug!(
                "Found adapter: {} ({:?}, {} MiB dedicated, minimum feature level: {})",
                adapter.name,
                adapter.device_type,
                adapter.dedicated_memory >> 20,
                adapter.meets_minimum_feature_level
            );
        }

        let candidates = rank_adapters(&adapters)?;
        let tried = candidates.len();
        for adapter in candidates {
            log::info!("Creating device on adapter: {}", adapter.name);
            match self.inner.create_device(adapter) {
                Ok(backend) => return Ok(GpuDevice::new(adapter.clone(), backend)),
                Err(e) => log::warn!("Skipping adapter {}: {}", adapter.name, e),
            }
        }
        Err(GraphicsError::InitializationFailed(format!(
            "no adapter could create a device ({tried} tried)"
        )))
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.inner.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyInstance;
    use crate::device::AdapterType;

    #[test]
    fn test_dummy_instance_creation() {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let instance = GraphicsInstance::new(&params).unwrap();
        assert_eq!(instance.backend_name(), "Dummy");
        assert!(!instance.enumerate_adapters().is_empty());
    }

    #[test]
    fn test_create_device_picks_largest_hardware_adapter() {
        let adapters = vec![
            AdapterInfo::new(0, "Software", AdapterType::Software, 64 << 30),
            AdapterInfo::new(1, "Small", AdapterType::Integrated, 512 << 20),
            AdapterInfo::new(2, "Large", AdapterType::Discrete, 8 << 30),
        ];
        let instance = GraphicsInstance::from_backend(Box::new(DummyInstance::with_adapters(
            adapters,
        )));
        let device = instance.create_device().unwrap();
        assert_eq!(device.adapter().name, "Large");
    }

    #[test]
    fn test_create_device_falls_back_when_largest_adapter_fails() {
        let adapters = vec![
            AdapterInfo::new(0, "Small", AdapterType::Integrated, 512 << 20),
            AdapterInfo::new(1, "Large", AdapterType::Discrete, 8 << 30),
        ];
        let dummy = DummyInstance::with_adapters(adapters).with_failing_adapter(1);
        let instance = GraphicsInstance::from_backend(Box::new(dummy));
        let device = instance.create_device().unwrap();
        assert_eq!(device.adapter().name, "Small");
    }

    #[test]
    fn test_create_device_fails_when_every_adapter_fails() {
        let adapters = vec![
            AdapterInfo::new(0, "Small", AdapterType::Integrated, 512 << 20),
            AdapterInfo::new(1, "Large", AdapterType::Discrete, 8 << 30),
        ];
        let dummy = DummyInstance::with_adapters(adapters)
            .with_failing_adapter(0)
            .with_failing_adapter(1);
        let instance = GraphicsInstance::from_backend(Box::new(dummy));
        assert!(matches!(
            instance.create_device(),
            Err(GraphicsError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_create_device_fails_without_qualifying_adapter() {
        let instance = GraphicsInstance::from_backend(Box::new(DummyInstance::with_adapters(
            vec![AdapterInfo::new(0, "Software", AdapterType::Software, 1 << 30)],
        )));
        assert!(matches!(
            instance.create_device(),
            Err(GraphicsError::InitializationFailed(_))
        ));
    }
}
