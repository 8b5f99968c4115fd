//! Driver factories and the registry that selects them from configuration.
//!
//! Each driver crate exports a factory for its device type. The application
//! registers the factories once at startup and builds the configured device from
//! its TOML table:
//!
//! ```rust,ignore
//! use daq_core::driver::LaserRegistry;
//! use daq_driver_toptica::IBeamSmartFactory;
//!
//! let mut registry = LaserRegistry::for_lasers();
//! registry.register_factory(Box::new(IBeamSmartFactory));
//!
//! let config = toml::toml! {
//!     model = "iBeamSmart"
//!     com_port = "/dev/ttyUSB0"
//! };
//! let laser = registry.build(toml::Value::Table(config)).await?;
//! ```
//!
//! The model key selects a distinct driver type. Nothing downstream compares model
//! strings again.

use crate::capabilities::{LaserDevice, MicrowaveSource};
use crate::error::DaqError;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Creates driver instances of one device type.
///
/// `T` is the capability the driver provides, e.g. `dyn LaserDevice`.
///
/// # Lifetime
///
/// Factories are registered once at startup and live for the program's lifetime.
/// `build()` returns a `'static` future, so a factory must not hold mutable state
/// across builds.
pub trait DriverFactory<T: ?Sized>: Send + Sync + 'static {
    /// Model name matched against the config's model key (case-insensitive).
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// Validate configuration without touching hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Open the connection, verify the device and return it.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<T>>>;
}

/// Factory producing laser drivers.
pub type LaserFactory = dyn DriverFactory<dyn LaserDevice>;

/// Factory producing microwave source drivers.
pub type MicrowaveFactory = dyn DriverFactory<dyn MicrowaveSource>;

// =============================================================================
// Registry
// =============================================================================

/// Registry of factories for one capability.
pub struct DriverRegistry<T: ?Sized> {
    kind: &'static str,
    model_key: &'static str,
    default_model: &'static str,
    factories: HashMap<String, Box<dyn DriverFactory<T>>>,
}

/// Registry of laser factories.
pub type LaserRegistry = DriverRegistry<dyn LaserDevice>;

/// Registry of microwave source factories.
pub type MicrowaveRegistry = DriverRegistry<dyn MicrowaveSource>;

impl DriverRegistry<dyn LaserDevice> {
    /// Laser registry keyed by `model`, defaulting to the iBeam Smart.
    pub fn for_lasers() -> Self {
        Self::new("laser", "model", "iBeamSmart")
    }
}

impl DriverRegistry<dyn MicrowaveSource> {
    /// Microwave registry keyed by `model`, defaulting to the SGS100A.
    pub fn for_microwave() -> Self {
        Self::new("microwave", "model", "SGS100A")
    }
}

impl<T: ?Sized + 'static> DriverRegistry<T> {
    /// Empty registry.
    ///
    /// `model_key` names the config field that selects the factory; when it is
    /// absent, `default_model` is used and a warning is logged.
    pub fn new(kind: &'static str, model_key: &'static str, default_model: &'static str) -> Self {
        Self {
            kind,
            model_key,
            default_model,
            factories: HashMap::new(),
        }
    }

    /// Register a factory, returning any previous factory for the same model.
    pub fn register_factory(
        &mut self,
        factory: Box<dyn DriverFactory<T>>,
    ) -> Option<Box<dyn DriverFactory<T>>> {
        let driver_type = factory.driver_type().to_lowercase();
        tracing::debug!(
            kind = self.kind,
            driver_type = %driver_type,
            name = %factory.name(),
            "Registering driver factory"
        );
        self.factories.insert(driver_type, factory)
    }

    /// Check if a factory is registered for a model.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.factories.contains_key(&driver_type.to_lowercase())
    }

    /// Registered model names, sorted.
    pub fn list_factories(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.values().map(|f| f.driver_type()).collect();
        names.sort_unstable();
        names
    }

    /// Model named by `config`, or the default with a warning.
    pub fn model_of(&self, config: &toml::Value) -> String {
        match config.get(self.model_key).and_then(|v| v.as_str()) {
            Some(model) => model.to_string(),
            None => {
                tracing::warn!(
                    "No {} model configured ('{}'), assuming {}",
                    self.kind,
                    self.model_key,
                    self.default_model
                );
                self.default_model.to_string()
            }
        }
    }

    /// Validate `config` and build the device its model selects.
    pub async fn build(&self, config: toml::Value) -> Result<Arc<T>> {
        let model = self.model_of(&config);
        let factory = self.factories.get(&model.to_lowercase()).ok_or_else(|| {
            DaqError::Configuration(format!(
                "unknown {} model '{}' (known: {})",
                self.kind,
                model,
                self.list_factories().join(", ")
            ))
        })?;

        factory
            .validate(&config)
            .with_context(|| format!("Invalid {} configuration", factory.name()))?;
        tracing::info!(kind = self.kind, model = %model, "Activating {}", factory.name());
        factory
            .build(config)
            .await
            .with_context(|| format!("Failed to activate {}", factory.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::root_daq_error;

    struct EchoFactory;

    impl DriverFactory<String> for EchoFactory {
        fn driver_type(&self) -> &'static str {
            "Echo"
        }

        fn name(&self) -> &'static str {
            "Echo device"
        }

        fn validate(&self, config: &toml::Value) -> Result<()> {
            config
                .get("port")
                .ok_or_else(|| DaqError::Configuration("port is required".into()))?;
            Ok(())
        }

        fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<String>>> {
            Box::pin(async move {
                let port = config
                    .get("port")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(Arc::new(port))
            })
        }
    }

    fn registry() -> DriverRegistry<String> {
        let mut registry = DriverRegistry::new("echo", "model", "Echo");
        registry.register_factory(Box::new(EchoFactory));
        registry
    }

    #[tokio::test]
    async fn builds_from_model_key_case_insensitive() -> Result<()> {
        let config = toml::Value::Table(toml::toml! {
            model = "ECHO"
            port = "COM3"
        });
        let device = registry().build(config).await?;
        assert_eq!(device.as_str(), "COM3");
        Ok(())
    }

    #[tokio::test]
    async fn missing_model_uses_default() -> Result<()> {
        let config = toml::Value::Table(toml::toml! {
            port = "COM4"
        });
        let device = registry().build(config).await?;
        assert_eq!(device.as_str(), "COM4");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_model_is_configuration_error() {
        let config = toml::Value::Table(toml::toml! {
            model = "nope"
        });
        let err = registry().build(config).await.unwrap_err();
        assert!(matches!(root_daq_error(&err), Some(DaqError::Configuration(_))));
    }

    #[tokio::test]
    async fn validation_failure_keeps_root_cause() {
        let config = toml::Value::Table(toml::toml! {
            model = "echo"
        });
        let err = registry().build(config).await.unwrap_err();
        assert!(matches!(root_daq_error(&err), Some(DaqError::Configuration(_))));
    }

    #[test]
    fn lists_registered_models() {
        let registry = registry();
        assert!(registry.has_factory("echo"));
        assert_eq!(registry.list_factories(), vec!["Echo"]);
    }
}
