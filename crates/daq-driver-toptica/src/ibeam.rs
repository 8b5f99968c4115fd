//! Toptica iBeam Smart Diode Laser Driver
//!
//! Protocol Overview:
//! - Format: ASCII command/response over a USB virtual COM port
//! - Baud: 115200, 8N1, no flow control
//! - Command terminator: CR+LF (\r\n)
//! - Responses: a text burst ending in the 5-character prompt `CMD> `
//! - Values: `key = value unit`, e.g. `PIC  = 001234 uW`
//!
//! The device does not terminate responses in a way that can be matched reliably,
//! so a response is read in 200-byte chunks until one comes back short (see
//! [`daq_core::serial::LineTransport`]). Every command, including setters, is
//! followed by a burst read so the prompt never leaks into the next response.
//!
//! Units:
//! - `sh pow` reports µW; this driver returns mW.
//! - `ch N power <v>` receives the caller's mW value unchanged.
//! - `puls freq` is sent as caller value × 1000 (kHz in, Hz on the wire).
//! - `puls period` / `puls width` are sent in seconds; callers pass µs.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_toptica::IBeamSmartFactory;
//! use daq_core::driver::DriverFactory;
//!
//! let config = toml::toml! {
//!     com_port = "/dev/ttyACM0"
//!     maxpower = 0.15
//! };
//! let laser = IBeamSmartFactory.build(toml::Value::Table(config)).await?;
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{LaserDevice, Temperatures};
use daq_core::driver::DriverFactory;
use daq_core::error::DaqError;
use daq_core::response::{classify_status, format_number, parse_value, Reading, StatusToken};
use daq_core::serial::{LineSettings, LineTransport};
use daq_core::states::{FeatureStatus, LaserChannel, LaserState};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Substring the `serial` response must contain for the device to be accepted.
pub const IDENTITY_MARKER: &str = "iBEAM";

const MODEL_NAME: &str = "iBeamSmart";

// =============================================================================
// IBeamSmartFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the iBeam Smart driver
#[derive(Debug, Clone, Deserialize)]
pub struct IBeamSmartConfig {
    /// Serial port (e.g. "COM3", "/dev/ttyACM0"). Required.
    #[serde(default)]
    pub com_port: Option<String>,
    /// Maximum output power in W. Defaults to 0.15 with a warning.
    #[serde(default)]
    pub maxpower: Option<f64>,
    /// Model name; informational once the factory has been chosen.
    #[serde(default)]
    pub model: Option<String>,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-chunk read timeout in ms. Zero disables the timeout, which is rejected.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Bytes requested per read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    200
}

/// Maximum power used when `maxpower` is not configured, in W.
const DEFAULT_MAX_POWER_W: f64 = 0.15;

impl IBeamSmartConfig {
    /// The configured serial port.
    pub fn port(&self) -> Result<&str, DaqError> {
        self.com_port
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| DaqError::Configuration("iBeam Smart requires 'com_port'".into()))
    }

    /// Maximum output power in mW, warning when falling back to the default.
    pub fn max_power_mw(&self) -> f64 {
        match self.maxpower {
            Some(watts) => watts * 1e3,
            None => {
                tracing::warn!(
                    "No maxpower configured for the iBeam Smart, using {} W",
                    DEFAULT_MAX_POWER_W
                );
                DEFAULT_MAX_POWER_W * 1e3
            }
        }
    }

    /// Transport settings derived from this configuration.
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            chunk_size: self.chunk_size,
            read_timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            ..LineSettings::default()
        }
    }
}

/// Factory for creating iBeam Smart driver instances.
pub struct IBeamSmartFactory;

impl DriverFactory<dyn LaserDevice> for IBeamSmartFactory {
    fn driver_type(&self) -> &'static str {
        MODEL_NAME
    }

    fn name(&self) -> &'static str {
        "Toptica iBeam Smart Diode Laser"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: IBeamSmartConfig = config.clone().try_into()?;
        cfg.port()?;
        if cfg.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "iBeam Smart needs a read timeout (timeout_ms > 0)".into(),
            )
            .into());
        }
        if cfg.chunk_size == 0 {
            return Err(DaqError::Configuration("chunk_size must be at least 1".into()).into());
        }
        if let Some(watts) = cfg.maxpower {
            if !(watts > 0.0 && watts.is_finite()) {
                return Err(anyhow!("maxpower must be a positive number of watts, got {}", watts));
            }
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn LaserDevice>>> {
        Box::pin(async move {
            let cfg: IBeamSmartConfig = config.try_into().context("Invalid iBeam Smart config")?;
            let driver = IBeamSmart::connect(&cfg).await?;
            Ok(Arc::new(driver) as Arc<dyn LaserDevice>)
        })
    }
}

// =============================================================================
// IBeamSmart
// =============================================================================

/// Driver for the Toptica iBeam Smart diode laser.
///
/// Owns the serial connection; dropping the driver closes the port.
pub struct IBeamSmart {
    transport: LineTransport,
    max_power_mw: f64,
}

impl IBeamSmart {
    /// Open the configured port and validate the device identity.
    ///
    /// # Errors
    /// [`DaqError::Connection`] if the port cannot be opened or the device does not
    /// identify as an iBeam; [`DaqError::Configuration`] if `com_port` is missing.
    pub async fn connect(cfg: &IBeamSmartConfig) -> Result<Self> {
        let port = cfg.port()?;
        let transport =
            LineTransport::open(port, cfg.baud_rate, cfg.line_settings(), "iBeam Smart").await?;
        Self::with_transport(transport, cfg.max_power_mw()).await
    }

    /// Validate the device behind an already opened transport.
    pub async fn with_transport(transport: LineTransport, max_power_mw: f64) -> Result<Self> {
        transport.drain(20).await;
        let driver = Self {
            transport,
            max_power_mw,
        };

        let identity = driver
            .identify()
            .await
            .map_err(|e| DaqError::Connection(format!("no response to identity query: {e}")))?;
        if !identity.contains(IDENTITY_MARKER) {
            return Err(DaqError::Connection(format!(
                "device identity '{}' doesn't indicate an iBeam laser",
                identity.trim()
            ))
            .into());
        }
        tracing::info!("iBeam Smart laser validated: {}", identity.trim());

        Ok(driver)
    }

    /// Send a command and return its decoded response.
    async fn query(&self, command: &str) -> Result<String> {
        self.transport
            .communicate(command)
            .await
            .with_context(|| format!("iBeam command '{}' failed", command))
    }

    /// Send a command whose response is only logged.
    async fn command(&self, command: &str) -> Result<()> {
        let response = self.query(command).await?;
        tracing::debug!(command, response = %response.trim(), "iBeam command acknowledged");
        Ok(())
    }

    /// Query a `key = value` response, failing if no value is present.
    async fn query_number(&self, command: &str) -> Result<f64> {
        let response = self.query(command).await?;
        parse_value(&response).value().ok_or_else(|| {
            DaqError::InvalidResponse {
                command: command.to_string(),
                response: response.trim().to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl LaserDevice for IBeamSmart {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    #[instrument(skip(self), err)]
    async fn identify(&self) -> Result<String> {
        self.query("serial").await
    }

    fn power_range(&self) -> (f64, f64) {
        (0.0, self.max_power_mw)
    }

    #[instrument(skip(self), err)]
    async fn power(&self) -> Result<f64> {
        let microwatts = self.query_number("sh pow").await?;
        Ok(microwatts / 1e3)
    }

    #[instrument(skip(self), err)]
    async fn power_setpoint(&self) -> Result<Reading<f64>> {
        let response = self.query("sh pow").await?;
        Ok(parse_value(&response).map(|microwatts| microwatts / 1e3))
    }

    #[instrument(skip(self), err)]
    async fn set_channel_power(&self, channel: LaserChannel, power_mw: f64) -> Result<()> {
        let (min, max) = self.power_range();
        if !(min..=max).contains(&power_mw) {
            return Err(anyhow!(
                "Power {} mW out of iBeam Smart range ({}-{} mW)",
                power_mw,
                min,
                max
            ));
        }
        self.command(&format!(
            "ch {} power {}",
            channel.number(),
            format_number(power_mw)
        ))
        .await
    }

    #[instrument(skip(self), err)]
    async fn channel_info(&self) -> Result<String> {
        self.query("sh ch").await
    }

    #[instrument(skip(self), err)]
    async fn current(&self) -> Result<Reading<f64>> {
        let response = self.query("sh cur").await?;
        Ok(parse_value(&response))
    }

    #[instrument(skip(self), err)]
    async fn temperatures(&self) -> Result<Temperatures> {
        let base_plate = self.query_number("sh temp sys").await?;
        let diode = self.query_number("sh temp").await?;

        let mut temps = Temperatures::new();
        temps.insert("Base Plate".to_string(), base_plate);
        temps.insert("Diode".to_string(), diode);
        Ok(temps)
    }

    #[instrument(skip(self), err)]
    async fn laser_state(&self) -> Result<LaserState> {
        let response = self.query("sta la").await?;
        let token = classify_status(&response);
        if token == StatusToken::Error {
            tracing::warn!(response = %response.trim(), "iBeam reported an error state");
        }
        Ok(LaserState::from(token))
    }

    #[instrument(skip(self), err)]
    async fn set_laser_state(&self, state: LaserState) -> Result<LaserState> {
        match state {
            LaserState::On => self.command("la on").await?,
            LaserState::Off => self.command("la off").await?,
            other => tracing::warn!(
                "Laser state {} cannot be requested, keeping current state",
                other
            ),
        }
        self.laser_state().await
    }

    #[instrument(skip(self), err)]
    async fn set_autopulse(&self, enabled: bool) -> Result<()> {
        self.command(if enabled { "puls on" } else { "puls off" })
            .await
    }

    #[instrument(skip(self), err)]
    async fn autopulse_status(&self) -> Result<FeatureStatus> {
        let response = self.query("sta puls").await?;
        Ok(FeatureStatus::from_response(&response))
    }

    #[instrument(skip(self), err)]
    async fn set_autopulse_frequency(&self, frequency_khz: f64) -> Result<()> {
        self.command(&format!("puls freq {}", format_number(frequency_khz * 1e3)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn set_autopulse_duty(&self, duty: f64) -> Result<()> {
        self.command(&format!("puls duty {}", format_number(duty)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn set_autopulse_period(&self, period_us: f64) -> Result<()> {
        self.command(&format!("puls period {}", format_number(period_us / 1e6)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn set_autopulse_width(&self, width_us: f64) -> Result<()> {
        self.command(&format!("puls width {}", format_number(width_us / 1e6)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn set_fine(&self, enabled: bool) -> Result<()> {
        self.command(if enabled { "fine on" } else { "fine off" })
            .await
    }

    #[instrument(skip(self), err)]
    async fn set_fine_a(&self, value: f64) -> Result<()> {
        self.command(&format!("fine a {}", format_number(value)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn set_fine_b(&self, value: f64) -> Result<()> {
        self.command(&format!("fine b {}", format_number(value)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn fine_status(&self) -> Result<FeatureStatus> {
        let response = self.query("sta fine").await?;
        Ok(FeatureStatus::from_response(&response))
    }

    #[instrument(skip(self), err)]
    async fn set_skill(&self, enabled: bool) -> Result<()> {
        self.command(if enabled { "skill on" } else { "skill off" })
            .await
    }

    #[instrument(skip(self), err)]
    async fn extra_info(&self) -> Result<String> {
        let serial = self.query("serial").await?;
        let version = self.query("ver").await?;
        let uptime = self.query("sh timer").await?;
        Ok(format!(
            "Serial number: {}\nFirmware Version: {}\nSystem UP Time: {}\n",
            serial.trim(),
            version.trim(),
            uptime.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_driver_type() {
        let factory = IBeamSmartFactory;
        assert_eq!(factory.driver_type(), "iBeamSmart");
        assert_eq!(factory.name(), "Toptica iBeam Smart Diode Laser");
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = IBeamSmartFactory;

        let valid = toml::Value::Table(toml::toml! {
            com_port = "COM3"
            maxpower = 0.15
        });
        assert!(factory.validate(&valid).is_ok());

        let missing_port = toml::Value::Table(toml::toml! {
            maxpower = 0.15
        });
        let err = factory.validate(&missing_port).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DaqError>(),
            Some(DaqError::Configuration(_))
        ));

        let no_timeout = toml::Value::Table(toml::toml! {
            com_port = "COM3"
            timeout_ms = 0
        });
        assert!(factory.validate(&no_timeout).is_err());

        let negative_power = toml::Value::Table(toml::toml! {
            com_port = "COM3"
            maxpower = -1.0
        });
        assert!(factory.validate(&negative_power).is_err());
    }

    #[test]
    fn test_config_defaults() {
        let cfg: IBeamSmartConfig = toml::Value::Table(toml::toml! {
            com_port = "/dev/ttyACM0"
        })
        .try_into()
        .unwrap();

        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.max_power_mw(), 150.0);
        let settings = cfg.line_settings();
        assert_eq!(settings.chunk_size, 200);
        assert_eq!(settings.read_timeout, Some(Duration::from_millis(30)));
        assert_eq!(settings.suffix_len, 5);
    }

    #[test]
    fn test_zero_timeout_means_no_timeout() {
        let cfg: IBeamSmartConfig = toml::Value::Table(toml::toml! {
            com_port = "COM3"
            timeout_ms = 0
        })
        .try_into()
        .unwrap();
        assert_eq!(cfg.line_settings().read_timeout, None);
    }

    #[tokio::test]
    async fn test_build_without_port_is_configuration_error() {
        let config = toml::Value::Table(toml::toml! {
            maxpower = 0.1
        });
        let err = match IBeamSmartFactory.build(config).await {
            Ok(_) => panic!("build without com_port must fail"),
            Err(e) => e,
        };
        assert!(matches!(
            daq_core::error::root_daq_error(&err),
            Some(DaqError::Configuration(_))
        ));
    }
}
