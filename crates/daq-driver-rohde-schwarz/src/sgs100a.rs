//! Rohde & Schwarz SGS100A SGMA RF Source Driver
//!
//! Protocol Overview:
//! - SCPI over VISA (LAN: `TCPIP::<ip>::inst0::INSTR`)
//! - Commands ending in `;:wai` return once the instrument has applied them
//! - Output state: `:OUTPut:STATe 0|1`, queried with `:OUTPut:STATe?`
//!
//! The instrument has no hardware list or sweep engine in use here. List and sweep
//! modes are emulated by stepping the CW frequency from the host, so the position
//! within the list or sweep is driver state.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_rohde_schwarz::Sgs100aFactory;
//! use daq_core::driver::DriverFactory;
//!
//! let config = toml::toml! {
//!     ip_address = "TCPIP::169.254.2.20::inst0::INSTR"
//! };
//! let source = Sgs100aFactory.build(toml::Value::Table(config)).await?;
//! source.set_cw(Some(2.87e9), Some(-10.0)).await?;
//! source.cw_on().await?;
//! ```

use crate::session::{open_visa_session, ScpiSession, SharedSession};
use anyhow::{Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{CwSettings, MicrowaveLimits, MicrowaveSource, SweepSettings};
use daq_core::driver::DriverFactory;
use daq_core::error::DaqError;
use daq_core::response::{format_number, Reading};
use daq_core::states::MicrowaveMode;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const MODEL_NAME: &str = "SGS100A";
const UNKNOWN_MODEL: &str = "unknown";

/// Output limits of the SGS100A base model.
///
/// The upper frequency depends on the installed frequency option.
pub const SGS100A_LIMITS: MicrowaveLimits = MicrowaveLimits {
    power_min_dbm: -20.0,
    power_max_dbm: 15.0,
    frequency_min_hz: 1.0e3,
    frequency_max_hz: 6.0e9,
};

// =============================================================================
// Sgs100aFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the SGS100A driver
#[derive(Debug, Clone, Deserialize)]
pub struct Sgs100aConfig {
    /// VISA resource string. Required.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// VISA open timeout in ms
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Model name; informational once the factory has been chosen.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Sgs100aConfig {
    /// The configured VISA resource.
    pub fn resource(&self) -> Result<&str, DaqError> {
        self.ip_address
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| DaqError::Configuration("SGS100A requires 'ip_address'".into()))
    }
}

/// Factory for creating SGS100A driver instances.
pub struct Sgs100aFactory;

impl DriverFactory<dyn MicrowaveSource> for Sgs100aFactory {
    fn driver_type(&self) -> &'static str {
        MODEL_NAME
    }

    fn name(&self) -> &'static str {
        "Rohde & Schwarz SGS100A RF Source"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Sgs100aConfig = config.clone().try_into()?;
        cfg.resource()?;
        if cfg.timeout_ms == 0 {
            return Err(DaqError::Configuration("timeout_ms must be at least 1".into()).into());
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn MicrowaveSource>>> {
        Box::pin(async move {
            let cfg: Sgs100aConfig = config.try_into().context("Invalid SGS100A config")?;
            let driver = Sgs100a::connect(&cfg).await?;
            Ok(Arc::new(driver) as Arc<dyn MicrowaveSource>)
        })
    }
}

// =============================================================================
// Sgs100a
// =============================================================================

#[derive(Debug, Default)]
struct SourceState {
    mode: MicrowaveMode,
    running: bool,
    list_frequencies: Vec<f64>,
    list_powers: Vec<f64>,
    list_pos: usize,
    sweep_list: Vec<f64>,
    sweep_pos: usize,
}

/// Driver for the Rohde & Schwarz SGS100A.
pub struct Sgs100a {
    session: SharedSession,
    model: &'static str,
    state: Mutex<SourceState>,
}

impl Sgs100a {
    /// Open the configured VISA resource and identify the instrument.
    ///
    /// # Errors
    /// [`DaqError::Connection`] if the resource cannot be opened or does not answer.
    pub async fn connect(cfg: &Sgs100aConfig) -> Result<Self> {
        let resource = cfg.resource()?;
        let session = open_visa_session(resource, Duration::from_millis(cfg.timeout_ms))
            .await
            .with_context(|| {
                format!(
                    "could not connect to {resource}; check that the instrument is powered \
                     and reachable on the network"
                )
            })?;
        Self::with_session(session).await
    }

    /// Identify the instrument behind an open session and read its output state.
    pub async fn with_session(session: Box<dyn ScpiSession>) -> Result<Self> {
        let session = SharedSession::new(session);

        let identity = session
            .query("*IDN?")
            .await
            .map_err(|e| DaqError::Connection(format!("no response to *IDN?: {e}")))?;
        let model = if identity.contains(MODEL_NAME) {
            MODEL_NAME
        } else {
            UNKNOWN_MODEL
        };
        tracing::info!("connected to device {}", identity);

        let output = session
            .query(":OUTPut:STATe?")
            .await
            .map_err(|e| DaqError::Connection(format!("no response to output state query: {e}")))?;

        Ok(Self {
            session,
            model,
            state: Mutex::new(SourceState {
                running: output.trim() == "1",
                ..SourceState::default()
            }),
        })
    }

    async fn write(&self, command: &str) -> Result<()> {
        self.session
            .write(command)
            .await
            .with_context(|| format!("SGS100A command '{}' failed", command))
    }

    async fn query_number(&self, command: &str) -> Result<f64> {
        let response = self.session.query(command).await?;
        response.trim().parse::<f64>().map_err(|_| {
            DaqError::InvalidResponse {
                command: command.to_string(),
                response: response.trim().to_string(),
            }
            .into()
        })
    }

    async fn write_frequency(&self, frequency_hz: f64) -> Result<()> {
        self.write(&format!(
            ":SOURce:FREQuency:CW {};:wai",
            format_number(frequency_hz)
        ))
        .await
    }

    async fn write_power(&self, power_dbm: f64) -> Result<()> {
        self.write(&format!(":POWer:POWer {};:wai", format_number(power_dbm)))
            .await
    }

    async fn output_on(&self, mode: MicrowaveMode) -> Result<()> {
        self.write(":OUTPut:STATe 1;:wai").await?;
        let mut state = self.state.lock();
        state.running = true;
        state.mode = mode;
        tracing::info!("Microwave output is activated ({})", mode);
        Ok(())
    }
}

#[async_trait]
impl MicrowaveSource for Sgs100a {
    fn model_name(&self) -> &str {
        self.model
    }

    #[instrument(skip(self), err)]
    async fn cw_on(&self) -> Result<()> {
        self.output_on(MicrowaveMode::Cw).await
    }

    #[instrument(skip(self), err)]
    async fn off(&self) -> Result<()> {
        self.write(":OUTPut:STATe 0;:wai").await?;
        self.state.lock().running = false;
        tracing::info!("Microwave output is deactivated");
        Ok(())
    }

    async fn status(&self) -> Result<(MicrowaveMode, bool)> {
        let state = self.state.lock();
        Ok((state.mode, state.running))
    }

    fn limits(&self) -> Reading<MicrowaveLimits> {
        if self.model == MODEL_NAME {
            Reading::Value(SGS100A_LIMITS)
        } else {
            tracing::warn!("No output limits known for model '{}'", self.model);
            Reading::NotAvailable
        }
    }

    async fn power(&self) -> Result<f64> {
        self.query_number(":SOURce:POWer:POWer?").await
    }

    async fn frequency(&self) -> Result<f64> {
        self.query_number(":SOURce:FREQuency:CW?").await
    }

    #[instrument(skip(self), err)]
    async fn set_cw(
        &self,
        frequency_hz: Option<f64>,
        power_dbm: Option<f64>,
    ) -> Result<CwSettings> {
        if let Some(f) = frequency_hz {
            self.write_frequency(f).await?;
        }
        if let Some(p) = power_dbm {
            self.write_power(p).await?;
        }
        tracing::info!("Microwave parameter set");
        Ok(CwSettings {
            frequency_hz,
            power_dbm,
            mode: self.state.lock().mode,
        })
    }

    #[instrument(skip(self), err)]
    async fn list_on(&self) -> Result<()> {
        self.output_on(MicrowaveMode::List).await
    }

    #[instrument(skip(self), err)]
    async fn set_list(&self, frequencies_hz: &[f64], powers_dbm: &[f64]) -> Result<()> {
        let (nf, np) = (frequencies_hz.len(), powers_dbm.len());
        if nf == 0 || np == 0 || (nf != np && nf != 1 && np != 1) {
            return Err(DaqError::Configuration(format!(
                "list of frequencies and power levels must have the same length or length 1 \
                 (got {nf} and {np})"
            ))
            .into());
        }

        {
            let mut state = self.state.lock();
            state.list_frequencies = frequencies_hz.to_vec();
            state.list_powers = powers_dbm.to_vec();
            state.list_pos = 0;
        }
        self.write_frequency(frequencies_hz[0]).await?;
        self.write_power(powers_dbm[0]).await?;
        tracing::info!("Microwave list set ({} entries)", nf.max(np));
        Ok(())
    }

    async fn reset_list_position(&self) -> Result<()> {
        self.state.lock().list_pos = 0;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn sweep_on(&self) -> Result<()> {
        self.output_on(MicrowaveMode::Sweep).await?;

        let (remaining, start) = {
            let state = self.state.lock();
            let start = state.sweep_pos.min(state.sweep_list.len());
            (state.sweep_list[start..].to_vec(), start)
        };
        for (offset, frequency) in remaining.into_iter().enumerate() {
            self.write_frequency(frequency).await?;
            self.state.lock().sweep_pos = start + offset;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_sweep(&self, sweep: SweepSettings) -> Result<()> {
        let frequencies = sweep.frequencies();
        let Some(&first) = frequencies.first() else {
            return Err(DaqError::Configuration(format!(
                "invalid sweep: start {} Hz, stop {} Hz, step {} Hz",
                sweep.start_hz, sweep.stop_hz, sweep.step_hz
            ))
            .into());
        };
        if let Reading::Value(limits) = self.limits() {
            let last = frequencies.last().copied().unwrap_or(first);
            if !limits.contains(first, sweep.power_dbm) || !limits.contains(last, sweep.power_dbm)
            {
                return Err(DaqError::Configuration(format!(
                    "sweep {} - {} Hz at {} dBm is outside the {} limits",
                    first, last, sweep.power_dbm, self.model
                ))
                .into());
            }
        }

        {
            let mut state = self.state.lock();
            state.sweep_list = frequencies;
            state.sweep_pos = 0;
        }
        self.write_frequency(first).await?;
        self.write_power(sweep.power_dbm).await?;
        tracing::info!("Microwave sweep set");
        Ok(())
    }

    async fn reset_sweep_position(&self) -> Result<()> {
        self.state.lock().sweep_pos = 0;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_power(&self, power_dbm: f64) -> Result<()> {
        self.write(&format!(":SOURce:POWer:POWer {}", format_number(power_dbm)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn set_frequency(&self, frequency_hz: f64) -> Result<()> {
        self.write(&format!(
            ":SOURce:FREQuency:CW {}",
            format_number(frequency_hz)
        ))
        .await
    }

    #[instrument(skip(self), err)]
    async fn reset(&self) -> Result<()> {
        self.write("*RST").await?;
        let mut state = self.state.lock();
        state.mode = MicrowaveMode::None;
        state.running = false;
        Ok(())
    }

    async fn send_raw(&self, message: &str) -> Result<Option<String>> {
        if message.contains('?') {
            let reply = self.session.query(message).await?;
            tracing::info!("{}", reply);
            Ok(Some(reply))
        } else {
            self.write(message).await?;
            Ok(None)
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.write(":OUTPut:STATe 0").await?;
        self.state.lock().running = false;
        Ok(())
    }
}
