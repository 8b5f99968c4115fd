//! In-memory SGS100A-like microwave source.

use crate::common::ErrorConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use daq_core::capabilities::{CwSettings, MicrowaveLimits, MicrowaveSource, SweepSettings};
use daq_core::driver::DriverFactory;
use daq_core::error::DaqError;
use daq_core::response::Reading;
use daq_core::states::MicrowaveMode;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;

const MODEL_NAME: &str = "mock";

const LIMITS: MicrowaveLimits = MicrowaveLimits {
    power_min_dbm: -20.0,
    power_max_dbm: 15.0,
    frequency_min_hz: 1.0e3,
    frequency_max_hz: 6.0e9,
};

/// Factory for creating MockMicrowave instances.
pub struct MockMicrowaveFactory;

impl DriverFactory<dyn MicrowaveSource> for MockMicrowaveFactory {
    fn driver_type(&self) -> &'static str {
        MODEL_NAME
    }

    fn name(&self) -> &'static str {
        "Mock Microwave Source"
    }

    fn validate(&self, _config: &toml::Value) -> Result<()> {
        Ok(())
    }

    fn build(&self, _config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn MicrowaveSource>>> {
        Box::pin(async move { Ok(Arc::new(MockMicrowave::new()) as Arc<dyn MicrowaveSource>) })
    }
}

#[derive(Debug)]
struct SourceSim {
    mode: MicrowaveMode,
    running: bool,
    frequency_hz: f64,
    power_dbm: f64,
    list_len: usize,
    list_pos: usize,
    sweep: Vec<f64>,
    sweep_pos: usize,
}

/// Simulated microwave source with the SGS100A limits.
///
/// Tracks frequency, power, mode and output state, and logs every applied
/// setting. Out-of-limit values are rejected.
pub struct MockMicrowave {
    sim: Mutex<SourceSim>,
    errors: ErrorConfig,
    log: Mutex<Vec<String>>,
}

impl MockMicrowave {
    /// Source at 2.87 GHz, -10 dBm, output off.
    pub fn new() -> Self {
        Self {
            sim: Mutex::new(SourceSim {
                mode: MicrowaveMode::None,
                running: false,
                frequency_hz: 2.87e9,
                power_dbm: -10.0,
                list_len: 0,
                list_pos: 0,
                sweep: Vec::new(),
                sweep_pos: 0,
            }),
            errors: ErrorConfig::none(),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Replace the failure injection configuration.
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Settings applied so far.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record(&self, operation: &'static str, entry: impl Into<String>) -> Result<()> {
        self.errors.check_operation(MODEL_NAME, operation)?;
        self.log.lock().push(entry.into());
        Ok(())
    }

    fn check_frequency(frequency_hz: f64) -> Result<()> {
        if (LIMITS.frequency_min_hz..=LIMITS.frequency_max_hz).contains(&frequency_hz) {
            Ok(())
        } else {
            Err(anyhow!("frequency {} Hz outside source limits", frequency_hz))
        }
    }

    fn check_power(power_dbm: f64) -> Result<()> {
        if (LIMITS.power_min_dbm..=LIMITS.power_max_dbm).contains(&power_dbm) {
            Ok(())
        } else {
            Err(anyhow!("power {} dBm outside source limits", power_dbm))
        }
    }

    fn output_on(&self, mode: MicrowaveMode) -> Result<()> {
        self.record("output", format!("output on ({mode})"))?;
        let mut sim = self.sim.lock();
        sim.running = true;
        sim.mode = mode;
        Ok(())
    }
}

impl Default for MockMicrowave {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MicrowaveSource for MockMicrowave {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    async fn cw_on(&self) -> Result<()> {
        self.output_on(MicrowaveMode::Cw)
    }

    async fn off(&self) -> Result<()> {
        self.record("output", "output off")?;
        self.sim.lock().running = false;
        Ok(())
    }

    async fn status(&self) -> Result<(MicrowaveMode, bool)> {
        let sim = self.sim.lock();
        Ok((sim.mode, sim.running))
    }

    fn limits(&self) -> Reading<MicrowaveLimits> {
        Reading::Value(LIMITS)
    }

    async fn power(&self) -> Result<f64> {
        self.errors.check_operation(MODEL_NAME, "power")?;
        Ok(self.sim.lock().power_dbm)
    }

    async fn frequency(&self) -> Result<f64> {
        self.errors.check_operation(MODEL_NAME, "frequency")?;
        Ok(self.sim.lock().frequency_hz)
    }

    async fn set_cw(
        &self,
        frequency_hz: Option<f64>,
        power_dbm: Option<f64>,
    ) -> Result<CwSettings> {
        if let Some(f) = frequency_hz {
            self.set_frequency(f).await?;
        }
        if let Some(p) = power_dbm {
            self.set_power(p).await?;
        }
        Ok(CwSettings {
            frequency_hz,
            power_dbm,
            mode: self.sim.lock().mode,
        })
    }

    async fn list_on(&self) -> Result<()> {
        self.output_on(MicrowaveMode::List)
    }

    async fn set_list(&self, frequencies_hz: &[f64], powers_dbm: &[f64]) -> Result<()> {
        let (nf, np) = (frequencies_hz.len(), powers_dbm.len());
        if nf == 0 || np == 0 || (nf != np && nf != 1 && np != 1) {
            return Err(DaqError::Configuration(format!(
                "list lengths {nf} and {np} must match or be 1"
            ))
            .into());
        }
        frequencies_hz.iter().try_for_each(|&f| Self::check_frequency(f))?;
        powers_dbm.iter().try_for_each(|&p| Self::check_power(p))?;

        self.record("set_list", format!("list {} entries", nf.max(np)))?;
        let mut sim = self.sim.lock();
        sim.list_len = nf.max(np);
        sim.list_pos = 0;
        sim.frequency_hz = frequencies_hz[0];
        sim.power_dbm = powers_dbm[0];
        Ok(())
    }

    async fn reset_list_position(&self) -> Result<()> {
        self.sim.lock().list_pos = 0;
        Ok(())
    }

    async fn sweep_on(&self) -> Result<()> {
        self.output_on(MicrowaveMode::Sweep)?;
        let mut sim = self.sim.lock();
        if let Some(&last) = sim.sweep.last() {
            sim.frequency_hz = last;
            sim.sweep_pos = sim.sweep.len() - 1;
        }
        Ok(())
    }

    async fn set_sweep(&self, sweep: SweepSettings) -> Result<()> {
        let frequencies = sweep.frequencies();
        let Some(&first) = frequencies.first() else {
            return Err(DaqError::Configuration("invalid sweep definition".into()).into());
        };
        Self::check_frequency(sweep.stop_hz)?;
        Self::check_frequency(first)?;
        Self::check_power(sweep.power_dbm)?;

        self.record("set_sweep", format!("sweep {} points", frequencies.len()))?;
        let mut sim = self.sim.lock();
        sim.sweep = frequencies;
        sim.sweep_pos = 0;
        sim.frequency_hz = first;
        sim.power_dbm = sweep.power_dbm;
        Ok(())
    }

    async fn reset_sweep_position(&self) -> Result<()> {
        let mut sim = self.sim.lock();
        sim.sweep_pos = 0;
        if let Some(&first) = sim.sweep.first() {
            sim.frequency_hz = first;
        }
        Ok(())
    }

    async fn set_power(&self, power_dbm: f64) -> Result<()> {
        Self::check_power(power_dbm)?;
        self.record("set_power", format!("power {power_dbm}"))?;
        self.sim.lock().power_dbm = power_dbm;
        Ok(())
    }

    async fn set_frequency(&self, frequency_hz: f64) -> Result<()> {
        Self::check_frequency(frequency_hz)?;
        self.record("set_frequency", format!("frequency {frequency_hz}"))?;
        self.sim.lock().frequency_hz = frequency_hz;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.record("reset", "*RST")?;
        *self.sim.lock() = Self::new().sim.into_inner();
        Ok(())
    }

    async fn send_raw(&self, message: &str) -> Result<Option<String>> {
        self.record("send_raw", message.to_string())?;
        Ok(message.contains('?').then(|| "0".to_string()))
    }

    async fn shutdown(&self) -> Result<()> {
        self.sim.lock().running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cw_round_trip() -> Result<()> {
        let source = MockMicrowave::new();
        let applied = source.set_cw(Some(2.5e9), Some(0.0)).await?;
        assert_eq!(applied.mode, MicrowaveMode::None);
        source.cw_on().await?;
        assert_eq!(source.status().await?, (MicrowaveMode::Cw, true));
        assert_eq!(source.frequency().await?, 2.5e9);
        assert_eq!(source.power().await?, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn out_of_limit_values_are_rejected() {
        let source = MockMicrowave::new();
        assert!(source.set_power(20.0).await.is_err());
        assert!(source.set_frequency(7.0e9).await.is_err());
        assert!(source.commands().is_empty());
    }

    #[tokio::test]
    async fn sweep_ends_on_last_point() -> Result<()> {
        let source = MockMicrowave::new();
        source
            .set_sweep(SweepSettings {
                start_hz: 2.8e9,
                stop_hz: 2.9e9,
                step_hz: 5.0e7,
                power_dbm: -5.0,
            })
            .await?;
        source.sweep_on().await?;
        assert_eq!(source.frequency().await?, 2.9e9);
        source.reset_sweep_position().await?;
        assert_eq!(source.frequency().await?, 2.8e9);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_list_is_configuration_error() {
        let source = MockMicrowave::new();
        let err = source
            .set_list(&[1.0e9, 2.0e9, 3.0e9], &[0.0, 1.0])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DaqError>(),
            Some(DaqError::Configuration(_))
        ));
    }
}
