//! In-memory iBeam-like diode laser.

use crate::common::{ErrorConfig, MockRng};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{soft_unsupported, LaserDevice, Temperatures};
use daq_core::driver::DriverFactory;
use daq_core::response::Reading;
use daq_core::states::{ControlMode, FeatureStatus, LaserChannel, LaserState, ShutterState};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

const MODEL_NAME: &str = "mock";

// =============================================================================
// MockLaserFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the mock laser
#[derive(Debug, Clone, Deserialize)]
pub struct MockLaserConfig {
    /// Maximum channel power in mW (default: 150.0)
    #[serde(default = "default_max_power")]
    pub max_power_mw: f64,

    /// Channel 1 power at start-up in mW (default: 10.0)
    #[serde(default = "default_channel_power")]
    pub channel_power_mw: f64,

    /// Relative noise on power and temperature readings (default: 0.005)
    #[serde(default = "default_noise")]
    pub noise_fraction: f64,

    /// RNG seed for reproducible noise
    #[serde(default)]
    pub seed: Option<u64>,

    /// Accept current setpoints and constant-current mode (default: false)
    #[serde(default)]
    pub current_control: bool,

    /// Fit an output shutter, closed at start-up (default: false)
    #[serde(default)]
    pub shutter: bool,
}

fn default_max_power() -> f64 {
    150.0
}

fn default_channel_power() -> f64 {
    10.0
}

fn default_noise() -> f64 {
    0.005
}

impl Default for MockLaserConfig {
    fn default() -> Self {
        Self {
            max_power_mw: default_max_power(),
            channel_power_mw: default_channel_power(),
            noise_fraction: default_noise(),
            seed: None,
            current_control: false,
            shutter: false,
        }
    }
}

/// Factory for creating MockLaser instances.
pub struct MockLaserFactory;

impl DriverFactory<dyn LaserDevice> for MockLaserFactory {
    fn driver_type(&self) -> &'static str {
        MODEL_NAME
    }

    fn name(&self) -> &'static str {
        "Mock Diode Laser"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockLaserConfig = config.clone().try_into()?;
        if cfg.max_power_mw <= 0.0 {
            return Err(anyhow!("max_power_mw must be positive"));
        }
        if !(0.0..=cfg.max_power_mw).contains(&cfg.channel_power_mw) {
            return Err(anyhow!(
                "channel_power_mw {} outside 0-{} mW",
                cfg.channel_power_mw,
                cfg.max_power_mw
            ));
        }
        if !(0.0..1.0).contains(&cfg.noise_fraction) {
            return Err(anyhow!("noise_fraction must be in [0, 1)"));
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn LaserDevice>>> {
        Box::pin(async move {
            let cfg: MockLaserConfig = config
                .try_into()
                .context("Invalid mock laser config")?;
            Ok(Arc::new(MockLaser::with_config(cfg)) as Arc<dyn LaserDevice>)
        })
    }
}

// =============================================================================
// MockLaser
// =============================================================================

#[derive(Debug)]
struct LaserSim {
    emitting: bool,
    channel_power_mw: [f64; 2],
    autopulse: bool,
    fine: bool,
    skill: bool,
    fine_a: f64,
    fine_b: f64,
    control_mode: ControlMode,
    current_percent: f64,
    shutter: ShutterState,
}

/// Simulated diode laser.
///
/// Behaves like the iBeam driver from the caller's side: power in mW, two
/// channels, autopulse and FINE switches. Every call is recorded in a command
/// log using the device's command words, and any call can be made to fail
/// through [`ErrorConfig`].
pub struct MockLaser {
    sim: Mutex<LaserSim>,
    max_power_mw: f64,
    noise_fraction: f64,
    current_control: bool,
    rng: MockRng,
    errors: ErrorConfig,
    log: Mutex<Vec<String>>,
}

impl MockLaser {
    /// Mock laser with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockLaserConfig::default())
    }

    /// Mock laser with custom configuration.
    pub fn with_config(config: MockLaserConfig) -> Self {
        Self {
            sim: Mutex::new(LaserSim {
                emitting: false,
                channel_power_mw: [config.channel_power_mw, 0.0],
                autopulse: false,
                fine: false,
                skill: false,
                fine_a: 0.0,
                fine_b: 0.0,
                control_mode: ControlMode::Power,
                current_percent: 0.0,
                shutter: if config.shutter {
                    ShutterState::Closed
                } else {
                    ShutterState::NoShutter
                },
            }),
            max_power_mw: config.max_power_mw,
            noise_fraction: config.noise_fraction,
            current_control: config.current_control,
            rng: MockRng::new(config.seed),
            errors: ErrorConfig::none(),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Replace the failure injection configuration.
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Commands received so far.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Number of times `command` was received.
    pub fn count(&self, command: &str) -> usize {
        self.log.lock().iter().filter(|c| c.as_str() == command).count()
    }

    /// Forget recorded commands.
    pub fn clear_commands(&self) {
        self.log.lock().clear();
    }

    /// Whether SKILL is enabled.
    pub fn skill_enabled(&self) -> bool {
        self.sim.lock().skill
    }

    /// Control mode in effect.
    pub fn active_control_mode(&self) -> ControlMode {
        self.sim.lock().control_mode
    }

    /// FINE parameters (A, B).
    pub fn fine_parameters(&self) -> (f64, f64) {
        let sim = self.sim.lock();
        (sim.fine_a, sim.fine_b)
    }

    fn record(&self, operation: &'static str, command: impl Into<String>) -> Result<()> {
        self.errors.check_operation(MODEL_NAME, operation)?;
        self.log.lock().push(command.into());
        Ok(())
    }
}

impl Default for MockLaser {
    fn default() -> Self {
        Self::new()
    }
}

fn status(on: bool) -> FeatureStatus {
    if on {
        FeatureStatus::On
    } else {
        FeatureStatus::Off
    }
}

#[async_trait]
impl LaserDevice for MockLaser {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    async fn identify(&self) -> Result<String> {
        self.record("identify", "serial")?;
        Ok("SN: iBEAM-MOCK-000".to_string())
    }

    fn power_range(&self) -> (f64, f64) {
        (0.0, self.max_power_mw)
    }

    async fn power(&self) -> Result<f64> {
        self.record("power", "sh pow")?;
        let sim = self.sim.lock();
        if !sim.emitting {
            return Ok(0.0);
        }
        let total: f64 = sim.channel_power_mw.iter().sum();
        Ok(self.rng.jitter(total, self.noise_fraction))
    }

    async fn power_setpoint(&self) -> Result<Reading<f64>> {
        self.record("power_setpoint", "sh pow")?;
        Ok(Reading::Value(self.sim.lock().channel_power_mw.iter().sum()))
    }

    async fn set_channel_power(&self, channel: LaserChannel, power_mw: f64) -> Result<()> {
        let (min, max) = self.power_range();
        if !(min..=max).contains(&power_mw) {
            return Err(anyhow!(
                "Power {} mW outside {}-{} mW",
                power_mw,
                min,
                max
            ));
        }
        self.record(
            "set_channel_power",
            format!("ch {} power {}", channel.number(), power_mw),
        )?;
        self.sim.lock().channel_power_mw[usize::from(channel.number() - 1)] = power_mw;
        Ok(())
    }

    async fn channel_info(&self) -> Result<String> {
        self.record("channel_info", "sh ch")?;
        let sim = self.sim.lock();
        Ok(format!(
            "CH1, PWR: {:.3} mW\nCH2, PWR: {:.3} mW",
            sim.channel_power_mw[0], sim.channel_power_mw[1]
        ))
    }

    async fn current(&self) -> Result<Reading<f64>> {
        self.record("current", "sh cur")?;
        let on = self.sim.lock().emitting;
        Ok(Reading::Value(if on { 85.0 } else { 0.0 }))
    }

    async fn current_setpoint(&self) -> Result<Reading<f64>> {
        if !self.current_control {
            return Ok(soft_unsupported(MODEL_NAME, "Getting the current setpoint"));
        }
        self.record("current_setpoint", "sh cur set")?;
        Ok(Reading::Value(self.sim.lock().current_percent))
    }

    async fn set_current(&self, current_percent: f64) -> Result<Reading<f64>> {
        if !self.current_control {
            return Ok(soft_unsupported(MODEL_NAME, "Setting the current"));
        }
        if !(0.0..=100.0).contains(&current_percent) {
            return Err(anyhow!("Current {} % outside 0-100 %", current_percent));
        }
        self.record("set_current", format!("cur {}", current_percent))?;
        self.sim.lock().current_percent = current_percent;
        Ok(Reading::Value(current_percent))
    }

    fn allowed_control_modes(&self) -> Vec<ControlMode> {
        if self.current_control {
            vec![ControlMode::Power, ControlMode::Current]
        } else {
            vec![ControlMode::Power]
        }
    }

    async fn control_mode(&self) -> Result<ControlMode> {
        Ok(self.sim.lock().control_mode)
    }

    async fn set_control_mode(&self, mode: ControlMode) -> Result<ControlMode> {
        if !self.allowed_control_modes().contains(&mode) {
            return Err(anyhow!("Control mode {:?} is not available", mode));
        }
        let word = match mode {
            ControlMode::Power => "pow",
            ControlMode::Current => "cur",
            ControlMode::Mixed => "mix",
        };
        self.record("set_control_mode", format!("mode {}", word))?;
        self.sim.lock().control_mode = mode;
        Ok(mode)
    }

    async fn shutter_state(&self) -> Result<ShutterState> {
        let state = self.sim.lock().shutter;
        if state == ShutterState::NoShutter {
            soft_unsupported::<()>(MODEL_NAME, "Getting the shutter state");
        }
        Ok(state)
    }

    async fn set_shutter_state(&self, state: ShutterState) -> Result<ShutterState> {
        if self.sim.lock().shutter == ShutterState::NoShutter {
            soft_unsupported::<()>(MODEL_NAME, "Setting the shutter state");
            return Ok(ShutterState::NoShutter);
        }
        let word = match state {
            ShutterState::Open => "open",
            ShutterState::Closed => "close",
            other => return Err(anyhow!("Shutter state {:?} cannot be requested", other)),
        };
        self.record("set_shutter_state", format!("shutter {}", word))?;
        self.sim.lock().shutter = state;
        Ok(state)
    }

    async fn temperatures(&self) -> Result<Temperatures> {
        self.record("temperatures", "sh temp sys")?;
        self.log.lock().push("sh temp".to_string());
        let jitter = self.noise_fraction / 10.0;
        Ok(Temperatures::from([
            ("Base Plate".to_string(), self.rng.jitter(25.0, jitter)),
            ("Diode".to_string(), self.rng.jitter(24.5, jitter)),
        ]))
    }

    async fn laser_state(&self) -> Result<LaserState> {
        self.record("laser_state", "sta la")?;
        Ok(if self.sim.lock().emitting {
            LaserState::On
        } else {
            LaserState::Off
        })
    }

    async fn set_laser_state(&self, state: LaserState) -> Result<LaserState> {
        let on = match state {
            LaserState::On => true,
            LaserState::Off => false,
            other => {
                tracing::warn!("Laser state {} cannot be requested, keeping current state", other);
                return self.laser_state().await;
            }
        };
        self.record("set_laser_state", if on { "la on" } else { "la off" })?;
        self.sim.lock().emitting = on;
        self.laser_state().await
    }

    async fn set_autopulse(&self, enabled: bool) -> Result<()> {
        self.record("set_autopulse", if enabled { "puls on" } else { "puls off" })?;
        self.sim.lock().autopulse = enabled;
        Ok(())
    }

    async fn autopulse_status(&self) -> Result<FeatureStatus> {
        self.record("autopulse_status", "sta puls")?;
        Ok(status(self.sim.lock().autopulse))
    }

    async fn set_autopulse_frequency(&self, frequency_khz: f64) -> Result<()> {
        self.record(
            "set_autopulse_frequency",
            format!("puls freq {}", frequency_khz * 1e3),
        )
    }

    async fn set_autopulse_duty(&self, duty: f64) -> Result<()> {
        self.record("set_autopulse_duty", format!("puls duty {}", duty))
    }

    async fn set_autopulse_period(&self, period_us: f64) -> Result<()> {
        self.record(
            "set_autopulse_period",
            format!("puls period {}", period_us / 1e6),
        )
    }

    async fn set_autopulse_width(&self, width_us: f64) -> Result<()> {
        self.record("set_autopulse_width", format!("puls width {}", width_us / 1e6))
    }

    async fn set_fine(&self, enabled: bool) -> Result<()> {
        self.record("set_fine", if enabled { "fine on" } else { "fine off" })?;
        self.sim.lock().fine = enabled;
        Ok(())
    }

    async fn set_fine_a(&self, value: f64) -> Result<()> {
        self.record("set_fine_a", format!("fine a {}", value))?;
        self.sim.lock().fine_a = value;
        Ok(())
    }

    async fn set_fine_b(&self, value: f64) -> Result<()> {
        self.record("set_fine_b", format!("fine b {}", value))?;
        self.sim.lock().fine_b = value;
        Ok(())
    }

    async fn fine_status(&self) -> Result<FeatureStatus> {
        self.record("fine_status", "sta fine")?;
        Ok(status(self.sim.lock().fine))
    }

    async fn set_skill(&self, enabled: bool) -> Result<()> {
        self.record("set_skill", if enabled { "skill on" } else { "skill off" })?;
        self.sim.lock().skill = enabled;
        Ok(())
    }

    async fn extra_info(&self) -> Result<String> {
        self.record("extra_info", "serial")?;
        Ok("Serial number: SN: iBEAM-MOCK-000\n\
            Firmware Version: mock\n\
            System UP Time: 0 s\n"
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;

    fn quiet() -> MockLaser {
        MockLaser::with_config(MockLaserConfig {
            noise_fraction: 0.0,
            ..MockLaserConfig::default()
        })
    }

    #[tokio::test]
    async fn power_is_zero_until_emission() -> Result<()> {
        let laser = quiet();
        assert_eq!(laser.power().await?, 0.0);

        assert_eq!(laser.on().await?, LaserState::On);
        assert_eq!(laser.power().await?, 10.0);
        Ok(())
    }

    #[tokio::test]
    async fn noisy_power_stays_near_setpoint() -> Result<()> {
        let laser = MockLaser::with_config(MockLaserConfig {
            noise_fraction: 0.01,
            seed: Some(5),
            ..MockLaserConfig::default()
        });
        laser.on().await?;
        for _ in 0..50 {
            let p = laser.power().await?;
            assert!((9.9..=10.1).contains(&p), "{p}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn commands_are_logged_in_device_words() -> Result<()> {
        let laser = quiet();
        laser.set_channel_power(LaserChannel::Two, 5.0).await?;
        laser.set_autopulse(true).await?;
        laser.set_fine_a(30.0).await?;
        laser.off().await?;
        assert_eq!(
            laser.commands(),
            vec!["ch 2 power 5", "puls on", "fine a 30", "la off", "sta la"]
        );
        assert_eq!(laser.fine_parameters(), (30.0, 0.0));
        Ok(())
    }

    #[tokio::test]
    async fn channel_power_is_range_checked() {
        let laser = quiet();
        assert!(laser
            .set_channel_power(LaserChannel::One, 151.0)
            .await
            .is_err());
        assert!(laser.commands().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_leaves_state_unchanged() -> Result<()> {
        let laser = quiet().with_errors(ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "set_fine",
            count: 1,
        }));
        laser.set_fine(true).await?;
        assert!(laser.set_fine(false).await.is_err());
        assert_eq!(laser.fine_status().await?, FeatureStatus::On);
        Ok(())
    }

    #[tokio::test]
    async fn locked_state_request_reports_current_state() -> Result<()> {
        let laser = quiet();
        assert_eq!(laser.set_laser_state(LaserState::Locked).await?, LaserState::Off);
        assert_eq!(laser.commands(), vec!["sta la"]);
        Ok(())
    }

    #[tokio::test]
    async fn current_control_is_opt_in() -> Result<()> {
        let plain = quiet();
        assert_eq!(plain.set_current(40.0).await?, Reading::NotAvailable);
        assert!(plain.set_control_mode(ControlMode::Current).await.is_err());
        assert!(plain.commands().is_empty());

        let laser = MockLaser::with_config(MockLaserConfig {
            current_control: true,
            shutter: true,
            ..MockLaserConfig::default()
        });
        assert_eq!(laser.set_control_mode(ControlMode::Current).await?, ControlMode::Current);
        assert_eq!(laser.set_current(40.0).await?, Reading::Value(40.0));
        assert!(laser.set_current(140.0).await.is_err());
        assert_eq!(laser.shutter_state().await?, ShutterState::Closed);
        assert_eq!(
            laser.set_shutter_state(ShutterState::Open).await?,
            ShutterState::Open
        );
        assert_eq!(laser.commands(), vec!["mode cur", "cur 40", "shutter open"]);
        Ok(())
    }

    #[tokio::test]
    async fn factory_rejects_malformed_config() {
        let bad = toml::Value::Table(toml::toml! { max_power_mw = "high" });
        let err = match MockLaserFactory.build(bad).await {
            Ok(_) => panic!("a malformed table must not build"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("Invalid mock laser config"));

        let ok = toml::Value::Table(toml::toml! { model = "mock" });
        assert!(MockLaserFactory.build(ok).await.is_ok());
    }

    #[test]
    fn factory_validates_power() {
        let bad = toml::Value::Table(toml::toml! { max_power_mw = -1.0 });
        assert!(MockLaserFactory.validate(&bad).is_err());

        let ok = toml::Value::Table(toml::toml! { model = "mock" });
        assert!(MockLaserFactory.validate(&ok).is_ok());
    }
}
