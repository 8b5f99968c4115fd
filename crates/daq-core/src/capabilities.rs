//! Capability traits implemented by instrument drivers.
//!
//! Each device model is a distinct type implementing one of these traits. The
//! logic layer holds an `Arc<dyn LaserDevice>` chosen at construction time and never
//! branches on model names.
//!
//! # Soft-unsupported operations
//!
//! Operations a model cannot perform do not fail. They log a warning naming the
//! model and return [`Reading::NotAvailable`] (or [`ShutterState::NoShutter`]). The
//! default trait methods implement exactly that, so a driver only overrides what
//! its hardware supports.
//!
//! # Thread Safety
//!
//! All traits require `Send + Sync`; drivers serialize access to their connection
//! internally.

use crate::response::Reading;
use crate::states::{
    ControlMode, FeatureStatus, LaserChannel, LaserState, MicrowaveMode, ShutterState,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Temperature readings by sensor name, in °C.
pub type Temperatures = BTreeMap<String, f64>;

/// Log a soft-unsupported operation and return the not-available marker.
pub fn soft_unsupported<T>(model: &str, operation: &str) -> Reading<T> {
    tracing::warn!(model, "{} is not supported by the {}", operation, model);
    Reading::NotAvailable
}

// =============================================================================
// Laser
// =============================================================================

/// Diode laser control.
///
/// Power values are milliwatts unless stated otherwise.
#[async_trait]
pub trait LaserDevice: Send + Sync {
    /// Model name used in diagnostics.
    fn model_name(&self) -> &str;

    /// Identity string reported by the device.
    async fn identify(&self) -> Result<String>;

    /// Settable output power range (min, max) in mW.
    fn power_range(&self) -> (f64, f64);

    /// Measured output power in mW.
    async fn power(&self) -> Result<f64>;

    /// Output power setpoint in mW.
    async fn power_setpoint(&self) -> Result<Reading<f64>> {
        Ok(soft_unsupported(self.model_name(), "Getting the power setpoint"))
    }

    /// Set the power of one output channel.
    async fn set_channel_power(&self, channel: LaserChannel, power_mw: f64) -> Result<()>;

    /// Free-form channel information.
    async fn channel_info(&self) -> Result<String>;

    /// Diode current.
    async fn current(&self) -> Result<Reading<f64>>;

    /// Unit of [`LaserDevice::current`].
    async fn current_unit(&self) -> Result<Reading<String>> {
        Ok(soft_unsupported(self.model_name(), "Getting the current unit"))
    }

    /// Settable current range.
    async fn current_range(&self) -> Result<Reading<(f64, f64)>> {
        Ok(soft_unsupported(self.model_name(), "Getting the current range"))
    }

    /// Current setpoint.
    async fn current_setpoint(&self) -> Result<Reading<f64>> {
        Ok(soft_unsupported(self.model_name(), "Getting the current setpoint"))
    }

    /// Set the current setpoint (percent of maximum).
    async fn set_current(&self, _current_percent: f64) -> Result<Reading<f64>> {
        Ok(soft_unsupported(self.model_name(), "Setting the current"))
    }

    /// Control modes the model accepts.
    fn allowed_control_modes(&self) -> Vec<ControlMode> {
        vec![ControlMode::Power]
    }

    /// Active control mode.
    async fn control_mode(&self) -> Result<ControlMode> {
        Ok(ControlMode::Power)
    }

    /// Request a control mode; returns the mode actually in effect.
    async fn set_control_mode(&self, _mode: ControlMode) -> Result<ControlMode> {
        self.control_mode().await
    }

    /// Shutter state.
    async fn shutter_state(&self) -> Result<ShutterState> {
        soft_unsupported::<()>(self.model_name(), "Getting the shutter state");
        Ok(ShutterState::NoShutter)
    }

    /// Request a shutter state; returns the state actually in effect.
    async fn set_shutter_state(&self, _state: ShutterState) -> Result<ShutterState> {
        soft_unsupported::<()>(self.model_name(), "Setting the shutter state");
        Ok(ShutterState::NoShutter)
    }

    /// All temperature sensors.
    async fn temperatures(&self) -> Result<Temperatures>;

    /// Set temperature setpoints on tunable models.
    async fn set_temperatures(&self, _temps: Temperatures) -> Result<Reading<Temperatures>> {
        Ok(soft_unsupported(self.model_name(), "Setting the temperatures"))
    }

    /// Temperature setpoints.
    async fn temperature_setpoints(&self) -> Result<Reading<Temperatures>> {
        Ok(soft_unsupported(self.model_name(), "Getting the temperature setpoints"))
    }

    /// Emission state as reported by the device.
    async fn laser_state(&self) -> Result<LaserState>;

    /// Switch emission and return the re-queried state.
    async fn set_laser_state(&self, state: LaserState) -> Result<LaserState>;

    /// Switch emission on.
    async fn on(&self) -> Result<LaserState> {
        self.set_laser_state(LaserState::On).await
    }

    /// Switch emission off.
    async fn off(&self) -> Result<LaserState> {
        self.set_laser_state(LaserState::Off).await
    }

    /// Enable or disable autopulse.
    async fn set_autopulse(&self, enabled: bool) -> Result<()>;

    /// Autopulse status.
    async fn autopulse_status(&self) -> Result<FeatureStatus>;

    /// Autopulse frequency, in kHz.
    async fn set_autopulse_frequency(&self, frequency_khz: f64) -> Result<()>;

    /// Autopulse duty cycle, passed through unchanged.
    async fn set_autopulse_duty(&self, duty: f64) -> Result<()>;

    /// Autopulse period, in microseconds.
    async fn set_autopulse_period(&self, period_us: f64) -> Result<()>;

    /// Autopulse pulse width, in microseconds.
    async fn set_autopulse_width(&self, width_us: f64) -> Result<()>;

    /// Enable or disable FINE.
    async fn set_fine(&self, enabled: bool) -> Result<()>;

    /// FINE parameter A.
    async fn set_fine_a(&self, value: f64) -> Result<()>;

    /// FINE parameter B.
    async fn set_fine_b(&self, value: f64) -> Result<()>;

    /// FINE status.
    async fn fine_status(&self) -> Result<FeatureStatus>;

    /// Enable or disable SKILL.
    async fn set_skill(&self, enabled: bool) -> Result<()>;

    /// Multi-line description (serial number, firmware, uptime).
    async fn extra_info(&self) -> Result<String>;
}

// =============================================================================
// Microwave
// =============================================================================

/// Output limits of a microwave source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MicrowaveLimits {
    /// Lowest output power in dBm
    pub power_min_dbm: f64,
    /// Highest output power in dBm
    pub power_max_dbm: f64,
    /// Lowest frequency in Hz
    pub frequency_min_hz: f64,
    /// Highest frequency in Hz
    pub frequency_max_hz: f64,
}

impl MicrowaveLimits {
    /// True if both values are inside the limits.
    pub fn contains(&self, frequency_hz: f64, power_dbm: f64) -> bool {
        (self.frequency_min_hz..=self.frequency_max_hz).contains(&frequency_hz)
            && (self.power_min_dbm..=self.power_max_dbm).contains(&power_dbm)
    }
}

/// Values in effect after [`MicrowaveSource::set_cw`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CwSettings {
    /// Frequency in Hz, if one was set
    pub frequency_hz: Option<f64>,
    /// Power in dBm, if one was set
    pub power_dbm: Option<f64>,
    /// Mode in effect
    pub mode: MicrowaveMode,
}

/// Frequency sweep definition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// First frequency in Hz
    pub start_hz: f64,
    /// Last frequency in Hz (inclusive)
    pub stop_hz: f64,
    /// Step in Hz
    pub step_hz: f64,
    /// Output power in dBm
    pub power_dbm: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            start_hz: 2.7e9,
            stop_hz: 3.0e9,
            step_hz: 1.0e6,
            power_dbm: -10.0,
        }
    }
}

/// Most points a sweep may hold.
pub const MAX_SWEEP_POINTS: usize = 100_000;

impl SweepSettings {
    /// Number of sweep points, or `None` for an invalid definition.
    ///
    /// Invalid means a non-finite value, a step that is not positive, stop below
    /// start, or more than [`MAX_SWEEP_POINTS`] points.
    pub fn point_count(&self) -> Option<usize> {
        let finite = [self.start_hz, self.stop_hz, self.step_hz, self.power_dbm]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.step_hz <= 0.0 || self.stop_hz < self.start_hz {
            return None;
        }
        let steps = ((self.stop_hz - self.start_hz) / self.step_hz + 1e-9).floor();
        if !steps.is_finite() || steps >= MAX_SWEEP_POINTS as f64 {
            return None;
        }
        (steps as usize).checked_add(1)
    }

    /// Frequencies from start to stop (inclusive) in `step_hz` increments.
    ///
    /// Empty when [`SweepSettings::point_count`] rejects the definition.
    pub fn frequencies(&self) -> Vec<f64> {
        let Some(count) = self.point_count() else {
            return Vec::new();
        };
        (0..count)
            .map(|i| self.start_hz + i as f64 * self.step_hz)
            .collect()
    }
}

/// External trigger edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEdge {
    /// Rising edge
    Rising,
    /// Falling edge
    Falling,
}

/// Microwave signal generator control.
#[async_trait]
pub trait MicrowaveSource: Send + Sync {
    /// Model name used in diagnostics.
    fn model_name(&self) -> &str;

    /// Switch on CW output. Returns after the device reports the output active.
    async fn cw_on(&self) -> Result<()>;

    /// Switch off any output.
    async fn off(&self) -> Result<()>;

    /// Last mode used and whether the output is running.
    async fn status(&self) -> Result<(MicrowaveMode, bool)>;

    /// Output limits of the connected model.
    fn limits(&self) -> Reading<MicrowaveLimits>;

    /// Output power in dBm.
    async fn power(&self) -> Result<f64>;

    /// CW frequency in Hz.
    async fn frequency(&self) -> Result<f64>;

    /// Configure CW parameters.
    async fn set_cw(&self, frequency_hz: Option<f64>, power_dbm: Option<f64>)
        -> Result<CwSettings>;

    /// Switch on list mode.
    async fn list_on(&self) -> Result<()>;

    /// Load a frequency/power list.
    ///
    /// The slices must have equal length, or one of them must have length 1.
    async fn set_list(&self, frequencies_hz: &[f64], powers_dbm: &[f64]) -> Result<()>;

    /// Restart the list at its first entry.
    async fn reset_list_position(&self) -> Result<()>;

    /// Switch on sweep mode and step through the remaining sweep frequencies.
    async fn sweep_on(&self) -> Result<()>;

    /// Define a sweep.
    async fn set_sweep(&self, sweep: SweepSettings) -> Result<()>;

    /// Restart the sweep at its first frequency.
    async fn reset_sweep_position(&self) -> Result<()>;

    /// Output power in dBm.
    async fn set_power(&self, power_dbm: f64) -> Result<()>;

    /// CW frequency in Hz.
    async fn set_frequency(&self, frequency_hz: f64) -> Result<()>;

    /// Configure the external trigger.
    async fn set_ext_trigger(
        &self,
        _edge: TriggerEdge,
        _timing_s: f64,
    ) -> Result<Reading<(TriggerEdge, f64)>> {
        Ok(soft_unsupported(self.model_name(), "External triggering"))
    }

    /// Advance list or sweep by software trigger.
    async fn trigger(&self) -> Result<Reading<()>> {
        Ok(soft_unsupported(self.model_name(), "Software triggering"))
    }

    /// Reset the instrument to its defaults.
    async fn reset(&self) -> Result<()>;

    /// Send a raw command. Messages containing `?` are queries and return the reply.
    async fn send_raw(&self, message: &str) -> Result<Option<String>>;

    /// Switch the output off before the connection is released.
    async fn shutdown(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn soft_unsupported_warns_and_returns_not_available() {
        let reading: Reading<f64> = soft_unsupported("iBeamSmart", "Setting the current");
        assert_eq!(reading, Reading::NotAvailable);
        assert_eq!(reading.or_sentinel(), -1.0);
        assert!(logs_contain("Setting the current is not supported by the iBeamSmart"));
    }

    #[test]
    fn sweep_frequencies_include_stop() {
        let sweep = SweepSettings {
            start_hz: 1.0e9,
            stop_hz: 1.003e9,
            step_hz: 1.0e6,
            power_dbm: 0.0,
        };
        assert_eq!(sweep.frequencies(), vec![1.0e9, 1.001e9, 1.002e9, 1.003e9]);
    }

    #[test]
    fn default_sweep_has_301_points() {
        let freqs = SweepSettings::default().frequencies();
        assert_eq!(freqs.len(), 301);
        assert_eq!(freqs[0], 2.7e9);
    }

    #[test]
    fn invalid_sweep_is_empty() {
        let sweep = SweepSettings {
            step_hz: 0.0,
            ..SweepSettings::default()
        };
        assert!(sweep.frequencies().is_empty());

        let reversed = SweepSettings {
            start_hz: 3.0e9,
            stop_hz: 2.0e9,
            ..SweepSettings::default()
        };
        assert!(reversed.frequencies().is_empty());
    }

    #[test]
    fn unbounded_sweep_is_rejected() {
        let infinite = SweepSettings {
            start_hz: 1.0e9,
            stop_hz: f64::INFINITY,
            step_hz: 1.0e6,
            power_dbm: 0.0,
        };
        assert_eq!(infinite.point_count(), None);
        assert!(infinite.frequencies().is_empty());

        let huge = SweepSettings {
            stop_hz: 1.0e20,
            ..infinite
        };
        assert_eq!(huge.point_count(), None);

        let nan_step = SweepSettings {
            step_hz: f64::NAN,
            ..SweepSettings::default()
        };
        assert!(nan_step.frequencies().is_empty());
    }

    #[test]
    fn sweep_at_point_limit() {
        let sweep = SweepSettings {
            start_hz: 0.0,
            stop_hz: (MAX_SWEEP_POINTS - 1) as f64,
            step_hz: 1.0,
            power_dbm: 0.0,
        };
        assert_eq!(sweep.point_count(), Some(MAX_SWEEP_POINTS));
        let over = SweepSettings {
            stop_hz: MAX_SWEEP_POINTS as f64,
            ..sweep
        };
        assert_eq!(over.point_count(), None);
    }

    #[test]
    fn limits_contain() {
        let limits = MicrowaveLimits {
            power_min_dbm: -20.0,
            power_max_dbm: 15.0,
            frequency_min_hz: 1.0e3,
            frequency_max_hz: 6.0e9,
        };
        assert!(limits.contains(2.87e9, -10.0));
        assert!(!limits.contains(7.0e9, -10.0));
        assert!(!limits.contains(2.87e9, 20.0));
    }
}
