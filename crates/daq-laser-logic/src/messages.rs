//! Messages exchanged between the poll task and its callers.

use chrono::{DateTime, Utc};
use daq_core::capabilities::Temperatures;
use daq_core::response::Reading;
use daq_core::states::{
    AdvancedFeature, ChannelSelect, ControlMode, FeatureStatus, LaserChannel, LaserState,
};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::oneshot;

/// Last known state of the laser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaserSnapshot {
    /// Emission state
    pub state: LaserState,
    /// Whether the laser can be switched on from its current state
    pub can_turn_on: bool,
    /// Settable power range (min, max) in mW
    pub power_range: (f64, f64),
    /// Power setpoint in mW
    pub power_setpoint: Reading<f64>,
    /// Measured power in mW
    pub power_mw: f64,
    /// Temperature sensors in °C
    pub temperatures: Temperatures,
    /// Channel information as reported by the device
    pub channel_info: String,
    /// Autopulse status
    pub autopulse: FeatureStatus,
    /// FINE status
    pub fine: FeatureStatus,
    /// Serial number, firmware and uptime
    pub extra_info: String,
    /// Whether the model has a shutter
    pub has_shutter: bool,
    /// Channels that accept power setpoints
    pub channels: ChannelSelect,
    /// Time of the last successful refresh
    pub updated_at: DateTime<Utc>,
}

/// Result of one poll pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollOutcome {
    /// False when any query of the pass failed
    pub ok: bool,
    /// Delay until the next pass
    pub next_interval: Duration,
}

/// Notification published by the poll task.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogicEvent {
    /// State changed, either by a poll pass (`poll` is set) or by a command.
    Updated {
        /// Snapshot after the change
        snapshot: Box<LaserSnapshot>,
        /// Poll pass that produced the update, if any
        poll: Option<PollOutcome>,
    },
    /// The loop acknowledged a stop request.
    Stopped,
}

/// Operation queued on the poll task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaserCommand {
    /// Switch emission; skipped when the cached state already matches
    SetLaserState(bool),
    /// Select the channels that accept power setpoints
    SetChannels(ChannelSelect),
    /// Set the power of one channel in mW
    SetChannelPower {
        /// Target channel
        channel: LaserChannel,
        /// Power in mW
        power_mw: f64,
    },
    /// Enable or disable autopulse
    SetAutopulse(bool),
    /// Autopulse frequency in kHz
    SetAutopulseFrequency(f64),
    /// Autopulse duty cycle
    SetAutopulseDuty(f64),
    /// Autopulse period in µs
    SetAutopulsePeriod(f64),
    /// Autopulse width in µs
    SetAutopulseWidth(f64),
    /// Select FINE, SKILL or neither
    SetAdvancedFeature(AdvancedFeature),
    /// FINE parameter A
    SetFineA(f64),
    /// FINE parameter B
    SetFineB(f64),
    /// Control mode
    SetControlMode(ControlMode),
    /// Current setpoint in percent
    SetCurrent(f64),
    /// Open (true) or close the shutter
    SetShutter(bool),
}

/// A command and the channel its result is sent back on.
#[derive(Debug)]
pub(crate) struct QueuedCommand {
    pub(crate) command: LaserCommand,
    pub(crate) respond: oneshot::Sender<anyhow::Result<()>>,
}
