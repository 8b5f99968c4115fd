//! The laser poll loop.
//!
//! A single task owns every conversation with the device. It alternates between
//! two kinds of work and never runs them concurrently:
//!
//! - poll passes, scheduled one interval after the previous pass finished;
//! - queued [`LaserCommand`]s, answered through a oneshot reply.
//!
//! ```text
//!            start()                 stop()
//!   Idle ───────────────> Running ───────────> StopRequested
//!    ^                                               │
//!    └──────────── acknowledged by the task ─────────┘
//! ```
//!
//! The stop flag is checked before and after each pass. A pass already talking to
//! the device finishes first, so [`LaserLogic::stop`] waits at most
//! `stop_attempts × query_interval` and then returns regardless.

use crate::buffers::{SampleBuffers, POWER, TIME};
use crate::messages::{LaserCommand, LaserSnapshot, LogicEvent, PollOutcome, QueuedCommand};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use daq_core::capabilities::{LaserDevice, Temperatures};
use daq_core::error::DaqError;
use daq_core::states::{
    AdvancedFeature, ChannelSelect, FeatureStatus, LaserChannel, LaserState, ShutterState,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// =============================================================================
// Settings
// =============================================================================

/// Poll loop configuration (`[logic]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicSettings {
    /// Delay between poll passes in ms
    #[serde(default = "default_query_interval")]
    pub query_interval: u64,
    /// Samples kept per series
    #[serde(default = "default_buffer_length")]
    pub buffer_length: usize,
    /// Delay after a failed pass in ms
    #[serde(default = "default_fallback_interval")]
    pub fallback_interval: u64,
    /// Stop waits at most this many query intervals for the loop to acknowledge
    #[serde(default = "default_stop_attempts")]
    pub stop_attempts: u32,
    /// Channels that accept power setpoints
    #[serde(default = "default_channels")]
    pub channels: ChannelSelect,
}

fn default_query_interval() -> u64 {
    100
}

fn default_buffer_length() -> usize {
    100
}

fn default_fallback_interval() -> u64 {
    3000
}

fn default_stop_attempts() -> u32 {
    10
}

fn default_channels() -> ChannelSelect {
    ChannelSelect::Channel1
}

impl Default for LogicSettings {
    fn default() -> Self {
        Self {
            query_interval: default_query_interval(),
            buffer_length: default_buffer_length(),
            fallback_interval: default_fallback_interval(),
            stop_attempts: default_stop_attempts(),
            channels: default_channels(),
        }
    }
}

impl LogicSettings {
    /// Reject zero intervals, lengths and attempts.
    pub fn validate(&self) -> Result<(), DaqError> {
        let checks = [
            (self.query_interval == 0, "query_interval must be at least 1 ms"),
            (self.fallback_interval == 0, "fallback_interval must be at least 1 ms"),
            (self.buffer_length == 0, "buffer_length must be at least 1"),
            (self.stop_attempts == 0, "stop_attempts must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(DaqError::Configuration((*msg).to_string())),
            None => Ok(()),
        }
    }

    /// Delay between successful passes.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.query_interval)
    }

    /// Delay after a failed pass.
    pub fn fallback(&self) -> Duration {
        Duration::from_millis(self.fallback_interval)
    }

    /// Upper bound on [`LaserLogic::stop`].
    pub fn stop_timeout(&self) -> Duration {
        self.interval() * self.stop_attempts
    }
}

/// Poll loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollState {
    /// No passes scheduled
    Idle,
    /// Passes scheduled every interval
    Running,
    /// Stop requested, not yet acknowledged by the task
    StopRequested,
}

// =============================================================================
// LaserLogic - caller handle
// =============================================================================

/// Handle to a running poll task.
///
/// Dropping the handle ends the task once it finishes its current step; use
/// [`LaserLogic::shutdown`] to wait for it.
pub struct LaserLogic {
    settings: LogicSettings,
    history: Arc<RwLock<SampleBuffers>>,
    snapshot: Arc<RwLock<LaserSnapshot>>,
    events: broadcast::Sender<LogicEvent>,
    commands: mpsc::Sender<QueuedCommand>,
    state: Arc<watch::Sender<PollState>>,
    task: JoinHandle<()>,
}

impl LaserLogic {
    /// Read the laser's initial state, allocate the buffers and start polling.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn activate(device: Arc<dyn LaserDevice>, settings: LogicSettings) -> Result<Self> {
        settings.validate()?;
        let snapshot = gather_snapshot(device.as_ref(), settings.channels)
            .await
            .context("Failed to read the initial laser state")?;

        let history = SampleBuffers::new(
            settings.buffer_length,
            unix_seconds(snapshot.updated_at),
            snapshot.temperatures.keys().map(String::as_str),
        );
        let history = Arc::new(RwLock::new(history));
        let snapshot = Arc::new(RwLock::new(snapshot));
        let (events, _) = broadcast::channel(64);
        let (commands, commands_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);
        let state = Arc::new(state_tx);

        let core = PollCore {
            device: device.clone(),
            settings: settings.clone(),
            history: history.clone(),
            snapshot: snapshot.clone(),
            events: events.clone(),
            commands: commands_rx,
            state: state.clone(),
            state_rx,
        };
        let task = tokio::spawn(core.run());

        tracing::info!(
            model = device.model_name(),
            interval_ms = settings.query_interval,
            "Laser logic activated"
        );
        let logic = Self {
            settings,
            history,
            snapshot,
            events,
            commands,
            state,
            task,
        };
        logic.start();
        Ok(logic)
    }

    /// Settings in effect.
    pub fn settings(&self) -> &LogicSettings {
        &self.settings
    }

    /// Subscribe to update notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LogicEvent> {
        self.events.subscribe()
    }

    /// Shared sample history.
    pub fn history(&self) -> Arc<RwLock<SampleBuffers>> {
        self.history.clone()
    }

    /// Last known laser state.
    pub fn snapshot(&self) -> LaserSnapshot {
        self.snapshot.read().clone()
    }

    /// Current loop state.
    pub fn poll_state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Schedule poll passes. Buffers collected so far are kept.
    pub fn start(&self) {
        let previous = self.state.send_replace(PollState::Running);
        if previous != PollState::Running {
            tracing::debug!("Laser poll loop started");
        }
    }

    /// Request a stop and wait a bounded time for the loop to acknowledge it.
    pub async fn stop(&self) {
        let mut rx = self.state.subscribe();
        if *rx.borrow_and_update() == PollState::Idle {
            return;
        }
        self.state.send_replace(PollState::StopRequested);

        let bound = self.settings.stop_timeout();
        match tokio::time::timeout(bound, rx.wait_for(|s| *s != PollState::StopRequested)).await
        {
            Ok(Ok(_)) => tracing::debug!("Laser poll loop stopped"),
            Ok(Err(_)) => tracing::warn!("Laser poll task has exited"),
            Err(_) => tracing::warn!(
                "Laser poll loop did not acknowledge stop within {:?}",
                bound
            ),
        };
    }

    /// Queue a command and wait for its result.
    pub async fn send(&self, command: LaserCommand) -> Result<()> {
        let (respond, reply) = oneshot::channel();
        self.commands
            .send(QueuedCommand { command, respond })
            .await
            .map_err(|_| anyhow!("laser poll task has exited"))?;
        reply
            .await
            .map_err(|_| anyhow!("laser poll task dropped command {:?}", command))?
    }

    /// Switch emission on or off.
    pub async fn set_laser_state(&self, on: bool) -> Result<()> {
        self.send(LaserCommand::SetLaserState(on)).await
    }

    /// Select the channels that accept power setpoints.
    pub async fn set_channels(&self, channels: ChannelSelect) -> Result<()> {
        self.send(LaserCommand::SetChannels(channels)).await
    }

    /// Set the power of one channel in mW.
    pub async fn set_channel_power(&self, channel: LaserChannel, power_mw: f64) -> Result<()> {
        self.send(LaserCommand::SetChannelPower { channel, power_mw })
            .await
    }

    /// Stop polling, end the task and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        self.stop().await;
        let bound = self.settings.stop_timeout();
        let Self { commands, task, .. } = self;
        drop(commands);
        match tokio::time::timeout(bound, task).await {
            Ok(joined) => joined.context("laser poll task panicked"),
            Err(_) => Err(anyhow!("laser poll task did not exit within {:?}", bound)),
        }
    }
}

// =============================================================================
// PollCore - the task
// =============================================================================

struct PollSample {
    state: LaserState,
    power_mw: f64,
    temperatures: Temperatures,
    autopulse: FeatureStatus,
    fine: FeatureStatus,
}

struct PollCore {
    device: Arc<dyn LaserDevice>,
    settings: LogicSettings,
    history: Arc<RwLock<SampleBuffers>>,
    snapshot: Arc<RwLock<LaserSnapshot>>,
    events: broadcast::Sender<LogicEvent>,
    commands: mpsc::Receiver<QueuedCommand>,
    state: Arc<watch::Sender<PollState>>,
    state_rx: watch::Receiver<PollState>,
}

impl PollCore {
    async fn run(mut self) {
        let mut deadline: Option<Instant> = None;

        loop {
            let armed = deadline.is_some();
            let wake = deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *self.state_rx.borrow_and_update();
                    match current {
                        PollState::Running => {
                            if deadline.is_none() {
                                deadline = Some(Instant::now() + self.settings.interval());
                            }
                        }
                        PollState::StopRequested => {
                            deadline = None;
                            self.acknowledge_stop();
                        }
                        PollState::Idle => deadline = None,
                    }
                }

                queued = self.commands.recv() => {
                    let Some(queued) = queued else {
                        break;
                    };
                    self.apply(queued).await;
                }

                () = tokio::time::sleep_until(wake), if armed => {
                    if self.stop_requested() {
                        deadline = None;
                        self.acknowledge_stop();
                        continue;
                    }

                    let outcome = self.poll_pass().await;
                    self.publish(Some(outcome));

                    if self.stop_requested() {
                        deadline = None;
                        self.acknowledge_stop();
                    } else {
                        deadline = Some(Instant::now() + outcome.next_interval);
                    }
                }
            }
        }

        tracing::debug!("Laser poll task finished");
    }

    fn stop_requested(&self) -> bool {
        *self.state_rx.borrow() == PollState::StopRequested
    }

    fn acknowledge_stop(&self) {
        self.state.send_if_modified(|s| {
            if *s == PollState::StopRequested {
                *s = PollState::Idle;
                true
            } else {
                false
            }
        });
        tracing::info!("Laser poll loop stopped");
        let _ = self.events.send(LogicEvent::Stopped);
    }

    fn publish(&self, poll: Option<PollOutcome>) {
        let snapshot = Box::new(self.snapshot.read().clone());
        // No subscribers is fine.
        let _ = self.events.send(LogicEvent::Updated { snapshot, poll });
    }

    async fn query(&self) -> Result<PollSample> {
        Ok(PollSample {
            state: self.device.laser_state().await?,
            power_mw: self.device.power().await?,
            temperatures: self.device.temperatures().await?,
            autopulse: self.device.autopulse_status().await?,
            fine: self.device.fine_status().await?,
        })
    }

    /// One pass: query, then shift the buffers. A failure leaves the buffers alone.
    async fn poll_pass(&self) -> PollOutcome {
        match self.query().await {
            Ok(sample) => {
                let now = Utc::now();
                {
                    let mut history = self.history.write();
                    let values = [(TIME, unix_seconds(now)), (POWER, sample.power_mw)]
                        .into_iter()
                        .chain(sample.temperatures.iter().map(|(k, v)| (k.as_str(), *v)));
                    history.push(values);
                }
                let mut snapshot = self.snapshot.write();
                snapshot.state = sample.state;
                snapshot.can_turn_on = sample.state.can_turn_on();
                snapshot.power_mw = sample.power_mw;
                snapshot.temperatures = sample.temperatures;
                snapshot.autopulse = sample.autopulse;
                snapshot.fine = sample.fine;
                snapshot.updated_at = now;
                PollOutcome {
                    ok: true,
                    next_interval: self.settings.interval(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Exception in laser status loop, throttling refresh rate: {:#}",
                    e
                );
                PollOutcome {
                    ok: false,
                    next_interval: self.settings.fallback(),
                }
            }
        }
    }

    async fn apply(&self, queued: QueuedCommand) {
        let QueuedCommand { command, respond } = queued;
        let result = self.execute(command).await;
        if let Err(e) = &result {
            tracing::warn!("Laser command {:?} failed: {:#}", command, e);
        }
        let _ = respond.send(result);
        self.publish(None);
    }

    async fn execute(&self, command: LaserCommand) -> Result<()> {
        let device = self.device.as_ref();
        match command {
            LaserCommand::SetLaserState(on) => {
                let cached = self.snapshot.read().state;
                let reported = match (on, cached) {
                    (true, LaserState::Off) => device.on().await?,
                    (false, LaserState::On) => device.off().await?,
                    _ => {
                        tracing::debug!("Laser already {}, nothing to do", cached);
                        return Ok(());
                    }
                };
                let mut snapshot = self.snapshot.write();
                snapshot.state = reported;
                snapshot.can_turn_on = reported.can_turn_on();
            }
            LaserCommand::SetChannels(channels) => {
                self.snapshot.write().channels = channels;
            }
            LaserCommand::SetChannelPower { channel, power_mw } => {
                let selected = self.snapshot.read().channels;
                if selected.includes(channel) {
                    device.set_channel_power(channel, power_mw).await?;
                } else {
                    tracing::warn!(
                        "Channel {} is not selected, ignoring power setpoint {} mW",
                        channel.number(),
                        power_mw
                    );
                }
            }
            LaserCommand::SetAutopulse(enabled) => device.set_autopulse(enabled).await?,
            LaserCommand::SetAutopulseFrequency(khz) => device.set_autopulse_frequency(khz).await?,
            LaserCommand::SetAutopulseDuty(duty) => device.set_autopulse_duty(duty).await?,
            LaserCommand::SetAutopulsePeriod(us) => device.set_autopulse_period(us).await?,
            LaserCommand::SetAutopulseWidth(us) => device.set_autopulse_width(us).await?,
            LaserCommand::SetAdvancedFeature(feature) => match feature {
                AdvancedFeature::Fine => device.set_fine(true).await?,
                AdvancedFeature::Skill1 => device.set_skill(true).await?,
                AdvancedFeature::NoFeature => {
                    device.set_fine(false).await?;
                    device.set_skill(false).await?;
                }
            },
            LaserCommand::SetFineA(value) => device.set_fine_a(value).await?,
            LaserCommand::SetFineB(value) => device.set_fine_b(value).await?,
            LaserCommand::SetControlMode(mode) => {
                if device.allowed_control_modes().contains(&mode) {
                    let in_effect = device.set_control_mode(mode).await?;
                    tracing::info!("Changed control mode to {:?}", in_effect);
                } else {
                    tracing::warn!(
                        "Control mode {:?} is not supported by the {}",
                        mode,
                        device.model_name()
                    );
                }
            }
            LaserCommand::SetCurrent(percent) => {
                device.set_current(percent).await?;
            }
            LaserCommand::SetShutter(open) => {
                let requested = if open {
                    ShutterState::Open
                } else {
                    ShutterState::Closed
                };
                device.set_shutter_state(requested).await?;
            }
        }
        Ok(())
    }
}

/// Everything the logic shows about a laser at activation.
async fn gather_snapshot(device: &dyn LaserDevice, channels: ChannelSelect) -> Result<LaserSnapshot> {
    let state = device.laser_state().await?;
    let power_range = device.power_range();
    let power_setpoint = device.power_setpoint().await?;
    let temperatures = device.temperatures().await?;
    let power_mw = device.power().await?;
    let channel_info = device.channel_info().await?;
    let autopulse = device.autopulse_status().await?;
    let fine = device.fine_status().await?;
    let extra_info = device.extra_info().await?;
    let has_shutter = device.shutter_state().await? != ShutterState::NoShutter;

    Ok(LaserSnapshot {
        state,
        can_turn_on: state.can_turn_on(),
        power_range,
        power_setpoint,
        power_mw,
        temperatures,
        channel_info,
        autopulse,
        fine,
        extra_info,
        has_shutter,
        channels,
        updated_at: Utc::now(),
    })
}

fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1e6
}
