//! Command-line interface.
//!
//! ```bash
//! toptica-daq --mock monitor --duration-secs 5
//! toptica-daq laser on
//! toptica-daq power --channel 2 12.5
//! toptica-daq autopulse freq 10
//! toptica-daq microwave cw --frequency-hz 2.87e9 --power-dbm -10
//! ```

use crate::config::{Settings, DEFAULT_CONFIG_PATH};
use crate::presenter;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use daq_core::capabilities::{MicrowaveSource, SweepSettings};
use daq_core::states::{AdvancedFeature, ChannelSelect, LaserChannel};
use daq_laser_logic::{LaserCommand, LaserLogic, LogicEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Parsed command line.
#[derive(Debug, Parser)]
#[command(name = "toptica-daq")]
#[command(about = "Poll and control a Toptica iBeam Smart laser and an R&S SGS100A", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Override the configured log format (pretty, compact, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Use simulated devices instead of the configured hardware
    #[arg(long, global = true)]
    pub mock: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List serial ports known to the OS
    Ports,

    /// Poll the laser and print every update
    Monitor {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Print updates as JSON lines
        #[arg(long)]
        json: bool,

        /// History rows printed on exit
        #[arg(long, default_value_t = 10)]
        history_rows: usize,
    },

    /// Show serial number, firmware, power range and channel information
    Info,

    /// Switch laser emission
    Laser {
        /// on or off
        state: Switch,
    },

    /// Set the power of one channel in mW
    Power {
        /// Channel number
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
        channel: u8,

        /// Power in mW
        power_mw: f64,
    },

    /// Autopulse control
    #[command(subcommand)]
    Autopulse(AutopulseAction),

    /// Select FINE, SKILL or neither
    Feature {
        /// none, fine or skill
        feature: FeatureArg,
    },

    /// Set FINE parameter A
    FineA {
        /// Parameter value
        value: f64,
    },

    /// Set FINE parameter B
    FineB {
        /// Parameter value
        value: f64,
    },

    /// Microwave source control
    #[command(subcommand)]
    Microwave(MicrowaveAction),
}

/// On/off argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    /// Switch on
    On,
    /// Switch off
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        self == Switch::On
    }
}

/// Advanced feature argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeatureArg {
    /// Neither FINE nor SKILL
    None,
    /// FINE fine-tuning
    Fine,
    /// SKILL mode
    Skill,
}

impl From<FeatureArg> for AdvancedFeature {
    fn from(arg: FeatureArg) -> Self {
        match arg {
            FeatureArg::None => AdvancedFeature::NoFeature,
            FeatureArg::Fine => AdvancedFeature::Fine,
            FeatureArg::Skill => AdvancedFeature::Skill1,
        }
    }
}

/// `autopulse` subcommands.
#[derive(Debug, Subcommand)]
pub enum AutopulseAction {
    /// Enable autopulse
    On,
    /// Disable autopulse
    Off,
    /// Pulse frequency in kHz
    Freq {
        /// kHz
        khz: f64,
    },
    /// Duty cycle
    Duty {
        /// Duty cycle as sent to the device
        duty: f64,
    },
    /// Pulse period in µs
    Period {
        /// µs
        us: f64,
    },
    /// Pulse width in µs
    Width {
        /// µs
        us: f64,
    },
}

impl From<&AutopulseAction> for LaserCommand {
    fn from(action: &AutopulseAction) -> Self {
        match *action {
            AutopulseAction::On => LaserCommand::SetAutopulse(true),
            AutopulseAction::Off => LaserCommand::SetAutopulse(false),
            AutopulseAction::Freq { khz } => LaserCommand::SetAutopulseFrequency(khz),
            AutopulseAction::Duty { duty } => LaserCommand::SetAutopulseDuty(duty),
            AutopulseAction::Period { us } => LaserCommand::SetAutopulsePeriod(us),
            AutopulseAction::Width { us } => LaserCommand::SetAutopulseWidth(us),
        }
    }
}

/// `microwave` subcommands.
#[derive(Debug, Subcommand)]
pub enum MicrowaveAction {
    /// Mode, output state, frequency, power and limits
    Status,

    /// Configure and switch on CW output
    Cw {
        /// Frequency in Hz
        #[arg(long)]
        frequency_hz: Option<f64>,

        /// Power in dBm
        #[arg(long, allow_negative_numbers = true)]
        power_dbm: Option<f64>,
    },

    /// Switch the output off
    Off,

    /// Define a sweep and step through it
    Sweep {
        /// First frequency in Hz
        #[arg(long)]
        start_hz: f64,

        /// Last frequency in Hz
        #[arg(long)]
        stop_hz: f64,

        /// Step in Hz
        #[arg(long)]
        step_hz: f64,

        /// Power in dBm
        #[arg(long, allow_negative_numbers = true, default_value_t = -10.0)]
        power_dbm: f64,
    },

    /// Load a frequency/power list and switch on list mode
    List {
        /// Comma-separated frequencies in Hz
        #[arg(long, value_delimiter = ',', required = true)]
        frequencies_hz: Vec<f64>,

        /// Comma-separated powers in dBm (one value applies to every frequency)
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true, required = true)]
        powers_dbm: Vec<f64>,
    },

    /// Send a raw SCPI command; commands containing '?' print the reply
    Raw {
        /// Command text
        message: String,
    },
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            settings.log_format = format.clone();
        }
        if self.mock {
            settings.use_mock_devices();
        }
    }
}

/// Execute a parsed command.
pub async fn run(command: Commands, settings: Settings) -> Result<()> {
    match command {
        Commands::Ports => list_ports(),
        Commands::Monitor {
            duration_secs,
            json,
            history_rows,
        } => monitor(&settings, duration_secs.map(Duration::from_secs), json, history_rows).await,
        Commands::Info => {
            let logic = activate_laser(&settings).await?;
            print!("{}", presenter::render_info(&logic.snapshot()));
            logic.shutdown().await
        }
        Commands::Laser { state } => {
            laser_command(&settings, LaserCommand::SetLaserState(state.is_on())).await
        }
        Commands::Power { channel, power_mw } => set_power(&settings, channel, power_mw).await,
        Commands::Autopulse(action) => laser_command(&settings, (&action).into()).await,
        Commands::Feature { feature } => {
            laser_command(&settings, LaserCommand::SetAdvancedFeature(feature.into())).await
        }
        Commands::FineA { value } => laser_command(&settings, LaserCommand::SetFineA(value)).await,
        Commands::FineB { value } => laser_command(&settings, LaserCommand::SetFineB(value)).await,
        Commands::Microwave(action) => microwave(&settings, action).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = daq_core::serial::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn activate_laser(settings: &Settings) -> Result<LaserLogic> {
    let (lasers, _) = crate::driver_registries();
    let device = lasers.build(settings.laser_config()).await?;
    LaserLogic::activate(device, settings.logic.clone()).await
}

async fn laser_command(settings: &Settings, command: LaserCommand) -> Result<()> {
    let logic = activate_laser(settings).await?;
    let result = logic.send(command).await;
    if result.is_ok() {
        println!("{}", presenter::render_snapshot(&logic.snapshot()));
    }
    logic.shutdown().await?;
    result
}

async fn set_power(settings: &Settings, channel: u8, power_mw: f64) -> Result<()> {
    let channel = LaserChannel::from_number(channel)
        .ok_or_else(|| anyhow!("channel must be 1 or 2, got {channel}"))?;
    let logic = activate_laser(settings).await?;

    let current = logic.snapshot().channels;
    let selection = ChannelSelect::from_flags(
        current.includes(LaserChannel::One) || channel == LaserChannel::One,
        current.includes(LaserChannel::Two) || channel == LaserChannel::Two,
    );
    let result = async {
        logic.set_channels(selection).await?;
        logic.set_channel_power(channel, power_mw).await
    }
    .await;
    if result.is_ok() {
        println!(
            "Channel {} set to {}",
            channel.number(),
            presenter::power_line(power_mw).trim_start()
        );
    }
    logic.shutdown().await?;
    result
}

async fn monitor(
    settings: &Settings,
    duration: Option<Duration>,
    json: bool,
    history_rows: usize,
) -> Result<()> {
    let logic = activate_laser(settings).await?;
    let mut events = logic.subscribe();
    let deadline = tokio::time::sleep(duration.unwrap_or(Duration::MAX));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Console fell behind, {} updates skipped", missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut deadline, if duration.is_some() => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    let history = logic.history();
    logic.shutdown().await?;
    if !json {
        print!("{}", presenter::render_history(&history.read(), history_rows));
    }
    Ok(())
}

fn print_event(event: &LogicEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", presenter::render_event_json(event)?);
    } else {
        println!("{}", presenter::render_event(event));
    }
    Ok(())
}

async fn build_microwave(settings: &Settings) -> Result<Arc<dyn MicrowaveSource>> {
    let config = settings
        .microwave_config()
        .context("No [microwave] section configured")?;
    let (_, sources) = crate::driver_registries();
    sources.build(config).await
}

async fn microwave(settings: &Settings, action: MicrowaveAction) -> Result<()> {
    let source = build_microwave(settings).await?;
    match action {
        MicrowaveAction::Status => {
            let (mode, running) = source.status().await?;
            let frequency = source.frequency().await?;
            let power = source.power().await?;
            println!(
                "{}",
                presenter::render_microwave_status(
                    source.model_name(),
                    mode,
                    running,
                    frequency,
                    power
                )
            );
            println!("{}", presenter::render_microwave_limits(source.limits()));
        }
        MicrowaveAction::Cw {
            frequency_hz,
            power_dbm,
        } => {
            let applied = source.set_cw(frequency_hz, power_dbm).await?;
            source.cw_on().await?;
            println!("{}", presenter::render_cw(&applied));
        }
        MicrowaveAction::Off => {
            source.off().await?;
            println!("Output off");
        }
        MicrowaveAction::Sweep {
            start_hz,
            stop_hz,
            step_hz,
            power_dbm,
        } => {
            source
                .set_sweep(SweepSettings {
                    start_hz,
                    stop_hz,
                    step_hz,
                    power_dbm,
                })
                .await?;
            source.sweep_on().await?;
            println!("Sweep complete");
        }
        MicrowaveAction::List {
            frequencies_hz,
            powers_dbm,
        } => {
            source.set_list(&frequencies_hz, &powers_dbm).await?;
            source.list_on().await?;
            println!("List mode on ({} entries)", frequencies_hz.len());
        }
        MicrowaveAction::Raw { message } => {
            if let Some(reply) = source.send_raw(&message).await? {
                println!("{reply}");
            }
        }
    }
    Ok(())
}
