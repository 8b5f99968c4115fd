//! Console rendering of laser state.
//!
//! Every [`LogicEvent`] becomes one line on stdout, or one JSON object per line
//! in `--json` mode. [`render_history`] prints the newest rows of the sample
//! buffers as a table.

use chrono::{DateTime, SecondsFormat, Utc};
use daq_core::capabilities::{CwSettings, MicrowaveLimits};
use daq_core::response::Reading;
use daq_core::states::{FeatureStatus, LaserState, MicrowaveMode};
use daq_laser_logic::buffers::{SampleBuffers, POWER, TIME};
use daq_laser_logic::{LaserSnapshot, LogicEvent, PollOutcome};
use std::fmt::Write as _;

/// `Laser: ON`
pub fn laser_state_line(state: LaserState) -> String {
    format!("Laser: {state}")
}

/// Measured power, right-aligned to four decimals.
pub fn power_line(power_mw: f64) -> String {
    format!("{power_mw:9.4} mW")
}

/// One temperature sensor.
pub fn temperature_line(name: &str, celsius: f64) -> String {
    format!("{name}: {celsius:3.2} °C")
}

fn feature_line(label: &str, status: &FeatureStatus) -> String {
    format!("{label} {status}")
}

fn reading_text(reading: Reading<f64>, unit: &str) -> String {
    match reading {
        Reading::Value(v) => format!("{v:.4} {unit}"),
        Reading::NotAvailable => "n/a".to_string(),
    }
}

/// Single status line for one snapshot.
pub fn render_snapshot(snapshot: &LaserSnapshot) -> String {
    let mut parts = vec![
        laser_state_line(snapshot.state),
        power_line(snapshot.power_mw),
    ];
    parts.extend(
        snapshot
            .temperatures
            .iter()
            .map(|(name, t)| temperature_line(name, *t)),
    );
    parts.push(feature_line("autopulse", &snapshot.autopulse));
    parts.push(feature_line("FINE", &snapshot.fine));
    parts.join(" | ")
}

/// Text rendering of a logic event.
pub fn render_event(event: &LogicEvent) -> String {
    match event {
        LogicEvent::Updated { snapshot, poll } => {
            let line = render_snapshot(snapshot);
            match poll {
                Some(PollOutcome {
                    ok: false,
                    next_interval,
                }) => format!(
                    "{line} | poll failed, retrying in {} ms",
                    next_interval.as_millis()
                ),
                _ => line,
            }
        }
        LogicEvent::Stopped => "Polling stopped".to_string(),
    }
}

/// JSON rendering of a logic event.
pub fn render_event_json(event: &LogicEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

/// Multi-line device description for the `info` command.
pub fn render_info(snapshot: &LaserSnapshot) -> String {
    let mut out = String::new();
    let (min, max) = snapshot.power_range;
    let _ = writeln!(out, "{}", laser_state_line(snapshot.state));
    let _ = writeln!(out, "Power range: {min:.1} - {max:.1} mW");
    let _ = writeln!(
        out,
        "Power setpoint: {}",
        reading_text(snapshot.power_setpoint, "mW")
    );
    let _ = writeln!(out, "Power: {}", power_line(snapshot.power_mw).trim_start());
    for (name, t) in &snapshot.temperatures {
        let _ = writeln!(out, "{}", temperature_line(name, *t));
    }
    let _ = writeln!(out, "Shutter: {}", if snapshot.has_shutter { "yes" } else { "none" });
    let _ = writeln!(out, "Channels: {}", snapshot.channel_info.trim());
    let _ = writeln!(out, "{}", snapshot.extra_info.trim_end());
    out
}

fn format_time(unix_seconds: f64) -> String {
    let secs = unix_seconds.floor();
    let nanos = ((unix_seconds - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| format!("{unix_seconds:.3}"))
}

/// The newest `rows` samples, oldest first, with time in the first column and
/// power in the second.
pub fn render_history(buffers: &SampleBuffers, rows: usize) -> String {
    let mut columns = vec![TIME, POWER];
    columns.extend(buffers.names().filter(|n| *n != TIME && *n != POWER));

    let mut out = String::new();
    let header: Vec<String> = columns
        .iter()
        .map(|name| match *name {
            TIME => format!("{:<24}", name),
            POWER => format!("{:>12}", "power [mW]"),
            other => format!("{:>12}", format!("{other} [°C]")),
        })
        .collect();
    let _ = writeln!(out, "{}", header.join(" "));

    for row in buffers.latest(rows) {
        let cells: Vec<String> = columns
            .iter()
            .map(|name| {
                let value = row
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| *v)
                    .unwrap_or_default();
                match *name {
                    TIME => format!("{:<24}", format_time(value)),
                    POWER => format!("{value:>12.4}"),
                    _ => format!("{value:>12.2}"),
                }
            })
            .collect();
        let _ = writeln!(out, "{}", cells.join(" "));
    }
    out
}

/// Microwave status line.
pub fn render_microwave_status(
    model: &str,
    mode: MicrowaveMode,
    running: bool,
    frequency_hz: f64,
    power_dbm: f64,
) -> String {
    format!(
        "{model}: mode {mode}, output {}, {:.6} GHz, {power_dbm:.2} dBm",
        if running { "ON" } else { "OFF" },
        frequency_hz / 1e9
    )
}

/// Microwave limits, or a note that the model has none on record.
pub fn render_microwave_limits(limits: Reading<MicrowaveLimits>) -> String {
    match limits {
        Reading::Value(l) => format!(
            "limits: {:.3} - {:.3} GHz, {:.1} - {:.1} dBm",
            l.frequency_min_hz / 1e9,
            l.frequency_max_hz / 1e9,
            l.power_min_dbm,
            l.power_max_dbm
        ),
        Reading::NotAvailable => "limits: unknown for this model".to_string(),
    }
}

/// Values in effect after a CW change.
pub fn render_cw(settings: &CwSettings) -> String {
    let freq = settings
        .frequency_hz
        .map(|f| format!("{:.6} GHz", f / 1e9))
        .unwrap_or_else(|| "unchanged".to_string());
    let power = settings
        .power_dbm
        .map(|p| format!("{p:.2} dBm"))
        .unwrap_or_else(|| "unchanged".to_string());
    format!("CW: frequency {freq}, power {power}, mode {}", settings.mode)
}
