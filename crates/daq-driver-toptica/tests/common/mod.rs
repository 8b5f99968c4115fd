//! Scripted iBeam Smart stand-in for protocol tests.
//!
//! The fake answers each `\r\n`-terminated command with `<body>\r\nCMD> ` on the
//! device side of a duplex pipe and records every command it receives.

#![allow(dead_code)]

use daq_core::serial::{LineSettings, LineTransport};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Emulated device state.
#[derive(Debug, Clone)]
pub struct FakeState {
    pub serial: String,
    pub laser_on: bool,
    /// Output power as the device reports it, in µW.
    pub power_uw: f64,
    pub base_plate_c: f64,
    pub diode_c: f64,
    pub autopulse_on: bool,
    pub fine_on: bool,
    /// Last raw argument received by `ch 1 power`.
    pub ch1_raw: Option<f64>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            serial: "SN: iBEAM-SMART-640-S-12345".to_string(),
            laser_on: false,
            power_uw: 1234.0,
            base_plate_c: 25.1,
            diode_c: 24.9,
            autopulse_on: false,
            fine_on: true,
            ch1_raw: None,
        }
    }
}

/// Handle to a running fake device.
#[derive(Clone)]
pub struct FakeIBeam {
    pub state: Arc<Mutex<FakeState>>,
    pub commands: Arc<Mutex<Vec<String>>>,
}

impl FakeIBeam {
    /// Commands received so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Forget recorded commands.
    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    /// Number of times `command` was received.
    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == command).count()
    }
}

/// Transport settings with a short timeout so tests stay quick.
pub fn test_settings() -> LineSettings {
    LineSettings {
        read_timeout: Some(Duration::from_millis(20)),
        ..LineSettings::default()
    }
}

/// Spawn a fake device and return a transport connected to it.
pub fn spawn_fake(state: FakeState) -> (LineTransport, FakeIBeam) {
    let (host, device) = tokio::io::duplex(4096);
    let fake = FakeIBeam {
        state: Arc::new(Mutex::new(state)),
        commands: Arc::new(Mutex::new(Vec::new())),
    };

    let worker = fake.clone();
    tokio::spawn(async move {
        let (reader, mut writer) = tokio::io::split(device);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            worker.commands.lock().unwrap().push(line.clone());
            let body = respond(&worker.state, &line);
            let reply = format!("{}\r\nCMD> ", body);
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    (LineTransport::new(Box::new(host), test_settings()), fake)
}

fn respond(state: &Mutex<FakeState>, command: &str) -> String {
    let mut s = state.lock().unwrap();
    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
        ["serial"] => s.serial.clone(),
        ["ver"] => "iBEAM-SMART-640 V2.10".to_string(),
        ["sh", "timer"] => "Uptime = 3600 s".to_string(),
        ["sh", "pow"] => format!("PIC  = {:06} uW", s.power_uw),
        ["sh", "temp", "sys"] => format!("TSYS = {:.2} C", s.base_plate_c),
        ["sh", "temp"] => format!("TDIODE = {:.2} C", s.diode_c),
        ["sh", "cur"] => "LDC  = 85 mA".to_string(),
        ["sh", "ch"] => "CH1, PWR: 10.000 mW ON\r\nCH2, PWR: 0.000 mW OFF".to_string(),
        ["sta", "la"] => if s.laser_on { "ON" } else { "OFF" }.to_string(),
        ["la", "on"] => {
            s.laser_on = true;
            String::new()
        }
        ["la", "off"] => {
            s.laser_on = false;
            String::new()
        }
        ["sta", "puls"] => if s.autopulse_on { "ON" } else { "OFF" }.to_string(),
        ["puls", "on"] => {
            s.autopulse_on = true;
            String::new()
        }
        ["puls", "off"] => {
            s.autopulse_on = false;
            String::new()
        }
        ["sta", "fine"] => if s.fine_on { "ON" } else { "OFF" }.to_string(),
        ["fine", "on"] => {
            s.fine_on = true;
            String::new()
        }
        ["fine", "off"] => {
            s.fine_on = false;
            String::new()
        }
        ["ch", "1", "power", value] => {
            // The firmware takes this argument in its native power unit (µW).
            if let Ok(v) = value.parse::<f64>() {
                s.ch1_raw = Some(v);
                s.power_uw = v;
            }
            String::new()
        }
        _ => String::new(),
    }
}
