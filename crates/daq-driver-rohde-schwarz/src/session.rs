//! Blocking SCPI sessions.
//!
//! VISA calls block, so drivers keep a session behind a `tokio::sync::Mutex` and
//! run every call on the blocking pool (see [`SharedSession`]).

use anyhow::{Context, Result};
use daq_core::error::DaqError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

/// A message-based instrument session.
pub trait ScpiSession: Send {
    /// Send a command.
    fn write(&mut self, command: &str) -> Result<()>;

    /// Send a command and read one reply, trimmed.
    fn query(&mut self, command: &str) -> Result<String>;
}

/// Session shared between async callers; each call runs under `spawn_blocking`.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Box<dyn ScpiSession>>>,
}

impl SharedSession {
    /// Wrap a session.
    pub fn new(session: Box<dyn ScpiSession>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Write `command` on the blocking pool.
    pub async fn write(&self, command: &str) -> Result<()> {
        let inner = self.inner.clone();
        let command = command.to_string();
        spawn_blocking(move || inner.blocking_lock().write(&command))
            .await
            .context("spawn_blocking for VISA write failed")?
    }

    /// Query `command` on the blocking pool.
    pub async fn query(&self, command: &str) -> Result<String> {
        let inner = self.inner.clone();
        let command = command.to_string();
        spawn_blocking(move || inner.blocking_lock().query(&command))
            .await
            .context("spawn_blocking for VISA query failed")?
    }
}

/// Open a VISA resource (e.g. `TCPIP::192.168.1.20::INSTR`).
///
/// Without the `instrument_visa` feature this fails with
/// [`DaqError::FeatureNotEnabled`].
pub async fn open_visa_session(resource: &str, timeout: Duration) -> Result<Box<dyn ScpiSession>> {
    #[cfg(feature = "instrument_visa")]
    {
        let resource = resource.to_string();
        let session = spawn_blocking(move || visa::VisaSession::open(&resource, timeout))
            .await
            .context("spawn_blocking for VISA open failed")??;
        Ok(Box::new(session))
    }

    #[cfg(not(feature = "instrument_visa"))]
    {
        let _ = (resource, timeout);
        Err(DaqError::FeatureNotEnabled("instrument_visa".into()).into())
    }
}

#[cfg(feature = "instrument_visa")]
mod visa {
    use super::ScpiSession;
    use anyhow::Result;
    use daq_core::error::DaqError;
    use std::ffi::CString;
    use std::io::{BufRead, BufReader, Write};
    use std::time::Duration;
    use visa_rs::prelude::*;

    /// visa-rs backed session with `\n` line termination.
    pub(super) struct VisaSession {
        device: Instrument,
    }

    impl VisaSession {
        pub(super) fn open(resource: &str, timeout: Duration) -> Result<Self> {
            let rm = DefaultRM::new().map_err(|e| {
                DaqError::Connection(format!("Failed to create VISA resource manager: {e:?}"))
            })?;
            let name = CString::new(resource).map_err(|e| {
                DaqError::Configuration(format!("invalid VISA resource '{resource}': {e}"))
            })?;
            let device = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| {
                    DaqError::Connection(format!("Failed to open VISA resource {resource}: {e:?}"))
                })?;
            Ok(Self { device })
        }
    }

    impl ScpiSession for VisaSession {
        fn write(&mut self, command: &str) -> Result<()> {
            let line = format!("{}\n", command);
            (&self.device)
                .write_all(line.as_bytes())
                .map_err(|e| DaqError::Instrument(format!("VISA write '{command}' failed: {e}")))?;
            Ok(())
        }

        fn query(&mut self, command: &str) -> Result<String> {
            self.write(command)?;
            let mut response = String::new();
            BufReader::new(&self.device)
                .read_line(&mut response)
                .map_err(|e| DaqError::Instrument(format!("VISA read for '{command}' failed: {e}")))?;
            Ok(response.trim().to_string())
        }
    }
}
