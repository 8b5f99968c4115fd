//! Device state enumerations shared by drivers, logic and presentation.

use crate::response::StatusToken;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Laser emission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaserState {
    /// Emission off.
    Off,
    /// Emission on.
    On,
    /// Interlock engaged.
    Locked,
    /// State could not be determined.
    Unknown,
}

impl LaserState {
    /// True for the states from which the laser may be switched on.
    pub fn can_turn_on(self) -> bool {
        matches!(self, LaserState::Off | LaserState::On)
    }
}

impl From<StatusToken> for LaserState {
    fn from(token: StatusToken) -> Self {
        match token {
            StatusToken::On => LaserState::On,
            StatusToken::Off => LaserState::Off,
            StatusToken::Locked => LaserState::Locked,
            StatusToken::Error | StatusToken::Unknown => LaserState::Unknown,
        }
    }
}

impl fmt::Display for LaserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LaserState::Off => "OFF",
            LaserState::On => "ON",
            LaserState::Locked => "LOCKED",
            LaserState::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Output shutter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterState {
    /// Shutter closed.
    Closed,
    /// Shutter open.
    Open,
    /// State could not be determined.
    Unknown,
    /// The device has no shutter.
    NoShutter,
}

/// How the laser output is regulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Power and current both adjustable.
    Mixed,
    /// Constant output power.
    Power,
    /// Constant diode current.
    Current,
}

/// One of the two output channels of a dual-channel diode laser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaserChannel {
    /// Channel 1
    One,
    /// Channel 2
    Two,
}

impl LaserChannel {
    /// Channel number as used on the wire.
    pub fn number(self) -> u8 {
        match self {
            LaserChannel::One => 1,
            LaserChannel::Two => 2,
        }
    }

    /// Parse a channel number.
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(LaserChannel::One),
            2 => Some(LaserChannel::Two),
            _ => None,
        }
    }
}

/// Which channels accept power setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSelect {
    /// No channel selected.
    None,
    /// Channel 1 only.
    Channel1,
    /// Channel 2 only.
    Channel2,
    /// Both channels.
    Both,
}

impl ChannelSelect {
    /// Selection for a pair of channel check states.
    pub fn from_flags(channel1: bool, channel2: bool) -> Self {
        match (channel1, channel2) {
            (true, true) => ChannelSelect::Both,
            (true, false) => ChannelSelect::Channel1,
            (false, true) => ChannelSelect::Channel2,
            (false, false) => ChannelSelect::None,
        }
    }

    /// True if `channel` is part of this selection.
    pub fn includes(self, channel: LaserChannel) -> bool {
        matches!(
            (self, channel),
            (ChannelSelect::Both, _)
                | (ChannelSelect::Channel1, LaserChannel::One)
                | (ChannelSelect::Channel2, LaserChannel::Two)
        )
    }
}

/// Firmware feature selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvancedFeature {
    /// No advanced feature.
    NoFeature,
    /// SKILL mode 1.
    Skill1,
    /// FINE fine-tuning.
    Fine,
}

/// Reported status of a firmware feature (autopulse, FINE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureStatus {
    /// Feature active.
    On,
    /// Feature inactive.
    Off,
    /// Unrecognised response, kept verbatim.
    Unknown(String),
}

impl FeatureStatus {
    /// Classify a raw status response.
    pub fn from_response(text: &str) -> Self {
        match crate::response::classify_status(text) {
            StatusToken::On => FeatureStatus::On,
            StatusToken::Off => FeatureStatus::Off,
            _ => FeatureStatus::Unknown(text.trim().to_string()),
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureStatus::On => f.write_str("ON"),
            FeatureStatus::Off => f.write_str("OFF"),
            FeatureStatus::Unknown(raw) if raw.is_empty() => f.write_str("UNKNOWN"),
            FeatureStatus::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// Microwave output mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicrowaveMode {
    /// No mode used yet.
    #[default]
    None,
    /// Continuous wave.
    Cw,
    /// Frequency/power list.
    List,
    /// Frequency sweep.
    Sweep,
}

impl fmt::Display for MicrowaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MicrowaveMode::None => "none",
            MicrowaveMode::Cw => "cw",
            MicrowaveMode::List => "list",
            MicrowaveMode::Sweep => "sweep",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_selection_from_flags() {
        assert_eq!(ChannelSelect::from_flags(true, true), ChannelSelect::Both);
        assert_eq!(ChannelSelect::from_flags(false, true), ChannelSelect::Channel2);
        assert_eq!(ChannelSelect::from_flags(false, false), ChannelSelect::None);
    }

    #[test]
    fn channel_selection_includes() {
        assert!(ChannelSelect::Both.includes(LaserChannel::Two));
        assert!(ChannelSelect::Channel1.includes(LaserChannel::One));
        assert!(!ChannelSelect::Channel1.includes(LaserChannel::Two));
        assert!(!ChannelSelect::None.includes(LaserChannel::One));
    }

    #[test]
    fn feature_status_keeps_unrecognised_text() {
        assert_eq!(FeatureStatus::from_response("ON\r\n"), FeatureStatus::On);
        assert_eq!(
            FeatureStatus::from_response(" pending \r\n"),
            FeatureStatus::Unknown("pending".into())
        );
    }

    #[test]
    fn error_token_maps_to_unknown_laser_state() {
        assert_eq!(LaserState::from(StatusToken::Error), LaserState::Unknown);
        assert!(!LaserState::Locked.can_turn_on());
    }
}
