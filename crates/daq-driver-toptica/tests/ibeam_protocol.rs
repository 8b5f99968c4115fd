//! Protocol-level tests for the iBeam Smart driver against a scripted device.

mod common;

use anyhow::Result;
use common::{spawn_fake, FakeState};
use daq_core::capabilities::LaserDevice;
use daq_core::error::{root_daq_error, DaqError};
use daq_core::response::Reading;
use daq_core::states::{FeatureStatus, LaserChannel, LaserState, ShutterState};
use daq_driver_toptica::IBeamSmart;

async fn connected(state: FakeState) -> Result<(IBeamSmart, common::FakeIBeam)> {
    let (transport, fake) = spawn_fake(state);
    let laser = IBeamSmart::with_transport(transport, 150.0).await?;
    fake.clear();
    Ok((laser, fake))
}

// =============================================================================
// Identity
// =============================================================================

#[tokio::test]
async fn identity_with_marker_connects() -> Result<()> {
    let (transport, fake) = spawn_fake(FakeState::default());
    IBeamSmart::with_transport(transport, 150.0).await?;
    assert_eq!(fake.commands(), vec!["serial"]);
    Ok(())
}

#[tokio::test]
async fn identity_without_marker_is_connection_error() {
    let state = FakeState {
        serial: "SN: DL-PRO 4711".to_string(),
        ..FakeState::default()
    };
    let (transport, _fake) = spawn_fake(state);

    let err = match IBeamSmart::with_transport(transport, 150.0).await {
        Ok(_) => panic!("a non-iBeam device must be rejected"),
        Err(e) => e,
    };
    assert!(matches!(root_daq_error(&err), Some(DaqError::Connection(_))));
}

#[tokio::test]
async fn silent_device_is_connection_error() {
    let (host, _device) = tokio::io::duplex(64);
    let transport =
        daq_core::serial::LineTransport::new(Box::new(host), common::test_settings());

    let err = match IBeamSmart::with_transport(transport, 150.0).await {
        Ok(_) => panic!("a silent port must be rejected"),
        Err(e) => e,
    };
    assert!(matches!(root_daq_error(&err), Some(DaqError::Connection(_))));
}

// =============================================================================
// Readings and unit conversion
// =============================================================================

#[tokio::test]
async fn power_is_reported_in_milliwatts() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    let power = laser.power().await?;
    assert!((power - 1.234).abs() < 1e-12);
    assert_eq!(fake.commands(), vec!["sh pow"]);
    Ok(())
}

#[tokio::test]
async fn temperatures_query_system_then_diode() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    let temps = laser.temperatures().await?;
    assert_eq!(temps.get("Base Plate"), Some(&25.1));
    assert_eq!(temps.get("Diode"), Some(&24.9));
    assert_eq!(fake.commands(), vec!["sh temp sys", "sh temp"]);
    Ok(())
}

#[tokio::test]
async fn current_and_channel_info() -> Result<()> {
    let (laser, _fake) = connected(FakeState::default()).await?;

    assert_eq!(laser.current().await?, Reading::Value(85.0));
    assert!(laser.channel_info().await?.contains("CH1"));
    Ok(())
}

#[tokio::test]
async fn extra_info_combines_three_queries() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    let info = laser.extra_info().await?;
    assert_eq!(
        info,
        "Serial number: SN: iBEAM-SMART-640-S-12345\n\
         Firmware Version: iBEAM-SMART-640 V2.10\n\
         System UP Time: Uptime = 3600 s\n"
    );
    assert_eq!(fake.commands(), vec!["serial", "ver", "sh timer"]);
    Ok(())
}

#[tokio::test]
async fn feature_status_is_classified() -> Result<()> {
    let (laser, _fake) = connected(FakeState::default()).await?;

    assert_eq!(laser.autopulse_status().await?, FeatureStatus::Off);
    assert_eq!(laser.fine_status().await?, FeatureStatus::On);
    Ok(())
}

// =============================================================================
// Laser state
// =============================================================================

#[tokio::test]
async fn set_laser_state_requeries_status() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    let state = laser.set_laser_state(LaserState::On).await?;
    assert_eq!(state, LaserState::On);
    assert_eq!(fake.commands(), vec!["la on", "sta la"]);

    fake.clear();
    assert_eq!(laser.off().await?, LaserState::Off);
    assert_eq!(fake.commands(), vec!["la off", "sta la"]);
    Ok(())
}

#[tokio::test]
async fn unrequestable_state_reports_current_state() -> Result<()> {
    let (laser, fake) = connected(FakeState {
        laser_on: true,
        ..FakeState::default()
    })
    .await?;

    assert_eq!(laser.set_laser_state(LaserState::Locked).await?, LaserState::On);
    assert_eq!(laser.set_laser_state(LaserState::Unknown).await?, LaserState::On);
    assert_eq!(fake.commands(), vec!["sta la", "sta la"]);
    Ok(())
}

// =============================================================================
// Setter formatting
// =============================================================================

#[tokio::test]
async fn autopulse_period_is_sent_in_seconds() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    laser.set_autopulse_period(500_000.0).await?;
    laser.set_autopulse_width(250.0).await?;
    assert_eq!(
        fake.commands(),
        vec!["puls period 0.5", "puls width 0.00025"]
    );
    Ok(())
}

#[tokio::test]
async fn autopulse_frequency_is_scaled_by_1000() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    laser.set_autopulse_frequency(1.5).await?;
    laser.set_autopulse_duty(40.0).await?;
    assert_eq!(fake.commands(), vec!["puls freq 1500", "puls duty 40"]);
    Ok(())
}

#[tokio::test]
async fn feature_switches() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    laser.set_autopulse(true).await?;
    laser.set_fine(false).await?;
    laser.set_fine_a(30.0).await?;
    laser.set_fine_b(12.0).await?;
    laser.set_skill(true).await?;
    laser.set_skill(false).await?;
    assert_eq!(
        fake.commands(),
        vec![
            "puls on",
            "fine off",
            "fine a 30",
            "fine b 12",
            "skill on",
            "skill off"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn channel_power_passes_milliwatts_through() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    laser.set_channel_power(LaserChannel::One, 12.5).await?;
    laser.set_channel_power(LaserChannel::Two, 100.0).await?;
    assert_eq!(fake.commands(), vec!["ch 1 power 12.5", "ch 2 power 100"]);
    Ok(())
}

#[tokio::test]
async fn channel_power_outside_range_is_rejected() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    assert!(laser.set_channel_power(LaserChannel::One, 151.0).await.is_err());
    assert!(laser.set_channel_power(LaserChannel::One, -1.0).await.is_err());
    assert!(fake.commands().is_empty());
    Ok(())
}

/// Setting 12.5 mW and reading it back should agree. It does not: the set path
/// sends the mW value unchanged while the device reports µW on read.
#[tokio::test]
#[ignore = "power set passes mW through unchanged while reads convert from µW; unit contract undecided"]
async fn channel_power_round_trip() -> Result<()> {
    let (laser, _fake) = connected(FakeState::default()).await?;

    laser.set_channel_power(LaserChannel::One, 12.5).await?;
    let readback = laser.power().await?;
    assert!((readback - 12.5).abs() < 1e-9, "read back {readback} mW");
    Ok(())
}

// =============================================================================
// Soft-unsupported operations
// =============================================================================

#[tokio::test]
async fn unsupported_operations_do_not_touch_the_wire() -> Result<()> {
    let (laser, fake) = connected(FakeState::default()).await?;

    assert_eq!(laser.set_current(50.0).await?, Reading::NotAvailable);
    assert_eq!(laser.current_unit().await?, Reading::NotAvailable);
    assert_eq!(laser.current_range().await?, Reading::NotAvailable);
    assert_eq!(laser.current_setpoint().await?.or_sentinel(), -1.0);
    assert_eq!(laser.shutter_state().await?, ShutterState::NoShutter);
    assert_eq!(
        laser.set_shutter_state(ShutterState::Open).await?,
        ShutterState::NoShutter
    );
    assert_eq!(laser.temperature_setpoints().await?, Reading::NotAvailable);
    assert!(fake.commands().is_empty());
    Ok(())
}
