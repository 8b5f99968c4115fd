//! Running CLI commands end-to-end against the simulated devices.

use toptica_daq::cli::{self, AutopulseAction, Commands, FeatureArg, MicrowaveAction, Switch};
use toptica_daq::config::Settings;

fn mock_settings() -> Settings {
    let mut settings = Settings::default();
    settings.use_mock_devices();
    settings.logic.query_interval = 20;
    settings.logic.fallback_interval = 100;
    settings
}

#[tokio::test(flavor = "multi_thread")]
async fn test_laser_commands_run_against_mock() -> anyhow::Result<()> {
    cli::run(Commands::Laser { state: Switch::On }, mock_settings()).await?;
    cli::run(Commands::Laser { state: Switch::Off }, mock_settings()).await?;
    cli::run(Commands::Info, mock_settings()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_power_on_second_channel_is_selected_first() -> anyhow::Result<()> {
    cli::run(
        Commands::Power {
            channel: 2,
            power_mw: 12.5,
        },
        mock_settings(),
    )
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_feature_and_autopulse_commands() -> anyhow::Result<()> {
    cli::run(
        Commands::Autopulse(AutopulseAction::Freq { khz: 10.0 }),
        mock_settings(),
    )
    .await?;
    cli::run(
        Commands::Feature {
            feature: FeatureArg::Fine,
        },
        mock_settings(),
    )
    .await?;
    cli::run(Commands::FineA { value: 30.0 }, mock_settings()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_monitor_stops_after_duration() -> anyhow::Result<()> {
    cli::run(
        Commands::Monitor {
            duration_secs: Some(1),
            json: true,
            history_rows: 5,
        },
        mock_settings(),
    )
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_microwave_commands_run_against_mock() -> anyhow::Result<()> {
    cli::run(
        Commands::Microwave(MicrowaveAction::Cw {
            frequency_hz: Some(2.87e9),
            power_dbm: Some(-10.0),
        }),
        mock_settings(),
    )
    .await?;
    cli::run(Commands::Microwave(MicrowaveAction::Status), mock_settings()).await?;
    cli::run(
        Commands::Microwave(MicrowaveAction::Sweep {
            start_hz: 2.80e9,
            stop_hz: 2.81e9,
            step_hz: 1.0e6,
            power_dbm: -10.0,
        }),
        mock_settings(),
    )
    .await?;
    cli::run(Commands::Microwave(MicrowaveAction::Off), mock_settings()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_microwave_without_section_fails() {
    let mut settings = mock_settings();
    settings.microwave = None;

    let err = cli::run(Commands::Microwave(MicrowaveAction::Status), settings)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No [microwave] section configured"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_laser_model_fails() {
    let mut settings = Settings::default();
    settings.laser.insert("model".into(), "DL pro".into());

    let err = cli::run(Commands::Info, settings).await.unwrap_err();
    assert!(format!("{err:#}").contains("unknown laser model 'DL pro'"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ibeam_without_port_is_configuration_error() {
    let mut settings = Settings::default();
    settings.laser.insert("model".into(), "iBeamSmart".into());

    let err = cli::run(Commands::Info, settings).await.unwrap_err();
    assert!(matches!(
        daq_core::error::root_daq_error(&err),
        Some(daq_core::error::DaqError::Configuration(_))
    ));
}
