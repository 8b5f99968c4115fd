//! Mock drivers behind the registries, the way the CLI builds them.

use anyhow::Result;
use daq_core::driver::{LaserRegistry, MicrowaveRegistry};
use daq_core::states::LaserState;
use daq_driver_mock::register_all;

fn registries() -> (LaserRegistry, MicrowaveRegistry) {
    let mut lasers = LaserRegistry::for_lasers();
    let mut sources = MicrowaveRegistry::for_microwave();
    register_all(&mut lasers, &mut sources);
    (lasers, sources)
}

#[tokio::test]
async fn mock_models_are_registered() {
    let (lasers, sources) = registries();
    assert!(lasers.has_factory("mock"));
    assert!(lasers.has_factory("MOCK"));
    assert!(sources.has_factory("mock"));
}

#[tokio::test]
async fn registry_builds_mock_laser() -> Result<()> {
    let (lasers, _) = registries();
    let laser = lasers
        .build(toml::Value::Table(toml::toml! {
            model = "mock"
            noise_fraction = 0.0
            channel_power_mw = 20.0
        }))
        .await?;

    assert_eq!(laser.model_name(), "mock");
    assert_eq!(laser.on().await?, LaserState::On);
    assert_eq!(laser.power().await?, 20.0);
    Ok(())
}

#[tokio::test]
async fn registry_rejects_invalid_mock_config() {
    let (lasers, _) = registries();
    let result = lasers
        .build(toml::Value::Table(toml::toml! {
            model = "mock"
            max_power_mw = 0.0
        }))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn registry_builds_mock_microwave() -> Result<()> {
    let (_, sources) = registries();
    let source = sources
        .build(toml::Value::Table(toml::toml! { model = "mock" }))
        .await?;
    source.set_cw(Some(2.87e9), Some(-10.0)).await?;
    source.cw_on().await?;
    assert!(source.status().await?.1);
    Ok(())
}
