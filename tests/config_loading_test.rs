//! Loading settings from TOML files and environment overrides.

use serial_test::serial;
use std::path::Path;
use toptica_daq::config::Settings;

const CONFIG: &str = r#"
log_level = "debug"

[laser]
model = "iBeamSmart"
com_port = "COM3"
maxpower = 0.15

[logic]
query_interval = 200
channels = "both"

[microwave]
model = "SGS100A"
ip_address = "192.168.1.20"
"#;

fn write_config(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("toptica.toml");
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
#[serial]
fn test_file_values_and_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), CONFIG);

    let settings = Settings::load_from(&path).unwrap();
    assert!(settings.validate().is_ok());
    assert_eq!(settings.log_level, "debug");
    assert_eq!(settings.log_format, "compact");
    assert_eq!(settings.logic.query_interval, 200);
    assert_eq!(settings.logic.buffer_length, 100);
    assert_eq!(settings.logic.fallback_interval, 3000);

    let laser = settings.laser_config();
    assert_eq!(laser.get("com_port").and_then(|v| v.as_str()), Some("COM3"));
    assert_eq!(laser.get("maxpower").and_then(|v| v.as_float()), Some(0.15));

    let microwave = settings.microwave_config().unwrap();
    assert_eq!(
        microwave.get("ip_address").and_then(|v| v.as_str()),
        Some("192.168.1.20")
    );
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), CONFIG);

    std::env::set_var("TOPTICA_DAQ_LOGIC__QUERY_INTERVAL", "250");
    std::env::set_var("TOPTICA_DAQ_LASER__COM_PORT", "/dev/ttyUSB1");
    let result = Settings::load_from(&path);
    std::env::remove_var("TOPTICA_DAQ_LOGIC__QUERY_INTERVAL");
    std::env::remove_var("TOPTICA_DAQ_LASER__COM_PORT");

    let settings = result.unwrap();
    assert_eq!(settings.logic.query_interval, 250);
    assert_eq!(
        settings.laser.get("com_port").and_then(|v| v.as_str()),
        Some("/dev/ttyUSB1")
    );
    assert_eq!(
        settings.laser.get("model").and_then(|v| v.as_str()),
        Some("iBeamSmart")
    );
}

#[test]
#[serial]
fn test_invalid_interval_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[logic]\nquery_interval = 0\n");

    let settings = Settings::load_from(&path).unwrap();
    let err = settings.validate().unwrap_err();
    assert!(err.contains("query_interval"));
}

#[test]
#[serial]
fn test_unknown_channel_selection_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[logic]\nchannels = \"three\"\n");

    assert!(Settings::load_from(&path).is_err());
}

#[test]
#[serial]
fn test_shipped_default_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let settings = Settings::load_from(path).unwrap();
    assert!(settings.validate().is_ok());
    assert_eq!(
        settings.laser.get("model").and_then(|v| v.as_str()),
        Some("iBeamSmart")
    );
    assert!(settings.microwave.is_none());
}
