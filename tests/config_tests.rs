// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use cam_iface::config::{SimTransport, parse_backend_list};
use cam_iface::{Config, LoadPolicy, PixelCoding};

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.backends, vec!["v4l2", "sim"]);
    assert_eq!(config.load_policy, LoadPolicy::Permissive);
    assert_eq!(config.blank.num_cameras, 1);
    assert!(
        config.sim.cameras.is_empty(),
        "No software cameras unless configured"
    );
}

#[test]
fn test_config_partial_json() {
    let config = Config::from_json(
        r#"{
            "backends": ["sim", "blank"],
            "load_policy": "strict",
            "sim": {
                "cameras": [{
                    "model": "bench camera",
                    "transport": "callback",
                    "modes": [{ "width": 64, "height": 48, "coding": "MONO16", "framerate": 15.0 }],
                    "faults": { "data_lost_every": 4 }
                }]
            }
        }"#,
    )
    .unwrap();

    assert_eq!(config.load_policy, LoadPolicy::Strict);
    let camera = &config.sim.cameras[0];
    assert_eq!(camera.model, "bench camera");
    // Missing fields keep their defaults
    assert_eq!(camera.vendor, "cam_iface");
    assert_eq!(camera.transport, SimTransport::Callback);
    assert_eq!(camera.modes[0].coding, PixelCoding::Mono16);
    assert_eq!(camera.faults.data_lost_every, 4);
    assert_eq!(camera.faults.data_missing_every, 0);
    assert!(config.v4l2.devices.is_none());
}

#[test]
fn test_config_json_round_trip() {
    let mut config = Config::default();
    config.v4l2.devices = Some(vec!["/dev/video2".to_string()]);
    let parsed = Config::from_json(&config.to_json().unwrap()).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_config_rejects_malformed_json() {
    let err = Config::from_json("{ backends: ").unwrap_err();
    assert_eq!(err.code(), -1);
    assert!(err.to_string().starts_with("configuration error"));
}

#[test]
fn test_backend_list_normalization() {
    assert_eq!(parse_backend_list("V4L2,,sim "), vec!["v4l2", "sim"]);
}
