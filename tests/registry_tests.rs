// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the device-number space over several backends

use cam_iface::config::{BlankConfig, SimCameraConfig, SimConfig};
use cam_iface::{BackendRegistry, CamError, Config, LoadPolicy};

fn config(backends: &[&str], blank: usize, sim: usize) -> Config {
    Config {
        backends: backends.iter().map(|b| b.to_string()).collect(),
        blank: BlankConfig { num_cameras: blank },
        sim: SimConfig {
            cameras: vec![SimCameraConfig::default(); sim],
        },
        ..Config::default()
    }
}

#[test]
fn test_device_numbers_follow_backend_order() {
    let mut registry = BackendRegistry::new(&config(&["sim", "blank"], 2, 3));
    registry.startup().unwrap();

    assert_eq!(registry.num_cameras(), 5);
    let ranges = registry.backend_ranges();
    assert_eq!(ranges[0].name, "sim");
    assert_eq!(ranges[0].range, 0..3);
    assert_eq!(ranges[1].name, "blank");
    assert_eq!(ranges[1].range, 3..5);

    assert_eq!(registry.camera_info(2).unwrap().model, "simulated camera");
    assert_eq!(registry.camera_info(3).unwrap().model, "blank camera");
    assert_eq!(registry.camera_info(4).unwrap().chip, "blank-1");
    assert_eq!(registry.num_modes(0).unwrap(), 2);
    assert_eq!(registry.mode_string(4, 0).unwrap(), "(blank mode string)");

    let ctx = registry.new_context(4, 2, 0).unwrap();
    assert_eq!(ctx.device_number(), 4);
    assert_eq!(ctx.backend_name(), "blank");
    ctx.destroy().unwrap();
}

#[test]
fn test_out_of_range_device_numbers() {
    let mut registry = BackendRegistry::new(&config(&["blank"], 1, 0));
    registry.startup().unwrap();
    assert!(matches!(
        registry.camera_info(1),
        Err(CamError::DeviceNotFound(_))
    ));
    assert!(registry.new_context(7, 2, 0).is_err());
}

#[test]
fn test_backend_without_cameras_owns_empty_range() {
    let mut registry = BackendRegistry::new(&config(&["sim", "blank"], 1, 0));
    registry.startup().unwrap();

    let ranges = registry.backend_ranges();
    assert!(ranges[0].range.is_empty());
    assert!(ranges[0].loaded);
    assert_eq!(ranges[1].range, 0..1);
    assert_eq!(registry.camera_info(0).unwrap().model, "blank camera");
}

#[test]
fn test_unknown_backend_is_skipped_when_permissive() {
    let mut registry = BackendRegistry::new(&config(&["firewire", "blank"], 2, 0));
    registry.startup().unwrap();
    assert_eq!(registry.num_cameras(), 2);
    assert!(!registry.backend_ranges()[0].loaded);
}

#[test]
fn test_unknown_backend_fails_when_strict() {
    let strict = Config {
        load_policy: LoadPolicy::Strict,
        ..config(&["blank", "firewire"], 1, 0)
    };
    let mut registry = BackendRegistry::new(&strict);
    assert!(matches!(
        registry.startup(),
        Err(CamError::BackendUnavailable(_))
    ));
    assert_eq!(registry.num_cameras(), 1);
}

#[test]
fn test_contexts_outlive_registry_shutdown() {
    let mut registry = BackendRegistry::new(&config(&["sim"], 0, 1));
    registry.startup().unwrap();
    let mut ctx = registry.new_context(0, 2, 0).unwrap();
    registry.shutdown().unwrap();

    assert_eq!(registry.num_cameras(), 0);
    ctx.start().unwrap();
    ctx.stop().unwrap();
    ctx.destroy().unwrap();
}
