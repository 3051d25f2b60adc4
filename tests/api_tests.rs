// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the flat call surface
//!
//! Driver state is process-wide, so everything runs in one sequential test.

use cam_iface::api;
use cam_iface::config::{BlankConfig, SimCameraConfig, SimConfig, SimFaults, SimModeConfig};
use cam_iface::{Config, PixelCoding};

fn take_error() -> (i32, String) {
    let error = (api::have_error(), api::get_error_string());
    api::clear_error();
    error
}

fn config() -> Config {
    Config {
        backends: vec!["blank".to_string(), "sim".to_string()],
        blank: BlankConfig { num_cameras: 1 },
        sim: SimConfig {
            cameras: vec![SimCameraConfig {
                modes: vec![SimModeConfig {
                    width: 8,
                    height: 4,
                    coding: PixelCoding::Mono8,
                    framerate: 100.0,
                }],
                faults: SimFaults {
                    data_lost_every: 2,
                    ..SimFaults::default()
                },
                ..SimCameraConfig::default()
            }],
        },
        ..Config::default()
    }
}

#[test]
fn test_api_lifecycle() {
    assert_eq!(api::driver_name(), "unity");
    assert_eq!(api::api_version(), "20080124a");

    // Nothing works before startup
    api::clear_error();
    assert!(api::get_num_cameras().is_none());
    let (code, message) = take_error();
    assert_eq!(code, -1);
    assert!(message.contains("not started"));

    api::startup_with_config(config());
    assert_eq!(api::have_error(), 0);
    assert_eq!(api::get_num_cameras(), Some(2));

    api::startup_with_config(config());
    assert!(take_error().1.contains("already started"));
    assert_eq!(api::get_num_cameras(), Some(2));

    let info = api::get_camera_info(1).unwrap();
    assert_eq!(info.model, "simulated camera");
    assert_eq!(api::get_num_modes(1), Some(1));
    assert_eq!(api::get_mode_string(1, 0).as_deref(), Some("8 x 4 MONO8 100 fps"));
    assert!(api::get_camera_info(2).is_none());
    take_error();

    // Blank camera: open, start, no frames
    let blank = api::new_context(0, 5, 0).unwrap();
    assert_eq!(api::context_coding(blank), Some(PixelCoding::Mono8));
    assert_eq!(api::context_depth(blank), Some(8));
    api::start(blank);
    assert_eq!(api::have_error(), 0);
    let mut frame = vec![0u8; 32];
    assert!(api::grab_next_frame_blocking_with_stride(blank, &mut frame, 8, 0.1).is_none());
    assert!(take_error().1.starts_with("Function not implemented"));
    api::delete_context(blank);
    assert_eq!(api::have_error(), 0);

    // Stale handles are rejected
    api::start(blank);
    assert_eq!(take_error(), (-1, "no such camera context".to_string()));

    // Simulated camera: every second frame is flagged but still delivered
    let sim = api::new_context(1, 3, 0).unwrap();
    assert_eq!(api::get_frame_size(sim), Some((8, 4)));
    api::start(sim);
    for _ in 0..4 {
        let grabbed = api::grab_next_frame_blocking(sim, &mut frame, 2.0).unwrap();
        let expected = if grabbed.framenumber % 2 == 1 { -392075 } else { 0 };
        assert_eq!(take_error().0, expected, "frame {}", grabbed.framenumber);
    }
    assert!(api::get_last_framenumber(sim).unwrap() >= 3);

    let first_byte = api::point_next_frame_blocking(sim, 2.0, |pointed| pointed.data[0]);
    api::clear_error();
    assert!(first_byte.is_some());
    api::unpoint_frame(sim);
    assert_eq!(api::have_error(), 0);

    api::set_property(sim, 2, 1000, false);
    assert_eq!(api::get_property(sim, 2), Some((1000, false)));
    assert_eq!(api::get_num_trigger_modes(sim), Some(3));

    // Geometry is fixed while capturing
    api::set_frame_size(sim, 4, 4);
    assert_eq!(take_error().0, -392077);
    api::stop(sim);
    api::set_frame_size(sim, 4, 4);
    assert_eq!(api::have_error(), 0);
    assert_eq!(api::get_buffer_size(sim), Some(16));

    // Shutdown destroys the remaining context
    api::shutdown();
    assert_eq!(api::have_error(), 0);
    assert!(api::get_framerate(sim).is_none());
    assert!(take_error().1.contains("not started"));
}
