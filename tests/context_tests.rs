// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for capture contexts on the blank and simulated backends

use cam_iface::config::{BlankConfig, SimCameraConfig, SimConfig, SimFaults, SimModeConfig, SimTransport};
use cam_iface::{Advisory, BackendRegistry, CamError, Config, PixelCoding, PropertyValue, Timeout};
use std::time::{Duration, Instant};

const TRANSPORTS: [SimTransport; 3] = [
    SimTransport::Polled,
    SimTransport::Callback,
    SimTransport::Blocking,
];

fn sim_camera(transport: SimTransport, faults: SimFaults) -> SimCameraConfig {
    SimCameraConfig {
        transport,
        faults,
        modes: vec![SimModeConfig {
            width: 16,
            height: 8,
            coding: PixelCoding::Mono8,
            framerate: 100.0,
        }],
        ..SimCameraConfig::default()
    }
}

fn registry_with(cameras: Vec<SimCameraConfig>) -> BackendRegistry {
    let config = Config {
        backends: vec!["sim".to_string()],
        sim: SimConfig { cameras },
        ..Config::default()
    };
    let mut registry = BackendRegistry::new(&config);
    registry.startup().unwrap();
    registry
}

fn secs(s: f32) -> Timeout {
    Timeout::from_secs_f32(s)
}

#[test]
fn test_blank_camera_smoke() {
    let config = Config {
        backends: vec!["blank".to_string()],
        blank: BlankConfig { num_cameras: 1 },
        ..Config::default()
    };
    let mut registry = BackendRegistry::new(&config);
    registry.startup().unwrap();

    let mut ctx = registry.new_context(0, 5, 0).unwrap();
    assert_eq!(ctx.coding(), PixelCoding::Mono8);
    assert_eq!(ctx.depth(), 8);
    ctx.start().unwrap();

    let mut frame = vec![0u8; 64];
    let err = ctx.grab_next_frame_blocking_with_stride(&mut frame, 8, secs(0.1)).unwrap_err();
    assert!(matches!(err, CamError::NotImplemented(_)));
    assert!(err.to_string().starts_with("Function not implemented"));

    let err = ctx.grab_next_frame_blocking(&mut frame, secs(0.1)).unwrap_err();
    assert_eq!(err.to_string(), "Function not implemented: grab_next_frame_blocking");

    ctx.stop().unwrap();
    ctx.destroy().unwrap();
}

#[test]
fn test_shutter_round_trip() {
    let registry = registry_with(vec![sim_camera(SimTransport::Polled, SimFaults::default())]);
    let mut ctx = registry.new_context(0, 3, 0).unwrap();

    let shutter = (0..ctx.num_properties().unwrap())
        .find(|&i| ctx.property_info(i).unwrap().name == "shutter")
        .unwrap();
    ctx.set_property(shutter, PropertyValue { value: 1000, auto: false }).unwrap();
    assert_eq!(
        ctx.property(shutter).unwrap(),
        PropertyValue { value: 1000, auto: false }
    );
    ctx.destroy().unwrap();
}

#[test]
fn test_grab_keeps_stride_padding() {
    let registry = registry_with(vec![sim_camera(SimTransport::Polled, SimFaults::default())]);
    let mut ctx = registry.new_context(0, 3, 0).unwrap();
    let (width, height) = ctx.frame_size().unwrap();
    let stride = width as usize + 4;
    let mut frame = vec![0xABu8; stride * height as usize];

    ctx.start().unwrap();
    ctx.grab_next_frame_blocking_with_stride(&mut frame, stride, secs(2.0)).unwrap();

    for row in frame.chunks(stride) {
        assert!(row[width as usize..].iter().all(|&b| b == 0xAB));
    }
    ctx.destroy().unwrap();
}

#[test]
fn test_small_stride_is_rejected() {
    let registry = registry_with(vec![sim_camera(SimTransport::Polled, SimFaults::default())]);
    let mut ctx = registry.new_context(0, 3, 0).unwrap();
    let mut frame = vec![0u8; 16 * 8];
    ctx.start().unwrap();
    let err = ctx.grab_next_frame_blocking_with_stride(&mut frame, 15, secs(2.0)).unwrap_err();
    assert_eq!(err.code(), -392081);
    ctx.destroy().unwrap();
}

#[test]
fn test_timeout_is_honored_by_every_transport() {
    let stalled = SimFaults {
        stalled: true,
        ..SimFaults::default()
    };
    let registry = registry_with(TRANSPORTS.iter().map(|&t| sim_camera(t, stalled)).collect());

    for device in 0..TRANSPORTS.len() {
        let mut ctx = registry.new_context(device, 2, 0).unwrap();
        ctx.start().unwrap();
        let mut frame = vec![0u8; 16 * 8];

        let began = Instant::now();
        let err = ctx.grab_next_frame_blocking(&mut frame, secs(0.2)).unwrap_err();
        let waited = began.elapsed();

        assert_eq!(err, CamError::FrameTimeout, "{:?}", TRANSPORTS[device]);
        assert!(waited >= Duration::from_millis(180), "{:?} returned early", TRANSPORTS[device]);
        assert!(waited < Duration::from_secs(2), "{:?} overslept", TRANSPORTS[device]);
        ctx.destroy().unwrap();
    }
}

#[test]
fn test_huge_timeout_is_a_bounded_wait() {
    let registry = registry_with(TRANSPORTS.iter().map(|&t| sim_camera(t, SimFaults::default())).collect());

    for device in 0..TRANSPORTS.len() {
        let mut ctx = registry.new_context(device, 2, 0).unwrap();
        ctx.start().unwrap();
        let mut frame = vec![0u8; 16 * 8];

        let timeout = secs(1.0e19);
        assert!(matches!(timeout, Timeout::After(_)));
        let grabbed = ctx.grab_next_frame_blocking(&mut frame, timeout).unwrap();
        assert!(grabbed.framenumber >= 0, "{:?}", TRANSPORTS[device]);
        ctx.destroy().unwrap();
    }
}

#[test]
fn test_flagged_frames_are_requeued() {
    let faults = SimFaults {
        data_missing_every: 1,
        ..SimFaults::default()
    };
    let registry = registry_with(TRANSPORTS.iter().map(|&t| sim_camera(t, faults)).collect());

    for device in 0..TRANSPORTS.len() {
        // A single buffer only keeps flowing if every flagged frame goes back to the pool
        let mut ctx = registry.new_context(device, 1, 0).unwrap();
        ctx.start().unwrap();
        let mut frame = vec![0u8; 16 * 8];
        let mut last = -1;
        for _ in 0..4 {
            let grabbed = ctx.grab_next_frame_blocking(&mut frame, secs(2.0)).unwrap();
            assert_eq!(grabbed.advisory, Some(Advisory::DataMissing));
            assert!(grabbed.framenumber > last);
            last = grabbed.framenumber;
        }
        assert_eq!(ctx.last_framenumber().unwrap(), last);
        ctx.destroy().unwrap();
    }
}

#[test]
fn test_last_frame_info_before_first_grab() {
    let registry = registry_with(vec![sim_camera(SimTransport::Blocking, SimFaults::default())]);
    let ctx = registry.new_context(0, 2, 0).unwrap();
    assert_eq!(ctx.last_framenumber().unwrap(), -1);
    assert_eq!(ctx.last_timestamp().unwrap(), 0.0);
    ctx.destroy().unwrap();
}

#[test]
fn test_start_and_stop_are_idempotent() {
    let registry = registry_with(TRANSPORTS.iter().map(|&t| sim_camera(t, SimFaults::default())).collect());

    for device in 0..TRANSPORTS.len() {
        let mut ctx = registry.new_context(device, 2, 0).unwrap();
        ctx.stop().unwrap();
        ctx.start().unwrap();
        ctx.start().unwrap();
        let mut frame = vec![0u8; 16 * 8];
        ctx.grab_next_frame_blocking(&mut frame, secs(2.0)).unwrap();
        ctx.stop().unwrap();
        ctx.stop().unwrap();
        ctx.destroy().unwrap();
    }
}

#[test]
fn test_point_and_unpoint() {
    let registry = registry_with(vec![sim_camera(SimTransport::Callback, SimFaults::default())]);
    let mut ctx = registry.new_context(0, 2, 0).unwrap();
    ctx.start().unwrap();

    let framenumber = {
        let pointed = ctx.point_next_frame_blocking(secs(2.0)).unwrap();
        assert!(pointed.stride >= 16);
        assert!(pointed.data.len() >= pointed.stride * 7 + 16);
        pointed.frame.framenumber
    };
    ctx.unpoint_frame().unwrap();
    assert_eq!(ctx.last_framenumber().unwrap(), framenumber);

    // Pointing again without unpointing hands the previous frame back
    ctx.point_next_frame_blocking(secs(2.0)).unwrap();
    ctx.point_next_frame_blocking(secs(2.0)).unwrap();
    ctx.destroy().unwrap();
}

#[test]
fn test_construct_destroy_cycles() {
    let registry = registry_with(TRANSPORTS.iter().map(|&t| sim_camera(t, SimFaults::default())).collect());
    for _ in 0..3 {
        for device in 0..TRANSPORTS.len() {
            let mut ctx = registry.new_context(device, 3, 0).unwrap();
            ctx.start().unwrap();
            // Destroying a running context stops it first
            ctx.destroy().unwrap();
        }
    }
}

#[test]
fn test_invalid_construction_arguments() {
    let registry = registry_with(vec![sim_camera(SimTransport::Polled, SimFaults::default())]);
    assert!(matches!(
        registry.new_context(0, 2, 5),
        Err(CamError::InvalidArgument(_))
    ));
    assert!(registry.new_context(0, 0, 0).is_err());
}
