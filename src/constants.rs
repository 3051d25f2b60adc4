// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants

use std::time::Duration;

/// Version string of the call surface; bumped whenever the operation set changes.
pub const CAM_IFACE_API_VERSION: &str = "20080124a";

/// Upper bound (in bytes) of the message kept by the error channel.
pub const MAX_ERROR_LEN: usize = 255;

/// Name reported by the multi-backend driver.
pub const UNITY_DRIVER_NAME: &str = "unity";

/// Integer codes reported through the error channel.
///
/// These values are part of the stable surface and must never change.
pub mod error_codes {
    /// Generic failure, also used for contract violations
    pub const GENERIC: i32 = -1;
    pub const FRAME_DATA_MISSING: i32 = -392073;
    pub const FRAME_TIMEOUT: i32 = -392074;
    pub const FRAME_DATA_LOST: i32 = -392075;
    pub const HARDWARE_FEATURE_NOT_AVAILABLE: i32 = -392076;
    pub const OTHER_ERROR: i32 = -392077;
    pub const FRAME_INTERRUPTED_SYSCALL: i32 = -392078;
    pub const BUFFER_OVERFLOW: i32 = -392081;
}

/// Environment variables read at startup
pub mod env {
    /// Path of a JSON configuration file overriding the default location
    pub const CONFIG_PATH: &str = "CAM_IFACE_CONFIG";
    /// Comma separated backend order, e.g. `sim,blank`
    pub const BACKENDS: &str = "CAM_IFACE_BACKENDS";
}

/// Backend names as used in the configuration
pub mod backend_names {
    pub const BLANK: &str = "blank";
    pub const SIM: &str = "sim";
    pub const V4L2: &str = "v4l2";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Longest uninterrupted sleep of a producer thread before it re-checks its stop signal
    pub const PRODUCER_POLL_SLICE: Duration = Duration::from_millis(10);

    /// Grab timeout used by the command line tool when none is given (seconds)
    pub const DEFAULT_GRAB_TIMEOUT_SECS: f32 = 2.0;
}

/// Defaults used when opening contexts
pub mod capture {
    /// Buffers requested by the command line tool
    pub const DEFAULT_NUM_BUFFERS: usize = 5;

    /// Rows of YUV codings are padded to a multiple of this many pixels
    pub const YUV_ROW_ALIGNMENT: u32 = 16;

    /// Framerate assumed when a device does not report one
    pub const FALLBACK_FRAMERATE: f32 = 30.0;
}
