// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   caller / api.rs   │
//! └──────────┬──────────┘
//!            │ device number
//!            ▼
//! ┌─────────────────────┐
//! │  BackendRegistry    │  ← flat device-number space over all backends
//! └──────────┬──────────┘
//!            │ local index
//!            ▼
//! ┌─────────────────────┐        ┌─────────────────────┐
//! │ CameraBackend trait │ ─open─▶│     CamContext      │  ← dispatch to session
//! └──────────┬──────────┘        └──────────┬──────────┘
//!            │                              ▼
//!   ┌────────┼────────┐          ┌─────────────────────┐
//!   ▼        ▼        ▼          │ CaptureSession trait│
//! blank     sim      v4l2        └─────────────────────┘
//! ```
//!
//! Backends are selected at build time through cargo features; the
//! configuration decides which of the compiled-in backends are probed and
//! in which order.

pub mod blank;
pub mod capture;
pub mod context;
pub mod frame_loop;
pub mod registry;
#[cfg(feature = "sim")]
pub mod sim;
pub mod types;
#[cfg(all(feature = "v4l2", target_os = "linux", target_pointer_width = "64"))]
pub mod v4l2;

pub use context::{CamContext, ContextConstructor};
pub use registry::{BackendCandidate, BackendRange, BackendRegistry};
pub use types::*;

use crate::config::Config;
use crate::constants::backend_names;
use crate::errors::{CamError, CamResult};

/// Process-level entry points of one backend
///
/// Device numbers passed to a backend are always local: `0..num_cameras()`.
pub trait CameraBackend: Send {
    /// Short name used in logs and configuration
    fn driver_name(&self) -> &'static str;

    /// Probe the hardware. Called once, before any other method.
    fn startup(&mut self) -> CamResult<()>;

    /// Release process-wide resources. Contexts already handed out stay valid.
    fn shutdown(&mut self) -> CamResult<()>;

    fn num_cameras(&self) -> usize;

    fn camera_info(&self, device: usize) -> CamResult<CameraIdentity>;

    fn num_modes(&self, device: usize) -> CamResult<usize>;

    fn mode_string(&self, device: usize, mode: usize) -> CamResult<String>;

    /// Open a capture session: negotiate `mode` and allocate `num_buffers` buffers.
    ///
    /// On failure nothing stays allocated.
    fn open(
        &self,
        device: usize,
        num_buffers: usize,
        mode: usize,
    ) -> CamResult<Box<dyn CaptureSession>>;
}

/// Operations on one open camera
///
/// Implementations own their device handle and buffer pool. A session is
/// driven from one thread at a time; every mutating call takes `&mut self`.
pub trait CaptureSession: Send {
    /// Pixel coding negotiated at construction
    fn coding(&self) -> PixelCoding;

    /// Bits per pixel
    fn depth(&self) -> u32 {
        self.coding().depth()
    }

    // ===== Streaming =====

    /// Begin capture; restarts if already capturing
    fn start(&mut self) -> CamResult<()>;

    /// End capture; no-op when idle
    fn stop(&mut self) -> CamResult<()>;

    /// Wait for the next frame and copy it into `dest`, rows `stride` bytes apart
    fn grab_next_frame_with_stride(
        &mut self,
        dest: &mut [u8],
        stride: usize,
        timeout: Timeout,
    ) -> CamResult<GrabbedFrame>;

    /// Grab into a tightly packed buffer (`width * depth / 8` bytes per row)
    fn grab_next_frame(&mut self, dest: &mut [u8], timeout: Timeout) -> CamResult<GrabbedFrame> {
        let (width, _) = self.frame_size()?;
        let stride = width as usize * self.depth() as usize / 8;
        self.grab_next_frame_with_stride(dest, stride, timeout)
    }

    /// Wait for the next frame and expose it without copying
    fn point_next_frame(&mut self, _timeout: Timeout) -> CamResult<PointedFrame<'_>> {
        Err(CamError::NotImplemented("point_next_frame_blocking"))
    }

    /// Give a pointed frame back
    fn unpoint_frame(&mut self) -> CamResult<()> {
        Err(CamError::NotImplemented("unpoint_frame"))
    }

    fn last_timestamp(&self) -> CamResult<f64>;

    fn last_framenumber(&self) -> CamResult<i64>;

    // ===== Properties =====

    fn num_properties(&self) -> CamResult<usize>;

    fn property_info(&self, index: usize) -> CamResult<PropertyInfo>;

    fn property(&self, index: usize) -> CamResult<PropertyValue>;

    /// Apply value and auto/manual mode in one step
    fn set_property(&mut self, index: usize, value: PropertyValue) -> CamResult<()>;

    // ===== Trigger modes =====

    fn num_trigger_modes(&self) -> CamResult<usize>;

    fn trigger_mode_string(&self, index: usize) -> CamResult<String>;

    fn trigger_mode_number(&self) -> CamResult<usize>;

    fn set_trigger_mode_number(&mut self, index: usize) -> CamResult<()>;

    // ===== Geometry and buffers =====

    fn frame_offset(&self) -> CamResult<(u32, u32)>;

    fn set_frame_offset(&mut self, left: u32, top: u32) -> CamResult<()>;

    fn frame_size(&self) -> CamResult<(u32, u32)>;

    fn set_frame_size(&mut self, width: u32, height: u32) -> CamResult<()>;

    fn max_frame_size(&self) -> CamResult<(u32, u32)>;

    /// Bytes of one pool buffer, row padding included
    fn buffer_size(&self) -> CamResult<usize>;

    fn framerate(&self) -> CamResult<f32>;

    fn set_framerate(&mut self, framerate: f32) -> CamResult<()>;

    fn num_framebuffers(&self) -> CamResult<usize>;

    fn set_num_framebuffers(&mut self, count: usize) -> CamResult<()>;

    // ===== Teardown =====

    /// Stop if needed, then release buffers and the device
    fn close(&mut self) -> CamResult<()>;
}

/// Backends built into this binary, in default probe order
pub fn compiled_candidates() -> Vec<BackendCandidate> {
    let mut candidates = Vec::new();

    #[cfg(all(feature = "v4l2", target_os = "linux", target_pointer_width = "64"))]
    candidates.push(BackendCandidate::new(backend_names::V4L2, |config: &Config| {
        Ok(Box::new(v4l2::V4l2Backend::new(&config.v4l2)) as Box<dyn CameraBackend>)
    }));

    #[cfg(feature = "sim")]
    candidates.push(BackendCandidate::new(backend_names::SIM, |config: &Config| {
        Ok(Box::new(sim::SimBackend::new(&config.sim)) as Box<dyn CameraBackend>)
    }));

    candidates.push(BackendCandidate::new(backend_names::BLANK, |config: &Config| {
        Ok(Box::new(blank::BlankBackend::new(&config.blank)) as Box<dyn CameraBackend>)
    }));

    candidates
}

/// Backend names accepted in the configuration
pub fn known_backend_names() -> &'static [&'static str] {
    &[backend_names::V4L2, backend_names::SIM, backend_names::BLANK]
}
