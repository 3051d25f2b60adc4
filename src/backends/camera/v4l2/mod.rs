// SPDX-License-Identifier: GPL-3.0-only

//! Video4Linux2 backend
//!
//! Device discovery and format negotiation go through the `v4l` crate.
//! Streaming uses memory-mapped buffers driven by raw ioctls (see
//! [`streaming`]) so buffers can be lent to callers without copying.

pub mod controls;
pub mod formats;
pub mod streaming;

use self::controls::{PROPERTIES, control_property};
use self::formats::{V4l2Mode, coding_for_fourcc, fourcc_str, fps_from_interval};
use self::streaming::MmapDriver;
use super::capture::CaptureEngine;
use super::capture::polling::PolledSource;
use super::types::{
    FrameLayout, GrabbedFrame, PixelCoding, PointedFrame, PropertyInfo, PropertyValue, Timeout,
};
use super::{CameraBackend, CameraIdentity, CaptureSession};
use crate::config::V4l2Config;
use crate::constants::backend_names;
use crate::constants::capture::FALLBACK_FRAMERATE;
use crate::errors::{CamError, CamResult};
use std::os::fd::RawFd;
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC, Fraction};

const TRIGGER_MODE: &str = "default trigger mode";

/// A capture device found at startup
#[derive(Debug, Clone)]
struct V4l2Camera {
    path: String,
    identity: CameraIdentity,
    modes: Vec<V4l2Mode>,
}

/// Every uncompressed mode a device offers.
///
/// Stepwise size ranges contribute their largest size only.
fn list_modes(device: &Device) -> Vec<V4l2Mode> {
    let Ok(formats) = device.enum_formats() else {
        return Vec::new();
    };

    let mut modes = Vec::new();
    for desc in formats {
        let fourcc = desc.fourcc.repr;
        let coding = coding_for_fourcc(&fourcc);
        if coding == PixelCoding::Unknown {
            debug!(fourcc = %fourcc_str(&fourcc), "Skipping unsupported pixel format");
            continue;
        }

        let Ok(sizes) = device.enum_framesizes(desc.fourcc) else {
            continue;
        };
        for size in sizes {
            let (width, height) = match size.size {
                FrameSizeEnum::Discrete(d) => (d.width, d.height),
                FrameSizeEnum::Stepwise(s) => (s.max_width, s.max_height),
            };

            let mut rates: Vec<f32> = device
                .enum_frameintervals(desc.fourcc, width, height)
                .map(|intervals| {
                    intervals
                        .into_iter()
                        .map(|interval| match interval.interval {
                            FrameIntervalEnum::Discrete(f) => fps_from_interval(f.numerator, f.denominator),
                            FrameIntervalEnum::Stepwise(s) => {
                                fps_from_interval(s.min.numerator, s.min.denominator)
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            if rates.is_empty() {
                rates.push(FALLBACK_FRAMERATE);
            }

            modes.extend(rates.into_iter().map(|framerate| V4l2Mode {
                fourcc,
                coding,
                width,
                height,
                framerate,
            }));
        }
    }
    modes
}

fn probe_device(path: &str) -> CamResult<Option<V4l2Camera>> {
    let device = Device::with_path(path)?;
    let caps = device.query_caps()?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) || !caps.capabilities.contains(Flags::STREAMING) {
        return Ok(None);
    }

    let modes = list_modes(&device);
    if modes.is_empty() {
        return Ok(None);
    }

    Ok(Some(V4l2Camera {
        path: path.to_string(),
        identity: CameraIdentity {
            vendor: caps.driver,
            model: caps.card,
            chip: caps.bus,
        },
        modes,
    }))
}

pub struct V4l2Backend {
    devices: Option<Vec<String>>,
    cameras: Vec<V4l2Camera>,
}

impl V4l2Backend {
    pub fn new(config: &V4l2Config) -> Self {
        Self {
            devices: config.devices.clone(),
            cameras: Vec::new(),
        }
    }

    fn camera(&self, device: usize) -> CamResult<&V4l2Camera> {
        self.cameras.get(device).ok_or_else(|| {
            CamError::DeviceNotFound(format!(
                "V4L2 camera {} does not exist ({} found)",
                device,
                self.cameras.len()
            ))
        })
    }

    fn mode(&self, device: usize, mode: usize) -> CamResult<&V4l2Mode> {
        self.camera(device)?
            .modes
            .get(mode)
            .ok_or_else(|| CamError::InvalidArgument(format!("mode {} does not exist", mode)))
    }
}

impl CameraBackend for V4l2Backend {
    fn driver_name(&self) -> &'static str {
        backend_names::V4L2
    }

    fn startup(&mut self) -> CamResult<()> {
        let mut paths = match &self.devices {
            Some(paths) => paths.clone(),
            None => v4l::context::enum_devices()
                .iter()
                .map(|node| node.path().to_string_lossy().into_owned())
                .collect(),
        };
        paths.sort();

        self.cameras.clear();
        for path in paths {
            match probe_device(&path) {
                Ok(Some(camera)) => {
                    info!(path = %path, camera = %camera.identity, modes = camera.modes.len(), "Found V4L2 camera");
                    self.cameras.push(camera);
                }
                Ok(None) => debug!(path = %path, "Not a usable capture device"),
                Err(e) => debug!(path = %path, error = %e, "Failed to probe device"),
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> CamResult<()> {
        self.cameras.clear();
        Ok(())
    }

    fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    fn camera_info(&self, device: usize) -> CamResult<CameraIdentity> {
        Ok(self.camera(device)?.identity.clone())
    }

    fn num_modes(&self, device: usize) -> CamResult<usize> {
        Ok(self.camera(device)?.modes.len())
    }

    fn mode_string(&self, device: usize, mode: usize) -> CamResult<String> {
        Ok(self.mode(device, mode)?.description())
    }

    fn open(
        &self,
        device: usize,
        num_buffers: usize,
        mode: usize,
    ) -> CamResult<Box<dyn CaptureSession>> {
        let camera = self.camera(device)?;
        let mode = *self.mode(device, mode)?;
        if num_buffers == 0 {
            return Err(CamError::InvalidArgument(
                "at least one frame buffer is required".to_string(),
            ));
        }

        let max_size = camera
            .modes
            .iter()
            .filter(|m| m.fourcc == mode.fourcc)
            .map(|m| (m.width, m.height))
            .max_by_key(|&(w, h)| w as u64 * h as u64)
            .unwrap_or((mode.width, mode.height));

        let session = V4l2Session::open(&camera.path, mode, max_size, num_buffers)?;
        Ok(Box::new(session))
    }
}

/// Switch a descriptor to non-blocking mode
fn set_nonblocking(fd: RawFd) -> CamResult<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Apply format and allocate the pool. Returns the engine, the size the
/// driver settled on and the number of buffers it granted.
fn configure(
    device: &Device,
    fourcc: [u8; 4],
    size: (u32, u32),
    num_buffers: usize,
) -> CamResult<(CaptureEngine, (u32, u32), usize)> {
    let format = device.set_format(&Format::new(size.0, size.1, FourCC::new(&fourcc)))?;
    if format.fourcc.repr != fourcc {
        return Err(CamError::Backend(format!(
            "driver picked {} instead of {}",
            fourcc_str(&format.fourcc.repr),
            fourcc_str(&fourcc)
        )));
    }

    let depth = coding_for_fourcc(&fourcc).depth();
    let stride = match format.stride {
        0 => format.width as usize * depth as usize / 8,
        stride => stride as usize,
    };
    let layout = FrameLayout::with_stride(format.width, format.height, depth, stride);
    let driver = MmapDriver::new(device.handle(), num_buffers, layout, format.size as usize)?;
    let granted = driver.num_buffers();

    let engine = CaptureEngine::new(Box::new(PolledSource::new(driver)), layout);
    Ok((engine, (format.width, format.height), granted))
}

/// One open V4L2 device
pub struct V4l2Session {
    path: String,
    mode: V4l2Mode,
    max_size: (u32, u32),
    size: (u32, u32),
    num_buffers: usize,
    // Dropped before `device` so buffers are unmapped while the descriptor is open
    engine: Option<CaptureEngine>,
    device: Device,
}

impl V4l2Session {
    fn open(path: &str, mode: V4l2Mode, max_size: (u32, u32), num_buffers: usize) -> CamResult<Self> {
        let device = Device::with_path(path)?;
        set_nonblocking(device.handle().fd())?;

        let (engine, size, granted) = configure(&device, mode.fourcc, (mode.width, mode.height), num_buffers)?;

        let mut session = Self {
            path: path.to_string(),
            mode,
            max_size,
            size,
            num_buffers: granted,
            engine: Some(engine),
            device,
        };
        if let Err(e) = session.apply_framerate(mode.framerate) {
            warn!(path, error = %e, "Driver rejected the mode framerate");
        }

        info!(path, mode = %mode.description(), num_buffers = granted, "V4L2 camera opened");
        Ok(session)
    }

    fn fd(&self) -> RawFd {
        self.device.handle().fd()
    }

    fn engine(&self) -> CamResult<&CaptureEngine> {
        self.engine
            .as_ref()
            .ok_or_else(|| CamError::Other("camera has no buffers allocated".to_string()))
    }

    fn engine_mut(&mut self) -> CamResult<&mut CaptureEngine> {
        self.engine
            .as_mut()
            .ok_or_else(|| CamError::Other("camera has no buffers allocated".to_string()))
    }

    fn ensure_idle(&self, what: &str) -> CamResult<()> {
        if self.engine.as_ref().is_some_and(CaptureEngine::is_streaming) {
            Err(CamError::Other(format!("cannot change {} while capturing", what)))
        } else {
            Ok(())
        }
    }

    /// Free the pool, renegotiate, and reallocate.
    ///
    /// On failure the previous configuration is restored when possible.
    fn reconfigure(&mut self, size: (u32, u32), num_buffers: usize) -> CamResult<()> {
        let previous = (self.size, self.num_buffers);
        self.engine = None;

        match configure(&self.device, self.mode.fourcc, size, num_buffers) {
            Ok((engine, size, granted)) => {
                self.engine = Some(engine);
                self.size = size;
                self.num_buffers = granted;
                debug!(path = %self.path, ?size, num_buffers = granted, "Buffers reallocated");
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path, error = %e, "Reconfiguration failed, restoring previous format");
                if let Ok((engine, size, granted)) =
                    configure(&self.device, self.mode.fourcc, previous.0, previous.1)
                {
                    self.engine = Some(engine);
                    self.size = size;
                    self.num_buffers = granted;
                }
                Err(e)
            }
        }
    }

    fn apply_framerate(&mut self, framerate: f32) -> CamResult<()> {
        let denominator = (framerate * 1000.0).round() as u32;
        let params = self
            .device
            .set_params(&Parameters::new(Fraction::new(1000, denominator)))?;
        debug!(
            path = %self.path,
            requested = framerate,
            actual = fps_from_interval(params.interval.numerator, params.interval.denominator),
            "Frame interval set"
        );
        Ok(())
    }
}

impl CaptureSession for V4l2Session {
    fn coding(&self) -> PixelCoding {
        self.mode.coding
    }

    fn start(&mut self) -> CamResult<()> {
        self.engine_mut()?.start()
    }

    fn stop(&mut self) -> CamResult<()> {
        match self.engine.as_mut() {
            Some(engine) => engine.stop(),
            None => Ok(()),
        }
    }

    fn grab_next_frame_with_stride(
        &mut self,
        dest: &mut [u8],
        stride: usize,
        timeout: Timeout,
    ) -> CamResult<GrabbedFrame> {
        self.engine_mut()?.grab(dest, stride, timeout)
    }

    fn point_next_frame(&mut self, timeout: Timeout) -> CamResult<PointedFrame<'_>> {
        self.engine_mut()?.point(timeout)
    }

    fn unpoint_frame(&mut self) -> CamResult<()> {
        self.engine_mut()?.unpoint()
    }

    fn last_timestamp(&self) -> CamResult<f64> {
        Ok(self.engine()?.last_timestamp())
    }

    fn last_framenumber(&self) -> CamResult<i64> {
        Ok(self.engine()?.last_framenumber())
    }

    fn num_properties(&self) -> CamResult<usize> {
        Ok(PROPERTIES.len())
    }

    fn property_info(&self, index: usize) -> CamResult<PropertyInfo> {
        Ok(control_property(index)?.describe(self.fd()))
    }

    fn property(&self, index: usize) -> CamResult<PropertyValue> {
        control_property(index)?.read(self.fd())
    }

    fn set_property(&mut self, index: usize, value: PropertyValue) -> CamResult<()> {
        control_property(index)?.write(self.fd(), value)
    }

    fn num_trigger_modes(&self) -> CamResult<usize> {
        Ok(1)
    }

    fn trigger_mode_string(&self, index: usize) -> CamResult<String> {
        match index {
            0 => Ok(TRIGGER_MODE.to_string()),
            _ => Err(CamError::InvalidArgument("trigger mode number invalid".to_string())),
        }
    }

    fn trigger_mode_number(&self) -> CamResult<usize> {
        Ok(0)
    }

    fn set_trigger_mode_number(&mut self, index: usize) -> CamResult<()> {
        match index {
            0 => Ok(()),
            _ => Err(CamError::InvalidArgument("trigger mode number invalid".to_string())),
        }
    }

    fn frame_offset(&self) -> CamResult<(u32, u32)> {
        Ok((0, 0))
    }

    fn set_frame_offset(&mut self, left: u32, top: u32) -> CamResult<()> {
        if (left, top) == (0, 0) {
            return Ok(());
        }
        Err(CamError::HardwareFeatureNotAvailable(
            "frame offset is not supported on V4L2 devices".to_string(),
        ))
    }

    fn frame_size(&self) -> CamResult<(u32, u32)> {
        Ok(self.size)
    }

    fn set_frame_size(&mut self, width: u32, height: u32) -> CamResult<()> {
        self.ensure_idle("frame size")?;
        if width == 0 || height == 0 || width > self.max_size.0 || height > self.max_size.1 {
            return Err(CamError::InvalidArgument(format!(
                "frame size {}x{} exceeds {}x{}",
                width, height, self.max_size.0, self.max_size.1
            )));
        }
        if (width, height) == self.size {
            return Ok(());
        }
        self.reconfigure((width, height), self.num_buffers)
    }

    fn max_frame_size(&self) -> CamResult<(u32, u32)> {
        Ok(self.max_size)
    }

    fn buffer_size(&self) -> CamResult<usize> {
        Ok(self.engine()?.layout().buffer_size())
    }

    fn framerate(&self) -> CamResult<f32> {
        let params = self.device.params()?;
        Ok(fps_from_interval(params.interval.numerator, params.interval.denominator))
    }

    fn set_framerate(&mut self, framerate: f32) -> CamResult<()> {
        self.ensure_idle("framerate")?;
        if !(framerate.is_finite() && framerate > 0.0) {
            return Err(CamError::InvalidArgument(format!(
                "framerate {} is out of range",
                framerate
            )));
        }
        self.apply_framerate(framerate)
    }

    fn num_framebuffers(&self) -> CamResult<usize> {
        Ok(self.num_buffers)
    }

    fn set_num_framebuffers(&mut self, count: usize) -> CamResult<()> {
        self.ensure_idle("the number of frame buffers")?;
        if count == 0 {
            return Err(CamError::InvalidArgument(
                "at least one frame buffer is required".to_string(),
            ));
        }
        if count == self.num_buffers {
            return Ok(());
        }
        self.reconfigure(self.size, count)
    }

    fn close(&mut self) -> CamResult<()> {
        self.stop()?;
        self.engine = None;
        info!(path = %self.path, "V4L2 camera closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_nodes_are_skipped() {
        let mut backend = V4l2Backend::new(&V4l2Config {
            devices: Some(vec!["/nonexistent/video99".to_string()]),
        });
        backend.startup().unwrap();
        assert_eq!(backend.num_cameras(), 0);
        assert!(matches!(
            backend.camera_info(0),
            Err(CamError::DeviceNotFound(_))
        ));
        assert!(backend.open(0, 5, 0).is_err());
    }
}
