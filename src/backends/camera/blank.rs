// SPDX-License-Identifier: GPL-3.0-only

//! Null backend
//!
//! Enumerates a configurable number of cameras that can be opened and
//! closed but never produce frames. Useful to exercise callers without
//! hardware.

use super::types::{GrabbedFrame, PixelCoding, PropertyInfo, PropertyValue, Timeout};
use super::{CameraBackend, CameraIdentity, CaptureSession};
use crate::config::BlankConfig;
use crate::constants::backend_names;
use crate::errors::{CamError, CamResult};
use tracing::{debug, warn};

const MODE_STRING: &str = "(blank mode string)";
const TRIGGER_MODE: &str = "default trigger mode";

pub struct BlankBackend {
    num_cameras: usize,
}

impl BlankBackend {
    pub fn new(config: &BlankConfig) -> Self {
        Self {
            num_cameras: config.num_cameras,
        }
    }

    fn check_device(&self, device: usize) -> CamResult<()> {
        if device < self.num_cameras {
            Ok(())
        } else {
            Err(CamError::DeviceNotFound(
                "requested too high camera number".to_string(),
            ))
        }
    }
}

impl CameraBackend for BlankBackend {
    fn driver_name(&self) -> &'static str {
        backend_names::BLANK
    }

    fn startup(&mut self) -> CamResult<()> {
        debug!(num_cameras = self.num_cameras, "Blank backend started");
        Ok(())
    }

    fn shutdown(&mut self) -> CamResult<()> {
        Ok(())
    }

    fn num_cameras(&self) -> usize {
        self.num_cameras
    }

    fn camera_info(&self, device: usize) -> CamResult<CameraIdentity> {
        self.check_device(device)?;
        Ok(CameraIdentity {
            vendor: "cam_iface".to_string(),
            model: "blank camera".to_string(),
            chip: format!("blank-{}", device),
        })
    }

    fn num_modes(&self, device: usize) -> CamResult<usize> {
        self.check_device(device)?;
        Ok(1)
    }

    fn mode_string(&self, device: usize, mode: usize) -> CamResult<String> {
        self.check_device(device)?;
        if mode != 0 {
            return Err(CamError::InvalidArgument(format!("mode {} does not exist", mode)));
        }
        Ok(MODE_STRING.to_string())
    }

    fn open(
        &self,
        device: usize,
        num_buffers: usize,
        mode: usize,
    ) -> CamResult<Box<dyn CaptureSession>> {
        self.check_device(device)?;
        if mode != 0 {
            return Err(CamError::InvalidArgument(format!("mode {} does not exist", mode)));
        }
        debug!(device, num_buffers, "Opened blank camera");
        Ok(Box::new(BlankSession))
    }
}

/// Session that accepts start/stop and reports everything else as unsupported
pub struct BlankSession;

impl CaptureSession for BlankSession {
    fn coding(&self) -> PixelCoding {
        PixelCoding::Mono8
    }

    fn start(&mut self) -> CamResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> CamResult<()> {
        Ok(())
    }

    fn grab_next_frame_with_stride(
        &mut self,
        _dest: &mut [u8],
        _stride: usize,
        _timeout: Timeout,
    ) -> CamResult<GrabbedFrame> {
        Err(CamError::NotImplemented("grab_next_frame_blocking_with_stride"))
    }

    fn grab_next_frame(&mut self, _dest: &mut [u8], _timeout: Timeout) -> CamResult<GrabbedFrame> {
        Err(CamError::NotImplemented("grab_next_frame_blocking"))
    }

    fn last_timestamp(&self) -> CamResult<f64> {
        Err(CamError::NotImplemented("get_last_timestamp"))
    }

    fn last_framenumber(&self) -> CamResult<i64> {
        Err(CamError::NotImplemented("get_last_framenumber"))
    }

    fn num_properties(&self) -> CamResult<usize> {
        warn!("Blank camera has no properties, returning 0");
        Ok(0)
    }

    fn property_info(&self, _index: usize) -> CamResult<PropertyInfo> {
        Err(CamError::NotImplemented("get_camera_property_info"))
    }

    fn property(&self, _index: usize) -> CamResult<PropertyValue> {
        Err(CamError::NotImplemented("get_camera_property"))
    }

    fn set_property(&mut self, _index: usize, _value: PropertyValue) -> CamResult<()> {
        Err(CamError::NotImplemented("set_camera_property"))
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
        Err(CamError::NotImplemented("get_frame_offset"))
    }

    fn set_frame_offset(&mut self, _left: u32, _top: u32) -> CamResult<()> {
        Err(CamError::NotImplemented("set_frame_offset"))
    }

    fn frame_size(&self) -> CamResult<(u32, u32)> {
        Err(CamError::NotImplemented("get_frame_size"))
    }

    fn set_frame_size(&mut self, _width: u32, _height: u32) -> CamResult<()> {
        Err(CamError::NotImplemented("set_frame_size"))
    }

    fn max_frame_size(&self) -> CamResult<(u32, u32)> {
        Err(CamError::NotImplemented("get_max_frame_size"))
    }

    fn buffer_size(&self) -> CamResult<usize> {
        Err(CamError::NotImplemented("get_buffer_size"))
    }

    fn framerate(&self) -> CamResult<f32> {
        Err(CamError::NotImplemented("get_framerate"))
    }

    fn set_framerate(&mut self, _framerate: f32) -> CamResult<()> {
        Err(CamError::NotImplemented("set_framerate"))
    }

    fn num_framebuffers(&self) -> CamResult<usize> {
        Err(CamError::NotImplemented("get_num_framebuffers"))
    }

    fn set_num_framebuffers(&mut self, _count: usize) -> CamResult<()> {
        Err(CamError::NotImplemented("set_num_framebuffers"))
    }

    fn close(&mut self) -> CamResult<()> {
        Ok(())
    }
}
