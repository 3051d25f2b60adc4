// SPDX-License-Identifier: GPL-3.0-only

//! Software cameras
//!
//! Each configured camera produces a moving test pattern at its mode's
//! framerate. The transport decides which capture source drives it, so
//! every concurrency style of the capture engine can run without hardware.
//! Faults (missing rows, lost frames, a camera that never delivers) are
//! injected from the configuration.

pub mod sensor;
pub mod transports;

use self::sensor::{Sensor, SensorSettings, SharedSettings, lock};
use self::transports::{PacedBlockingSdk, PipeDriver, ThreadCallbackSdk};
use super::capture::blocking::BlockingSource;
use super::capture::callback::CallbackSource;
use super::capture::polling::PolledSource;
use super::capture::{CaptureEngine, FrameSource};
use super::types::{
    FrameBuffer, FrameLayout, GrabbedFrame, PixelCoding, PointedFrame, PropertyInfo,
    PropertyValue, Timeout,
};
use super::{CameraBackend, CameraIdentity, CaptureSession};
use crate::config::{SimCameraConfig, SimConfig, SimModeConfig, SimTransport};
use crate::constants::backend_names;
use crate::errors::{CamError, CamResult};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const PROP_BRIGHTNESS: usize = 0;
const PROP_GAIN: usize = 1;
const PROP_SHUTTER: usize = 2;
const PROP_WHITE_BALANCE: usize = 3;

const TRIGGER_MODES: [&str; 3] = [
    "internal trigger, freerunning",
    "external trigger, rising edge",
    "external trigger, falling edge",
];

const MAX_FRAMERATE: f32 = 1000.0;

fn property_table() -> [PropertyInfo; 4] {
    [
        PropertyInfo::manual("brightness", 0, 255),
        PropertyInfo::manual("gain", 0, 48).with_auto(),
        // Raw shutter is in microseconds
        PropertyInfo::manual("shutter", 50, 500_000)
            .with_auto()
            .scaled("msec", 0.0, 0.001),
        PropertyInfo::manual("white balance", 0, 1023),
    ]
}

/// Human readable description of a mode, e.g. `640 x 480 MONO8 30 fps`
pub fn mode_description(mode: &SimModeConfig) -> String {
    format!(
        "{} x {} {} {} fps",
        mode.width, mode.height, mode.coding, mode.framerate
    )
}

pub struct SimBackend {
    cameras: Vec<SimCameraConfig>,
}

impl SimBackend {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            cameras: config.cameras.clone(),
        }
    }

    fn camera(&self, device: usize) -> CamResult<&SimCameraConfig> {
        self.cameras.get(device).ok_or_else(|| {
            CamError::DeviceNotFound(format!(
                "software camera {} does not exist ({} configured)",
                device,
                self.cameras.len()
            ))
        })
    }

    fn mode(&self, device: usize, mode: usize) -> CamResult<&SimModeConfig> {
        self.camera(device)?
            .modes
            .get(mode)
            .ok_or_else(|| CamError::InvalidArgument(format!("mode {} does not exist", mode)))
    }
}

impl CameraBackend for SimBackend {
    fn driver_name(&self) -> &'static str {
        backend_names::SIM
    }

    fn startup(&mut self) -> CamResult<()> {
        for (device, camera) in self.cameras.iter().enumerate() {
            debug!(
                device,
                model = %camera.model,
                transport = ?camera.transport,
                modes = camera.modes.len(),
                "Software camera configured"
            );
        }
        Ok(())
    }

    fn shutdown(&mut self) -> CamResult<()> {
        Ok(())
    }

    fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    fn camera_info(&self, device: usize) -> CamResult<CameraIdentity> {
        let camera = self.camera(device)?;
        Ok(CameraIdentity {
            vendor: camera.vendor.clone(),
            model: camera.model.clone(),
            chip: camera.chip.clone(),
        })
    }

    fn num_modes(&self, device: usize) -> CamResult<usize> {
        Ok(self.camera(device)?.modes.len())
    }

    fn mode_string(&self, device: usize, mode: usize) -> CamResult<String> {
        Ok(mode_description(self.mode(device, mode)?))
    }

    fn open(
        &self,
        device: usize,
        num_buffers: usize,
        mode: usize,
    ) -> CamResult<Box<dyn CaptureSession>> {
        let camera = self.camera(device)?.clone();
        let mode = *self.mode(device, mode)?;
        let session = SimSession::open(device, camera, mode, num_buffers)?;
        Ok(Box::new(session))
    }
}

/// One open software camera
pub struct SimSession {
    name: String,
    camera: SimCameraConfig,
    mode: SimModeConfig,
    settings: SharedSettings,
    engine: CaptureEngine,
    offset: (u32, u32),
    size: (u32, u32),
    num_buffers: usize,
}

impl SimSession {
    pub fn open(
        device: usize,
        camera: SimCameraConfig,
        mode: SimModeConfig,
        num_buffers: usize,
    ) -> CamResult<Self> {
        if num_buffers == 0 {
            return Err(CamError::InvalidArgument(
                "at least one frame buffer is required".to_string(),
            ));
        }
        if mode.coding == PixelCoding::Unknown {
            return Err(CamError::InvalidArgument(
                "mode has no capturable pixel coding".to_string(),
            ));
        }
        if mode.width == 0 || mode.height == 0 {
            return Err(CamError::InvalidArgument(format!(
                "mode size {}x{} is empty",
                mode.width, mode.height
            )));
        }
        if !(mode.framerate > 0.0 && mode.framerate <= MAX_FRAMERATE) {
            return Err(CamError::InvalidArgument(format!(
                "mode framerate {} is out of range",
                mode.framerate
            )));
        }

        let name = format!("sim-{}", device);
        let settings = Arc::new(Mutex::new(SensorSettings {
            framerate: mode.framerate,
            ..SensorSettings::default()
        }));
        let layout = FrameLayout::for_coding(mode.width, mode.height, mode.coding);
        let source = build_source(&name, &camera, &settings, layout, num_buffers)?;

        info!(
            name = %name,
            mode = %mode_description(&mode),
            transport = ?camera.transport,
            num_buffers,
            "Software camera opened"
        );

        Ok(Self {
            name,
            camera,
            mode,
            settings,
            engine: CaptureEngine::new(source, layout),
            offset: (0, 0),
            size: (mode.width, mode.height),
            num_buffers,
        })
    }

    /// Reallocate the pool for a new size or buffer count
    fn rebuild(&mut self, size: (u32, u32), num_buffers: usize) -> CamResult<()> {
        let layout = FrameLayout::for_coding(size.0, size.1, self.mode.coding);
        let source = build_source(&self.name, &self.camera, &self.settings, layout, num_buffers)?;
        self.engine.replace_source(source, layout)?;
        self.size = size;
        self.num_buffers = num_buffers;
        debug!(name = %self.name, ?size, num_buffers, "Buffer pool reallocated");
        Ok(())
    }

    fn ensure_idle(&self, what: &str) -> CamResult<()> {
        if self.engine.is_streaming() {
            Err(CamError::Other(format!("cannot change {} while capturing", what)))
        } else {
            Ok(())
        }
    }

    fn check_roi(&self, offset: (u32, u32), size: (u32, u32)) -> CamResult<()> {
        let fits = |start: u32, len: u32, max: u32| start.checked_add(len).is_some_and(|end| end <= max);
        if size.0 == 0
            || size.1 == 0
            || !fits(offset.0, size.0, self.mode.width)
            || !fits(offset.1, size.1, self.mode.height)
        {
            return Err(CamError::InvalidArgument(format!(
                "region {}x{}+{}+{} exceeds the {}x{} sensor",
                size.0, size.1, offset.0, offset.1, self.mode.width, self.mode.height
            )));
        }
        Ok(())
    }
}

fn build_source(
    name: &str,
    camera: &SimCameraConfig,
    settings: &SharedSettings,
    layout: FrameLayout,
    num_buffers: usize,
) -> CamResult<Box<dyn FrameSource>> {
    let buffers: Vec<FrameBuffer> = (0..num_buffers)
        .map(|index| FrameBuffer::owned(index, layout.buffer_size()))
        .collect();
    let sensor = Sensor::new(layout, Arc::clone(settings), camera.faults);

    let source: Box<dyn FrameSource> = match camera.transport {
        SimTransport::Polled => Box::new(PolledSource::new(PipeDriver::new(name, sensor, buffers)?)),
        SimTransport::Callback => Box::new(CallbackSource::new(
            ThreadCallbackSdk::new(name, sensor, buffers),
            num_buffers,
        )),
        SimTransport::Blocking => Box::new(BlockingSource::new(PacedBlockingSdk::new(sensor, buffers))),
    };
    Ok(source)
}

impl CaptureSession for SimSession {
    fn coding(&self) -> PixelCoding {
        self.mode.coding
    }

    fn start(&mut self) -> CamResult<()> {
        self.engine.start()?;
        debug!(name = %self.name, "Capture started");
        Ok(())
    }

    fn stop(&mut self) -> CamResult<()> {
        self.engine.stop()
    }

    fn grab_next_frame_with_stride(
        &mut self,
        dest: &mut [u8],
        stride: usize,
        timeout: Timeout,
    ) -> CamResult<GrabbedFrame> {
        self.engine.grab(dest, stride, timeout)
    }

    fn point_next_frame(&mut self, timeout: Timeout) -> CamResult<PointedFrame<'_>> {
        self.engine.point(timeout)
    }

    fn unpoint_frame(&mut self) -> CamResult<()> {
        self.engine.unpoint()
    }

    fn last_timestamp(&self) -> CamResult<f64> {
        Ok(self.engine.last_timestamp())
    }

    fn last_framenumber(&self) -> CamResult<i64> {
        Ok(self.engine.last_framenumber())
    }

    fn num_properties(&self) -> CamResult<usize> {
        Ok(property_table().len())
    }

    fn property_info(&self, index: usize) -> CamResult<PropertyInfo> {
        property_table()
            .into_iter()
            .nth(index)
            .ok_or_else(|| CamError::InvalidArgument(format!("property {} does not exist", index)))
    }

    fn property(&self, index: usize) -> CamResult<PropertyValue> {
        let settings = lock(&self.settings);
        match index {
            PROP_BRIGHTNESS => Ok(PropertyValue::manual(settings.brightness)),
            PROP_GAIN => Ok(settings.gain),
            PROP_SHUTTER => Ok(settings.shutter),
            PROP_WHITE_BALANCE => Ok(PropertyValue::default()),
            _ => Err(CamError::InvalidArgument(format!("property {} does not exist", index))),
        }
    }

    fn set_property(&mut self, index: usize, value: PropertyValue) -> CamResult<()> {
        let info = self.property_info(index)?;
        if !info.accepts(&value) {
            return Err(CamError::InvalidArgument(format!(
                "{} does not accept {} (auto: {})",
                info.name, value.value, value.auto
            )));
        }

        let mut settings = lock(&self.settings);
        match index {
            PROP_BRIGHTNESS => settings.brightness = value.value,
            // Auto mode keeps the last manual value
            PROP_GAIN | PROP_SHUTTER => {
                let slot = if index == PROP_GAIN {
                    &mut settings.gain
                } else {
                    &mut settings.shutter
                };
                slot.auto = value.auto;
                if !value.auto {
                    slot.value = value.value;
                }
            }
            _ => warn!(name = %self.name, property = %info.name, "Property is read-only on software cameras, ignoring"),
        }
        Ok(())
    }

    fn num_trigger_modes(&self) -> CamResult<usize> {
        Ok(TRIGGER_MODES.len())
    }

    fn trigger_mode_string(&self, index: usize) -> CamResult<String> {
        TRIGGER_MODES
            .get(index)
            .map(|s| s.to_string())
            .ok_or_else(|| CamError::InvalidArgument("trigger mode number invalid".to_string()))
    }

    fn trigger_mode_number(&self) -> CamResult<usize> {
        Ok(lock(&self.settings).trigger_mode)
    }

    fn set_trigger_mode_number(&mut self, index: usize) -> CamResult<()> {
        if index >= TRIGGER_MODES.len() {
            return Err(CamError::InvalidArgument("trigger mode number invalid".to_string()));
        }
        lock(&self.settings).trigger_mode = index;
        Ok(())
    }

    fn frame_offset(&self) -> CamResult<(u32, u32)> {
        Ok(self.offset)
    }

    fn set_frame_offset(&mut self, left: u32, top: u32) -> CamResult<()> {
        self.ensure_idle("frame offset")?;
        self.check_roi((left, top), self.size)?;
        self.offset = (left, top);
        Ok(())
    }

    fn frame_size(&self) -> CamResult<(u32, u32)> {
        Ok(self.size)
    }

    fn set_frame_size(&mut self, width: u32, height: u32) -> CamResult<()> {
        self.ensure_idle("frame size")?;
        self.check_roi(self.offset, (width, height))?;
        if (width, height) == self.size {
            return Ok(());
        }
        self.rebuild((width, height), self.num_buffers)
    }

    fn max_frame_size(&self) -> CamResult<(u32, u32)> {
        Ok((self.mode.width, self.mode.height))
    }

    fn buffer_size(&self) -> CamResult<usize> {
        Ok(self.engine.layout().buffer_size())
    }

    fn framerate(&self) -> CamResult<f32> {
        Ok(lock(&self.settings).framerate)
    }

    fn set_framerate(&mut self, framerate: f32) -> CamResult<()> {
        if !(framerate > 0.0 && framerate <= MAX_FRAMERATE) {
            return Err(CamError::InvalidArgument(format!(
                "framerate {} is out of range",
                framerate
            )));
        }
        lock(&self.settings).framerate = framerate;
        Ok(())
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
        self.rebuild(self.size, count)
    }

    fn close(&mut self) -> CamResult<()> {
        self.engine.stop()?;
        info!(name = %self.name, "Software camera closed");
        Ok(())
    }
}
