// SPDX-License-Identifier: GPL-3.0-only

//! Backend-agnostic handle over an open capture session

use super::types::{
    GrabbedFrame, PixelCoding, PointedFrame, PropertyInfo, PropertyValue, Timeout,
};
use super::{CameraBackend, CaptureSession};
use crate::errors::CamResult;
use tracing::{debug, info, warn};

/// One open camera
///
/// Every operation is forwarded to the backend session that created it.
/// `coding`, `depth` and the device number are fixed at construction.
/// Dropping a context that was not destroyed explicitly still stops the
/// camera and releases its buffers.
pub struct CamContext {
    session: Box<dyn CaptureSession>,
    coding: PixelCoding,
    depth: u32,
    device_number: usize,
    backend: &'static str,
    closed: bool,
}

impl CamContext {
    pub(crate) fn new(
        session: Box<dyn CaptureSession>,
        device_number: usize,
        backend: &'static str,
    ) -> Self {
        let coding = session.coding();
        let depth = session.depth();
        info!(device_number, backend, %coding, depth, "Camera context created");
        Self {
            session,
            coding,
            depth,
            device_number,
            backend,
            closed: false,
        }
    }

    pub fn coding(&self) -> PixelCoding {
        self.coding
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Global device number this context was opened on
    pub fn device_number(&self) -> usize {
        self.device_number
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    pub fn start(&mut self) -> CamResult<()> {
        self.session.start()
    }

    pub fn stop(&mut self) -> CamResult<()> {
        self.session.stop()
    }

    pub fn num_properties(&self) -> CamResult<usize> {
        self.session.num_properties()
    }

    pub fn property_info(&self, index: usize) -> CamResult<PropertyInfo> {
        self.session.property_info(index)
    }

    pub fn property(&self, index: usize) -> CamResult<PropertyValue> {
        self.session.property(index)
    }

    pub fn set_property(&mut self, index: usize, value: PropertyValue) -> CamResult<()> {
        self.session.set_property(index, value)
    }

    /// Grab into a tightly packed buffer (`width * depth / 8` bytes per row)
    pub fn grab_next_frame_blocking(
        &mut self,
        dest: &mut [u8],
        timeout: Timeout,
    ) -> CamResult<GrabbedFrame> {
        self.session.grab_next_frame(dest, timeout)
    }

    pub fn grab_next_frame_blocking_with_stride(
        &mut self,
        dest: &mut [u8],
        stride: usize,
        timeout: Timeout,
    ) -> CamResult<GrabbedFrame> {
        self.session.grab_next_frame_with_stride(dest, stride, timeout)
    }

    /// Zero-copy grab; the frame stays valid until [`Self::unpoint_frame`]
    pub fn point_next_frame_blocking(&mut self, timeout: Timeout) -> CamResult<PointedFrame<'_>> {
        self.session.point_next_frame(timeout)
    }

    pub fn unpoint_frame(&mut self) -> CamResult<()> {
        self.session.unpoint_frame()
    }

    pub fn last_timestamp(&self) -> CamResult<f64> {
        self.session.last_timestamp()
    }

    pub fn last_framenumber(&self) -> CamResult<i64> {
        self.session.last_framenumber()
    }

    pub fn num_trigger_modes(&self) -> CamResult<usize> {
        self.session.num_trigger_modes()
    }

    pub fn trigger_mode_string(&self, index: usize) -> CamResult<String> {
        self.session.trigger_mode_string(index)
    }

    pub fn trigger_mode_number(&self) -> CamResult<usize> {
        self.session.trigger_mode_number()
    }

    pub fn set_trigger_mode_number(&mut self, index: usize) -> CamResult<()> {
        self.session.set_trigger_mode_number(index)
    }

    pub fn frame_offset(&self) -> CamResult<(u32, u32)> {
        self.session.frame_offset()
    }

    pub fn set_frame_offset(&mut self, left: u32, top: u32) -> CamResult<()> {
        self.session.set_frame_offset(left, top)
    }

    pub fn frame_size(&self) -> CamResult<(u32, u32)> {
        self.session.frame_size()
    }

    pub fn set_frame_size(&mut self, width: u32, height: u32) -> CamResult<()> {
        self.session.set_frame_size(width, height)
    }

    pub fn max_frame_size(&self) -> CamResult<(u32, u32)> {
        self.session.max_frame_size()
    }

    pub fn buffer_size(&self) -> CamResult<usize> {
        self.session.buffer_size()
    }

    pub fn framerate(&self) -> CamResult<f32> {
        self.session.framerate()
    }

    pub fn set_framerate(&mut self, framerate: f32) -> CamResult<()> {
        self.session.set_framerate(framerate)
    }

    pub fn num_framebuffers(&self) -> CamResult<usize> {
        self.session.num_framebuffers()
    }

    pub fn set_num_framebuffers(&mut self, count: usize) -> CamResult<()> {
        self.session.set_num_framebuffers(count)
    }

    /// Stop capture and release every backend resource
    pub fn destroy(mut self) -> CamResult<()> {
        self.close_session()
    }

    fn close_session(&mut self) -> CamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(device_number = self.device_number, backend = self.backend, "Closing camera context");
        self.session.close()
    }
}

impl Drop for CamContext {
    fn drop(&mut self) {
        if let Err(e) = self.close_session() {
            warn!(device_number = self.device_number, error = %e, "Failed to close camera context");
        }
    }
}

impl std::fmt::Debug for CamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CamContext")
            .field("backend", &self.backend)
            .field("device_number", &self.device_number)
            .field("coding", &self.coding)
            .field("depth", &self.depth)
            .finish()
    }
}

/// Constructor for one global device, as picked by the registry
pub struct ContextConstructor<'a> {
    pub(crate) backend: &'a dyn CameraBackend,
    pub(crate) local_index: usize,
    pub(crate) device_number: usize,
}

impl ContextConstructor<'_> {
    pub fn backend_name(&self) -> &'static str {
        self.backend.driver_name()
    }

    pub fn local_index(&self) -> usize {
        self.local_index
    }

    pub fn construct(&self, num_buffers: usize, mode: usize) -> CamResult<CamContext> {
        let session = self.backend.open(self.local_index, num_buffers, mode)?;
        Ok(CamContext::new(
            session,
            self.device_number,
            self.backend.driver_name(),
        ))
    }
}
