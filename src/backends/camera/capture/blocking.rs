// SPDX-License-Identifier: GPL-3.0-only

//! Capture through a vendor call that blocks by itself
//!
//! The wrapper adds what such layers tend not to provide: a host timestamp
//! and a running frame count when the vendor has none.

use super::FrameSource;
use crate::backends::camera::types::{FrameBuffer, Timeout, host_timestamp};
use crate::errors::CamResult;
use tracing::debug;

/// Vendor layer with a blocking retrieve call
pub trait BlockingSdk: Send {
    fn start_capture(&mut self) -> CamResult<()>;

    fn stop_capture(&mut self) -> CamResult<()>;

    /// Block until the next frame or the timeout.
    ///
    /// A negative `meta.framenumber` on the returned buffer means the vendor
    /// does not count frames.
    fn retrieve_buffer(&mut self, timeout: Timeout) -> CamResult<FrameBuffer>;

    fn release_buffer(&mut self, buffer: FrameBuffer) -> CamResult<()>;
}

/// [`FrameSource`] over a [`BlockingSdk`]
pub struct BlockingSource<S: BlockingSdk> {
    sdk: S,
    streaming: bool,
    retrieved: i64,
}

impl<S: BlockingSdk> BlockingSource<S> {
    pub fn new(sdk: S) -> Self {
        Self {
            sdk,
            streaming: false,
            retrieved: 0,
        }
    }
}

impl<S: BlockingSdk> FrameSource for BlockingSource<S> {
    fn start(&mut self) -> CamResult<()> {
        self.sdk.start_capture()?;
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> CamResult<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.sdk.stop_capture()
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn acquire(&mut self, timeout: Timeout) -> CamResult<FrameBuffer> {
        let mut buffer = self.sdk.retrieve_buffer(timeout)?;

        buffer.meta.timestamp = host_timestamp();
        if buffer.meta.framenumber < 0 {
            buffer.meta.framenumber = self.retrieved;
        }
        self.retrieved += 1;

        if let Some(advisory) = buffer.meta.status.advisory() {
            debug!(framenumber = buffer.meta.framenumber, ?advisory, "Vendor flagged frame");
        }
        Ok(buffer)
    }

    fn release(&mut self, buffer: FrameBuffer) -> CamResult<()> {
        self.sdk.release_buffer(buffer)
    }
}

impl<S: BlockingSdk> Drop for BlockingSource<S> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
