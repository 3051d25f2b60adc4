// SPDX-License-Identifier: GPL-3.0-only

//! Capture state machine shared by every streaming backend
//!
//! A backend only has to provide a [`FrameSource`]: something that can be
//! started, stopped, asked for the next filled buffer and handed buffers
//! back. [`CaptureEngine`] layers the grab semantics on top of that:
//!
//! ```text
//!  Idle ──start──▶ Streaming ──acquire──▶ FrameReady
//!   ▲                  ▲                      │
//!   │                  └──────release─────────┘  (always, even on copy errors)
//!   └──────stop────────┘
//! ```
//!
//! Three sources cover the ways vendor layers deliver frames:
//!
//! - [`polling::PolledSource`]: a pollable descriptor plus a non-blocking dequeue
//! - [`callback::CallbackSource`]: frames pushed from a foreign thread through a bounded channel
//! - [`blocking::BlockingSource`]: a vendor call that blocks by itself

pub mod blocking;
pub mod callback;
pub mod polling;

use super::types::{FrameBuffer, FrameLayout, GrabbedFrame, PointedFrame, Timeout};
use crate::errors::{CamError, CamResult};
use tracing::{debug, warn};

/// Producer side of a buffer pool
pub trait FrameSource: Send {
    /// Hand every free buffer to the producer and begin filling them
    fn start(&mut self) -> CamResult<()>;

    /// Stop filling and take all buffers back. Must be a no-op when idle.
    fn stop(&mut self) -> CamResult<()>;

    fn is_streaming(&self) -> bool;

    /// Block until a filled buffer is available or the timeout elapses
    fn acquire(&mut self, timeout: Timeout) -> CamResult<FrameBuffer>;

    /// Requeue a buffer obtained from [`FrameSource::acquire`]
    fn release(&mut self, buffer: FrameBuffer) -> CamResult<()>;
}

/// Copy `height` rows of `row_bytes` between buffers with independent strides.
///
/// Bytes of `dst` past `row_bytes` in each row are left untouched.
pub fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    height: usize,
) -> CamResult<()> {
    if dst_stride < row_bytes {
        return Err(CamError::BufferOverflow(format!(
            "stride too small for image ({} < {})",
            dst_stride, row_bytes
        )));
    }
    if height == 0 || row_bytes == 0 {
        return Ok(());
    }

    let dst_needed = dst_stride * (height - 1) + row_bytes;
    if dst.len() < dst_needed {
        return Err(CamError::BufferOverflow(format!(
            "the buffer provided is not large enough ({} < {} bytes)",
            dst.len(),
            dst_needed
        )));
    }
    let src_needed = src_stride * (height - 1) + row_bytes;
    if src_stride < row_bytes || src.len() < src_needed {
        return Err(CamError::Other(format!(
            "frame buffer holds {} bytes, layout needs {}",
            src.len(),
            src_needed
        )));
    }

    for row in 0..height {
        let from = &src[row * src_stride..row * src_stride + row_bytes];
        dst[row * dst_stride..row * dst_stride + row_bytes].copy_from_slice(from);
    }
    Ok(())
}

/// Grab, point and bookkeeping logic over any [`FrameSource`]
pub struct CaptureEngine {
    // Declared before `source` so a pointed buffer is gone before its pool
    pointed: Option<FrameBuffer>,
    source: Box<dyn FrameSource>,
    layout: FrameLayout,
    last_timestamp: f64,
    last_framenumber: i64,
}

impl CaptureEngine {
    pub fn new(source: Box<dyn FrameSource>, layout: FrameLayout) -> Self {
        Self {
            pointed: None,
            source,
            layout,
            last_timestamp: 0.0,
            last_framenumber: -1,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn is_streaming(&self) -> bool {
        self.source.is_streaming()
    }

    pub fn last_timestamp(&self) -> f64 {
        self.last_timestamp
    }

    /// `-1` until the first frame arrives
    pub fn last_framenumber(&self) -> i64 {
        self.last_framenumber
    }

    /// Swap the pool for a new one. Only valid while idle.
    pub fn replace_source(
        &mut self,
        source: Box<dyn FrameSource>,
        layout: FrameLayout,
    ) -> CamResult<()> {
        if self.is_streaming() {
            return Err(CamError::Other(
                "cannot reallocate buffers while capturing".to_string(),
            ));
        }
        self.release_pointed()?;
        self.source = source;
        self.layout = layout;
        Ok(())
    }

    /// Start streaming, restarting if already streaming
    pub fn start(&mut self) -> CamResult<()> {
        self.release_pointed()?;
        if self.source.is_streaming() {
            debug!("start requested while streaming, restarting");
            self.source.stop()?;
        }
        self.source.start()
    }

    /// Stop streaming; no-op while idle
    pub fn stop(&mut self) -> CamResult<()> {
        self.release_pointed()?;
        if self.source.is_streaming() {
            self.source.stop()?;
        }
        Ok(())
    }

    /// Wait for the next frame and copy it row by row into `dest`
    pub fn grab(
        &mut self,
        dest: &mut [u8],
        dest_stride: usize,
        timeout: Timeout,
    ) -> CamResult<GrabbedFrame> {
        self.ensure_streaming()?;
        self.release_pointed()?;

        let buffer = self.source.acquire(timeout)?;
        let layout = self.layout;
        let copied = copy_rows(
            buffer.data(),
            layout.src_stride,
            dest,
            dest_stride,
            layout.row_bytes(),
            layout.height as usize,
        );
        let meta = buffer.meta;

        // Requeue before reporting anything so the pool never shrinks
        let released = self.source.release(buffer);
        copied?;
        released?;

        self.last_timestamp = meta.timestamp;
        self.last_framenumber = meta.framenumber;
        if let Some(advisory) = meta.status.advisory() {
            debug!(framenumber = meta.framenumber, ?advisory, "Frame flagged by transport");
        }

        Ok(GrabbedFrame {
            timestamp: meta.timestamp,
            framenumber: meta.framenumber,
            advisory: meta.status.advisory(),
        })
    }

    /// Wait for the next frame and keep it in the pool until [`Self::unpoint`]
    pub fn point(&mut self, timeout: Timeout) -> CamResult<PointedFrame<'_>> {
        self.ensure_streaming()?;
        self.release_pointed()?;

        let buffer = self.source.acquire(timeout)?;
        let meta = buffer.meta;
        self.last_timestamp = meta.timestamp;
        self.last_framenumber = meta.framenumber;

        let stride = self.layout.src_stride;
        let buffer = self.pointed.insert(buffer);
        Ok(PointedFrame {
            data: buffer.data(),
            stride,
            frame: GrabbedFrame {
                timestamp: meta.timestamp,
                framenumber: meta.framenumber,
                advisory: meta.status.advisory(),
            },
        })
    }

    /// Hand a pointed frame back to the pool
    pub fn unpoint(&mut self) -> CamResult<()> {
        match self.pointed.take() {
            Some(buffer) => self.source.release(buffer),
            None => Err(CamError::InvalidArgument(
                "no frame is currently pointed".to_string(),
            )),
        }
    }

    fn release_pointed(&mut self) -> CamResult<()> {
        match self.pointed.take() {
            Some(buffer) => {
                debug!(index = buffer.index, "Releasing pointed frame");
                self.source.release(buffer)
            }
            None => Ok(()),
        }
    }

    fn ensure_streaming(&self) -> CamResult<()> {
        if self.source.is_streaming() {
            Ok(())
        } else {
            Err(CamError::Other("camera is not capturing".to_string()))
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to stop capture while dropping engine");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory source used by unit tests

    use super::*;
    use crate::backends::camera::types::FrameStatus;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct ScriptState {
        pub free: Vec<FrameBuffer>,
        pub statuses: VecDeque<FrameStatus>,
        pub released: usize,
        pub streaming: bool,
        pub starts: usize,
    }

    /// Produces a frame per `acquire` while buffers and scripted statuses remain
    pub struct ScriptedSource {
        pub state: Arc<Mutex<ScriptState>>,
        pub layout: FrameLayout,
        framenumber: i64,
    }

    impl ScriptedSource {
        pub fn new(layout: FrameLayout, buffers: usize, statuses: &[FrameStatus]) -> Self {
            let state = ScriptState {
                free: (0..buffers)
                    .map(|i| FrameBuffer::owned(i, layout.buffer_size()))
                    .collect(),
                statuses: statuses.iter().copied().collect(),
                ..Default::default()
            };
            Self {
                state: Arc::new(Mutex::new(state)),
                layout,
                framenumber: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn start(&mut self) -> CamResult<()> {
            let mut state = self.state.lock().unwrap();
            state.streaming = true;
            state.starts += 1;
            Ok(())
        }

        fn stop(&mut self) -> CamResult<()> {
            self.state.lock().unwrap().streaming = false;
            Ok(())
        }

        fn is_streaming(&self) -> bool {
            self.state.lock().unwrap().streaming
        }

        fn acquire(&mut self, _timeout: Timeout) -> CamResult<FrameBuffer> {
            let mut state = self.state.lock().unwrap();
            let Some(status) = state.statuses.pop_front() else {
                return Err(CamError::FrameTimeout);
            };
            let Some(mut buffer) = state.free.pop() else {
                return Err(CamError::FrameTimeout);
            };
            let stride = self.layout.src_stride;
            for (i, byte) in buffer.data_mut().iter_mut().enumerate() {
                *byte = if i % stride < self.layout.row_bytes() {
                    (i / stride + 1) as u8
                } else {
                    0xEE
                };
            }
            buffer.meta.framenumber = self.framenumber;
            buffer.meta.timestamp = self.framenumber as f64 * 0.5;
            buffer.meta.status = status;
            self.framenumber += 1;
            Ok(buffer)
        }

        fn release(&mut self, buffer: FrameBuffer) -> CamResult<()> {
            let mut state = self.state.lock().unwrap();
            state.released += 1;
            state.free.push(buffer);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptState, ScriptedSource};
    use super::*;
    use crate::backends::camera::types::{FrameStatus, PixelCoding};
    use crate::errors::Advisory;
    use std::sync::{Arc, Mutex};

    fn engine(
        buffers: usize,
        statuses: &[FrameStatus],
    ) -> (CaptureEngine, Arc<Mutex<ScriptState>>) {
        let layout = FrameLayout::for_coding(4, 3, PixelCoding::Mono8);
        let source = ScriptedSource::new(layout, buffers, statuses);
        let probe = Arc::clone(&source.state);
        (CaptureEngine::new(Box::new(source), layout), probe)
    }

    #[test]
    fn test_copy_rows_keeps_padding() {
        let src: Vec<u8> = (1..=12).collect();
        let mut dst = vec![0xAB; 6 * 3];
        copy_rows(&src, 4, &mut dst, 6, 4, 3).unwrap();
        assert_eq!(&dst[0..6], &[1, 2, 3, 4, 0xAB, 0xAB]);
        assert_eq!(&dst[6..12], &[5, 6, 7, 8, 0xAB, 0xAB]);
        assert_eq!(&dst[12..18], &[9, 10, 11, 12, 0xAB, 0xAB]);
    }

    #[test]
    fn test_copy_rows_rejects_small_destination() {
        let src = vec![0u8; 12];
        let mut dst = vec![0u8; 12];
        assert!(matches!(
            copy_rows(&src, 4, &mut dst, 3, 4, 3),
            Err(CamError::BufferOverflow(_))
        ));
        let mut short = vec![0u8; 9];
        assert!(matches!(
            copy_rows(&src, 4, &mut short, 4, 4, 3),
            Err(CamError::BufferOverflow(_))
        ));
        // The last row needs no trailing padding
        let mut exact = vec![0u8; 6 * 2 + 4];
        assert!(copy_rows(&src, 4, &mut exact, 6, 4, 3).is_ok());
    }

    #[test]
    fn test_grab_requires_start() {
        let (mut engine, _) = engine(2, &[FrameStatus::Complete]);
        let mut dest = vec![0u8; 12];
        assert!(matches!(
            engine.grab(&mut dest, 4, Timeout::Forever),
            Err(CamError::Other(_))
        ));
    }

    #[test]
    fn test_grab_requeues_flagged_frames() {
        let (mut engine, probe) = engine(
            1,
            &[FrameStatus::DataMissing, FrameStatus::DataLost, FrameStatus::Complete],
        );
        engine.start().unwrap();
        let mut dest = vec![0u8; 12];

        let first = engine.grab(&mut dest, 4, Timeout::Forever).unwrap();
        assert_eq!(first.advisory, Some(Advisory::DataMissing));
        let second = engine.grab(&mut dest, 4, Timeout::Forever).unwrap();
        assert_eq!(second.advisory, Some(Advisory::DataLost));
        let third = engine.grab(&mut dest, 4, Timeout::Forever).unwrap();
        assert_eq!(third.advisory, None);

        assert_eq!(probe.lock().unwrap().released, 3);
        assert_eq!(engine.last_framenumber(), 2);
        assert_eq!(engine.last_timestamp(), 1.0);
    }

    #[test]
    fn test_copy_error_still_requeues() {
        let (mut engine, probe) = engine(1, &[FrameStatus::Complete, FrameStatus::Complete]);
        engine.start().unwrap();
        let mut small = vec![0u8; 4];
        assert!(matches!(
            engine.grab(&mut small, 4, Timeout::Forever),
            Err(CamError::BufferOverflow(_))
        ));
        assert_eq!(engine.last_framenumber(), -1);

        let mut dest = vec![0u8; 12];
        assert!(engine.grab(&mut dest, 4, Timeout::Forever).is_ok());
        assert_eq!(probe.lock().unwrap().released, 2);
    }

    #[test]
    fn test_point_and_unpoint() {
        let (mut engine, probe) = engine(2, &[FrameStatus::Complete, FrameStatus::Complete]);
        engine.start().unwrap();

        let pointed = engine.point(Timeout::Forever).unwrap();
        assert_eq!(pointed.stride, 4);
        assert_eq!(&pointed.data[0..4], &[1, 1, 1, 1]);
        assert_eq!(probe.lock().unwrap().released, 0);

        engine.unpoint().unwrap();
        assert_eq!(probe.lock().unwrap().released, 1);
        assert!(matches!(engine.unpoint(), Err(CamError::InvalidArgument(_))));
    }

    #[test]
    fn test_start_twice_restarts() {
        let (mut engine, probe) = engine(1, &[]);
        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_streaming());
        assert_eq!(probe.lock().unwrap().starts, 2);

        engine.stop().unwrap();
        engine.stop().unwrap();
        assert!(!engine.is_streaming());
    }
}
