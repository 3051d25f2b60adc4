// SPDX-License-Identifier: GPL-3.0-only

//! Callback-driven capture
//!
//! Vendor layers of this kind fill frames on a thread they own and call back
//! into user code. The callback side only ever touches a [`FrameSink`]; the
//! grabbing thread waits on the receiving end of the same bounded channel.

use super::FrameSource;
use crate::backends::camera::types::{FrameBuffer, Timeout};
use crate::errors::{CamError, CamResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, warn};

/// Callback-side handle used to publish filled frames
#[derive(Clone)]
pub struct FrameSink {
    tx: Sender<FrameBuffer>,
}

impl FrameSink {
    /// Publish a filled frame.
    ///
    /// Gives the buffer back when nobody can take it (queue full or the
    /// consumer went away) so the producer can requeue it itself.
    pub fn deliver(&self, buffer: FrameBuffer) -> Result<(), FrameBuffer> {
        match self.tx.try_send(buffer) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(buffer)) | Err(TrySendError::Disconnected(buffer)) => {
                Err(buffer)
            }
        }
    }
}

/// Vendor layer delivering frames through a callback
pub trait CallbackSdk: Send {
    /// Begin acquisition; filled frames go to `sink` from the vendor thread
    fn begin(&mut self, sink: FrameSink) -> CamResult<()>;

    /// End acquisition. When this returns the callback must not run anymore.
    fn end(&mut self) -> CamResult<()>;

    /// Give a frame back to the vendor layer for refilling
    fn queue_frame(&mut self, buffer: FrameBuffer) -> CamResult<()>;
}

/// [`FrameSource`] over a [`CallbackSdk`]
pub struct CallbackSource<S: CallbackSdk> {
    sdk: S,
    capacity: usize,
    rx: Option<Receiver<FrameBuffer>>,
}

impl<S: CallbackSdk> CallbackSource<S> {
    /// `capacity` should equal the number of buffers in the pool
    pub fn new(sdk: S, capacity: usize) -> Self {
        Self {
            sdk,
            capacity: capacity.max(1),
            rx: None,
        }
    }
}

impl<S: CallbackSdk> FrameSource for CallbackSource<S> {
    fn start(&mut self) -> CamResult<()> {
        let (tx, rx) = bounded(self.capacity);
        self.sdk.begin(FrameSink { tx })?;
        self.rx = Some(rx);
        Ok(())
    }

    fn stop(&mut self) -> CamResult<()> {
        if self.rx.is_none() {
            return Ok(());
        }
        // Still streaming if the vendor layer refuses to end
        self.sdk.end()?;
        let Some(rx) = self.rx.take() else {
            return Ok(());
        };

        // Frames published but never grabbed go back to the vendor pool
        let mut reclaimed = 0;
        for buffer in rx.try_iter() {
            self.sdk.queue_frame(buffer)?;
            reclaimed += 1;
        }
        debug!(reclaimed, "Callback capture stopped");
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.rx.is_some()
    }

    fn acquire(&mut self, timeout: Timeout) -> CamResult<FrameBuffer> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| CamError::Other("camera is not capturing".to_string()))?;

        let received = match timeout {
            Timeout::Forever => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Timeout::After(d) => rx.recv_timeout(d),
        };

        match received {
            Ok(buffer) => Ok(buffer),
            Err(RecvTimeoutError::Timeout) => Err(CamError::FrameTimeout),
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Frame callback went away while waiting");
                Err(CamError::Other("frame callback is no longer running".to_string()))
            }
        }
    }

    fn release(&mut self, buffer: FrameBuffer) -> CamResult<()> {
        self.sdk.queue_frame(buffer)
    }
}

impl<S: CallbackSdk> Drop for CallbackSource<S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to end callback capture");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    /// Delivers `frames` buffers from a thread, one every 5 ms
    struct ThreadSdk {
        pool: Arc<Mutex<Vec<FrameBuffer>>>,
        frames: usize,
        worker: Option<JoinHandle<()>>,
    }

    impl CallbackSdk for ThreadSdk {
        fn begin(&mut self, sink: FrameSink) -> CamResult<()> {
            let pool = Arc::clone(&self.pool);
            let frames = self.frames;
            self.worker = Some(thread::spawn(move || {
                for n in 0..frames {
                    thread::sleep(Duration::from_millis(5));
                    let Some(mut buffer) = pool.lock().unwrap().pop() else {
                        continue;
                    };
                    buffer.meta.framenumber = n as i64;
                    if let Err(buffer) = sink.deliver(buffer) {
                        pool.lock().unwrap().push(buffer);
                    }
                }
            }));
            Ok(())
        }

        fn end(&mut self) -> CamResult<()> {
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
            Ok(())
        }

        fn queue_frame(&mut self, buffer: FrameBuffer) -> CamResult<()> {
            self.pool.lock().unwrap().push(buffer);
            Ok(())
        }
    }

    fn source(frames: usize) -> (CallbackSource<ThreadSdk>, Arc<Mutex<Vec<FrameBuffer>>>) {
        let pool = Arc::new(Mutex::new(vec![
            FrameBuffer::owned(0, 8),
            FrameBuffer::owned(1, 8),
        ]));
        let sdk = ThreadSdk {
            pool: Arc::clone(&pool),
            frames,
            worker: None,
        };
        (CallbackSource::new(sdk, 2), pool)
    }

    #[test]
    fn test_frames_flow_through_channel() {
        let (mut source, _pool) = source(3);
        source.start().unwrap();
        for expected in 0..3 {
            let buffer = source.acquire(Timeout::After(Duration::from_secs(2))).unwrap();
            assert_eq!(buffer.meta.framenumber, expected);
            source.release(buffer).unwrap();
        }
        source.stop().unwrap();
    }

    #[test]
    fn test_timeout_when_producer_is_silent() {
        let (mut source, _pool) = source(0);
        source.start().unwrap();
        let started = Instant::now();
        let result = source.acquire(Timeout::After(Duration::from_millis(40)));
        assert!(matches!(result, Err(CamError::FrameTimeout)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    /// Publishes one frame at `begin`; `end` fails until `end_fails` is cleared
    struct StubbornSdk {
        end_fails: bool,
        requeued: Vec<FrameBuffer>,
    }

    impl CallbackSdk for StubbornSdk {
        fn begin(&mut self, sink: FrameSink) -> CamResult<()> {
            sink.deliver(FrameBuffer::owned(7, 8))
                .map_err(|_| CamError::Other("queue full".to_string()))
        }

        fn end(&mut self) -> CamResult<()> {
            if self.end_fails {
                return Err(CamError::Backend("acquisition still running".to_string()));
            }
            Ok(())
        }

        fn queue_frame(&mut self, buffer: FrameBuffer) -> CamResult<()> {
            self.requeued.push(buffer);
            Ok(())
        }
    }

    #[test]
    fn test_failed_end_keeps_published_frames() {
        let sdk = StubbornSdk {
            end_fails: true,
            requeued: Vec::new(),
        };
        let mut source = CallbackSource::new(sdk, 2);
        source.start().unwrap();

        assert!(matches!(source.stop(), Err(CamError::Backend(_))));
        assert!(source.is_streaming());
        assert!(source.sdk.requeued.is_empty());

        source.sdk.end_fails = false;
        source.stop().unwrap();
        assert!(!source.is_streaming());
        assert_eq!(source.sdk.requeued.len(), 1);
        assert_eq!(source.sdk.requeued[0].index, 7);
    }

    #[test]
    fn test_stop_reclaims_undelivered_frames() {
        let (mut source, pool) = source(2);
        source.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        source.stop().unwrap();
        assert_eq!(pool.lock().unwrap().len(), 2);
        assert!(!source.is_streaming());
    }
}
