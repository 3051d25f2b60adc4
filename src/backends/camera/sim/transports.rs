// SPDX-License-Identifier: GPL-3.0-only

//! Frame delivery of software cameras
//!
//! Each transport mimics one family of vendor layers so the matching
//! capture source runs against a real producer:
//!
//! - [`PipeDriver`]: producer thread + pipe used as readiness descriptor
//! - [`ThreadCallbackSdk`]: producer thread invoking a frame callback
//! - [`PacedBlockingSdk`]: retrieve call sleeping until the next frame is due

use super::sensor::{Sensor, lock};
use crate::backends::camera::capture::blocking::BlockingSdk;
use crate::backends::camera::capture::callback::{CallbackSdk, FrameSink};
use crate::backends::camera::capture::polling::PollingDriver;
use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction, sleep_unless_stopped};
use crate::backends::camera::types::{FrameBuffer, Timeout};
use crate::errors::{CamError, CamResult};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Non-blocking, close-on-exec pipe
fn nonblocking_pipe() -> CamResult<(File, File)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: pipe2 succeeded, both descriptors are open and owned by nobody else
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((File::from(read), File::from(write)))
}

#[derive(Default)]
struct PipePool {
    queued: VecDeque<FrameBuffer>,
    filled: VecDeque<FrameBuffer>,
}

/// Polled transport: one pipe byte per filled buffer
///
/// The byte is written and consumed under the pool lock, so the pipe is
/// readable exactly while `filled` is non-empty.
pub struct PipeDriver {
    name: String,
    pool: Arc<Mutex<PipePool>>,
    sensor: Arc<Mutex<Sensor>>,
    reader: File,
    writer: Arc<File>,
    producer: Option<CaptureLoopController>,
}

impl PipeDriver {
    pub fn new(name: &str, sensor: Sensor, buffers: Vec<FrameBuffer>) -> CamResult<Self> {
        let (reader, writer) = nonblocking_pipe()?;
        let pool = PipePool {
            queued: buffers.into(),
            filled: VecDeque::new(),
        };
        Ok(Self {
            name: name.to_string(),
            pool: Arc::new(Mutex::new(pool)),
            sensor: Arc::new(Mutex::new(sensor)),
            reader,
            writer: Arc::new(writer),
            producer: None,
        })
    }

    fn drain_pipe(&self) -> CamResult<()> {
        let mut scratch = [0u8; 64];
        loop {
            match (&self.reader).read(&mut scratch) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl PollingDriver for PipeDriver {
    fn raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn start(&mut self) -> CamResult<()> {
        {
            let mut pool = lock(&self.pool);
            while let Some(buffer) = pool.filled.pop_front() {
                pool.queued.push_back(buffer);
            }
        }
        self.drain_pipe()?;

        let pool = Arc::clone(&self.pool);
        let sensor = Arc::clone(&self.sensor);
        let writer = Arc::clone(&self.writer);

        self.producer = Some(CaptureLoopController::start(&self.name, move |stop| {
            let interval = lock(&sensor).frame_interval();
            if !sleep_unless_stopped(stop, interval) {
                return LoopAction::Stop;
            }

            let mut sensor = lock(&sensor);
            if !sensor.is_armed() {
                return LoopAction::Continue;
            }

            let mut pool = lock(&pool);
            let Some(mut buffer) = pool.queued.pop_front() else {
                let dropped = sensor.drop_frame();
                debug!(framenumber = dropped, "No queued buffer, frame dropped");
                return LoopAction::Continue;
            };
            sensor.expose(&mut buffer);
            pool.filled.push_back(buffer);

            if let Err(e) = (&*writer).write_all(&[1]) {
                warn!(error = %e, "Failed to signal filled buffer");
                return LoopAction::Stop;
            }
            LoopAction::Continue
        }));
        Ok(())
    }

    fn stop(&mut self) -> CamResult<()> {
        if let Some(mut producer) = self.producer.take() {
            producer.stop();
        }
        {
            let mut pool = lock(&self.pool);
            while let Some(buffer) = pool.filled.pop_front() {
                pool.queued.push_back(buffer);
            }
        }
        self.drain_pipe()
    }

    fn dequeue(&mut self) -> CamResult<Option<FrameBuffer>> {
        let mut pool = lock(&self.pool);
        let mut byte = [0u8; 1];
        match (&self.reader).read(&mut byte) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
        let buffer = pool.filled.pop_front();
        if let Some(buffer) = &buffer {
            trace!(index = buffer.index, "Filled buffer taken");
        }
        Ok(buffer)
    }

    fn enqueue(&mut self, buffer: FrameBuffer) -> CamResult<()> {
        lock(&self.pool).queued.push_back(buffer);
        Ok(())
    }
}

impl Drop for PipeDriver {
    fn drop(&mut self) {
        if let Some(mut producer) = self.producer.take() {
            producer.stop();
        }
    }
}

/// Callback transport: a producer thread publishing into a [`FrameSink`]
pub struct ThreadCallbackSdk {
    name: String,
    free: Arc<Mutex<Vec<FrameBuffer>>>,
    sensor: Arc<Mutex<Sensor>>,
    producer: Option<CaptureLoopController>,
}

impl ThreadCallbackSdk {
    pub fn new(name: &str, sensor: Sensor, buffers: Vec<FrameBuffer>) -> Self {
        Self {
            name: name.to_string(),
            free: Arc::new(Mutex::new(buffers)),
            sensor: Arc::new(Mutex::new(sensor)),
            producer: None,
        }
    }
}

impl CallbackSdk for ThreadCallbackSdk {
    fn begin(&mut self, sink: FrameSink) -> CamResult<()> {
        let free = Arc::clone(&self.free);
        let sensor = Arc::clone(&self.sensor);

        self.producer = Some(CaptureLoopController::start(&self.name, move |stop| {
            let interval = lock(&sensor).frame_interval();
            if !sleep_unless_stopped(stop, interval) {
                return LoopAction::Stop;
            }

            let mut sensor = lock(&sensor);
            if !sensor.is_armed() {
                return LoopAction::Continue;
            }

            let Some(mut buffer) = lock(&free).pop() else {
                let dropped = sensor.drop_frame();
                debug!(framenumber = dropped, "No free buffer, frame dropped");
                return LoopAction::Continue;
            };
            sensor.expose(&mut buffer);
            drop(sensor);

            if let Err(buffer) = sink.deliver(buffer) {
                debug!(index = buffer.index, "Frame not accepted, requeued");
                lock(&free).push(buffer);
            }
            LoopAction::Continue
        }));
        Ok(())
    }

    fn end(&mut self) -> CamResult<()> {
        if let Some(mut producer) = self.producer.take() {
            producer.stop();
        }
        Ok(())
    }

    fn queue_frame(&mut self, buffer: FrameBuffer) -> CamResult<()> {
        lock(&self.free).push(buffer);
        Ok(())
    }
}

/// Blocking transport: frames become available at the configured rate
pub struct PacedBlockingSdk {
    sensor: Sensor,
    free: Vec<FrameBuffer>,
    next_due: Option<Instant>,
}

impl PacedBlockingSdk {
    pub fn new(sensor: Sensor, buffers: Vec<FrameBuffer>) -> Self {
        Self {
            sensor,
            free: buffers,
            next_due: None,
        }
    }
}

/// Sleep until `deadline`, or indefinitely when there is none
fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => thread::sleep(at.saturating_duration_since(Instant::now())),
        None => loop {
            thread::sleep(Duration::from_secs(3600));
        },
    }
}

impl BlockingSdk for PacedBlockingSdk {
    fn start_capture(&mut self) -> CamResult<()> {
        self.next_due = Some(Instant::now() + self.sensor.frame_interval());
        Ok(())
    }

    fn stop_capture(&mut self) -> CamResult<()> {
        self.next_due = None;
        Ok(())
    }

    fn retrieve_buffer(&mut self, timeout: Timeout) -> CamResult<FrameBuffer> {
        let due = self
            .next_due
            .ok_or_else(|| CamError::Other("capture not started".to_string()))?;
        let deadline = timeout.deadline_from(Instant::now());

        if !self.sensor.is_armed() {
            sleep_until(deadline);
            return Err(CamError::FrameTimeout);
        }
        if let Some(at) = deadline
            && due > at
        {
            sleep_until(Some(at));
            return Err(CamError::FrameTimeout);
        }
        sleep_until(Some(due));

        let mut buffer = self.free.pop().ok_or_else(|| {
            CamError::Other("no free buffer, release retrieved frames first".to_string())
        })?;
        self.sensor.expose(&mut buffer);

        let interval = self.sensor.frame_interval();
        let now = Instant::now();
        let mut next = due + interval;
        while next < now {
            self.sensor.drop_frame();
            next += interval;
        }
        self.next_due = Some(next);
        Ok(buffer)
    }

    fn release_buffer(&mut self, buffer: FrameBuffer) -> CamResult<()> {
        self.free.push(buffer);
        Ok(())
    }
}
