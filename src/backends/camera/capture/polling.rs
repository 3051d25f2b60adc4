// SPDX-License-Identifier: GPL-3.0-only

//! Readiness-multiplexed capture
//!
//! The producer exposes a descriptor that becomes readable when a filled
//! buffer can be dequeued. Waiting is a `select()` with a microsecond
//! timeout followed by a non-blocking dequeue.

use super::FrameSource;
use crate::backends::camera::types::{FrameBuffer, Timeout};
use crate::errors::{CamError, CamResult};
use std::os::fd::RawFd;
use std::time::Instant;
use tracing::{debug, trace};

/// Driver with a pollable descriptor and non-blocking dequeue
pub trait PollingDriver: Send {
    /// Descriptor that is readable while a filled buffer is waiting
    fn raw_fd(&self) -> RawFd;

    /// Queue every buffer and switch the stream on
    fn start(&mut self) -> CamResult<()>;

    /// Switch the stream off and withdraw all queued buffers
    fn stop(&mut self) -> CamResult<()>;

    /// Take a filled buffer, `None` if the descriptor woke up spuriously
    fn dequeue(&mut self) -> CamResult<Option<FrameBuffer>>;

    fn enqueue(&mut self, buffer: FrameBuffer) -> CamResult<()>;
}

/// Wait until `fd` is readable.
///
/// Returns [`CamError::FrameTimeout`] when the timeout elapses and
/// [`CamError::InterruptedSyscall`] when a signal interrupts the wait.
pub fn wait_readable(fd: RawFd, timeout: Timeout) -> CamResult<()> {
    if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
        return Err(CamError::Other(format!(
            "file descriptor {} cannot be used with select()",
            fd
        )));
    }

    // SAFETY: fd_set is plain data; FD_ZERO initialises it and fd is in range
    let mut readfds: libc::fd_set = unsafe { std::mem::zeroed() };
    unsafe {
        libc::FD_ZERO(&mut readfds);
        libc::FD_SET(fd, &mut readfds);
    }

    // Clamped to ~68 years so the cast can never wrap negative
    let max_secs = libc::time_t::from(i32::MAX);
    let mut tv = timeout.as_duration().map(|d| libc::timeval {
        tv_sec: libc::time_t::try_from(d.as_secs()).map_or(max_secs, |s| s.min(max_secs)),
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    });
    let tv_ptr = match tv.as_mut() {
        Some(tv) => tv as *mut libc::timeval,
        None => std::ptr::null_mut(),
    };

    let ready = unsafe {
        libc::select(
            fd + 1,
            &mut readfds,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            tv_ptr,
        )
    };

    match ready {
        -1 => {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                Err(CamError::InterruptedSyscall)
            } else {
                Err(CamError::Io(format!("select() failed: {}", err)))
            }
        }
        0 => Err(CamError::FrameTimeout),
        _ => Ok(()),
    }
}

/// [`FrameSource`] over a [`PollingDriver`]
pub struct PolledSource<D: PollingDriver> {
    driver: D,
    streaming: bool,
}

impl<D: PollingDriver> PolledSource<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            streaming: false,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: PollingDriver> FrameSource for PolledSource<D> {
    fn start(&mut self) -> CamResult<()> {
        self.driver.start()?;
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> CamResult<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.driver.stop()
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn acquire(&mut self, timeout: Timeout) -> CamResult<FrameBuffer> {
        let deadline = timeout.deadline_from(Instant::now());
        loop {
            wait_readable(self.driver.raw_fd(), Timeout::remaining(deadline))?;

            if let Some(buffer) = self.driver.dequeue()? {
                trace!(index = buffer.index, "Dequeued buffer");
                return Ok(buffer);
            }

            debug!("Descriptor readable but no buffer was ready");
            if deadline.is_some_and(|at| Instant::now() >= at) {
                return Err(CamError::FrameTimeout);
            }
        }
    }

    fn release(&mut self, buffer: FrameBuffer) -> CamResult<()> {
        self.driver.enqueue(buffer)
    }
}

impl<D: PollingDriver> Drop for PolledSource<D> {
    fn drop(&mut self) {
        if self.streaming {
            let _ = self.stop();
        }
    }
}
