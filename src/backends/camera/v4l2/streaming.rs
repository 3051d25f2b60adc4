// SPDX-License-Identifier: GPL-3.0-only

//! Memory-mapped V4L2 streaming
//!
//! Buffers are requested with `VIDIOC_REQBUFS`, mapped once and then cycled
//! with `VIDIOC_QBUF`/`VIDIOC_DQBUF`. The device descriptor is opened
//! non-blocking, so readiness comes from `select()` in the polled source.
//!
//! Struct layouts are those of 64-bit Linux.

use crate::backends::camera::capture::polling::PollingDriver;
use crate::backends::camera::types::{FrameBuffer, FrameLayout, FrameMeta, FrameStatus, host_timestamp};
use crate::errors::{CamError, CamResult};
use std::io::{self, ErrorKind};
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use v4l::device::Handle;

// ===== V4L2 ioctl Numbers =====

const VIDIOC_REQBUFS: libc::c_ulong = 0xC0145608;
const VIDIOC_QUERYBUF: libc::c_ulong = 0xC0585609;
const VIDIOC_QBUF: libc::c_ulong = 0xC058560F;
const VIDIOC_DQBUF: libc::c_ulong = 0xC0585611;
const VIDIOC_STREAMON: libc::c_ulong = 0x40045612;
const VIDIOC_STREAMOFF: libc::c_ulong = 0x40045613;

const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_MEMORY_MMAP: u32 = 1;

const V4L2_BUF_FLAG_ERROR: u32 = 0x0040;
const V4L2_BUF_FLAG_TIMESTAMP_MASK: u32 = 0xe000;
const V4L2_BUF_FLAG_TIMESTAMP_COPY: u32 = 0x4000;

// ===== V4L2 ioctl Structures =====

#[allow(dead_code)]
#[repr(C)]
struct V4l2Requestbuffers {
    count: u32,
    type_: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

#[allow(dead_code)]
#[repr(C)]
struct V4l2Timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[allow(dead_code)]
#[repr(C)]
union V4l2BufferM {
    offset: u32,
    userptr: libc::c_ulong,
    fd: i32,
}

#[allow(dead_code)]
#[repr(C)]
struct V4l2Buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: V4l2Timecode,
    sequence: u32,
    memory: u32,
    m: V4l2BufferM,
    length: u32,
    reserved2: u32,
    request_fd: i32,
}

const _: () = assert!(std::mem::size_of::<V4l2Requestbuffers>() == 20);
const _: () = assert!(std::mem::size_of::<V4l2Buffer>() == 88);

impl V4l2Buffer {
    fn mmap_capture(index: u32) -> Self {
        // SAFETY: all-zero is a valid value for this plain-data struct
        let mut buf: Self = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        buf
    }
}

/// ioctl retried on EINTR
fn xioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::ioctl(fd, request as _, arg as *mut T) };
        if rc != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn request_buffers(fd: RawFd, count: u32) -> io::Result<u32> {
    let mut req = V4l2Requestbuffers {
        count,
        type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
        memory: V4L2_MEMORY_MMAP,
        capabilities: 0,
        flags: 0,
        reserved: [0; 3],
    };
    xioctl(fd, VIDIOC_REQBUFS, &mut req)?;
    Ok(req.count)
}

/// Quality of a dequeued buffer from its flags and fill level
pub fn frame_status(flags: u32, bytesused: u32, expected: usize) -> FrameStatus {
    if flags & V4L2_BUF_FLAG_ERROR != 0 {
        FrameStatus::DataLost
    } else if (bytesused as usize) < expected {
        FrameStatus::DataMissing
    } else {
        FrameStatus::Complete
    }
}

/// Ownership of one kernel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Held by the driver, not queued
    Idle,
    /// Owned by the kernel
    Queued,
    /// Handed out as a [`FrameBuffer`]
    Lent,
}

struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

/// [`PollingDriver`] over memory-mapped V4L2 buffers
pub struct MmapDriver {
    handle: Arc<Handle>,
    maps: Vec<Mapping>,
    slots: Vec<Slot>,
    /// Bytes a complete frame occupies
    expected: usize,
    streaming: bool,
}

// SAFETY: the mappings are only dereferenced through FrameBuffers, which
// carry exclusive access to their region; the driver itself only unmaps them.
unsafe impl Send for MmapDriver {}

impl MmapDriver {
    /// Request and map `count` buffers on an already formatted device
    pub fn new(handle: Arc<Handle>, count: usize, layout: FrameLayout, expected: usize) -> CamResult<Self> {
        let fd = handle.fd();
        let requested = u32::try_from(count)
            .map_err(|_| CamError::InvalidArgument(format!("{} buffers requested", count)))?;
        let granted = request_buffers(fd, requested)
            .map_err(|e| CamError::Backend(format!("VIDIOC_REQBUFS failed: {}", e)))?;
        if granted == 0 {
            return Err(CamError::Backend("driver granted no buffers".to_string()));
        }
        if granted != requested {
            debug!(requested, granted, "Driver adjusted the number of buffers");
        }

        let mut driver = Self {
            handle,
            maps: Vec::with_capacity(granted as usize),
            slots: Vec::with_capacity(granted as usize),
            expected: if expected > 0 { expected } else { layout.buffer_size() },
            streaming: false,
        };
        // On error, Drop unmaps what was mapped so far and frees the buffers
        for index in 0..granted {
            driver.map_buffer(index)?;
        }
        debug!(buffers = granted, stride = layout.src_stride, "Mapped V4L2 buffers");
        Ok(driver)
    }

    fn map_buffer(&mut self, index: u32) -> CamResult<()> {
        let fd = self.handle.fd();
        let mut buf = V4l2Buffer::mmap_capture(index);
        xioctl(fd, VIDIOC_QUERYBUF, &mut buf)
            .map_err(|e| CamError::Backend(format!("VIDIOC_QUERYBUF {} failed: {}", index, e)))?;

        // SAFETY: offset is the active union member for MMAP buffers
        let offset = unsafe { buf.m.offset };
        let len = buf.length as usize;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CamError::Backend(format!(
                "mmap of buffer {} failed: {}",
                index,
                io::Error::last_os_error()
            )));
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| CamError::Backend("mmap returned a null mapping".to_string()))?;
        self.maps.push(Mapping { ptr, len });
        self.slots.push(Slot::Idle);
        Ok(())
    }

    pub fn num_buffers(&self) -> usize {
        self.slots.len()
    }

    fn queue(&mut self, index: usize) -> CamResult<()> {
        let mut buf = V4l2Buffer::mmap_capture(index as u32);
        xioctl(self.handle.fd(), VIDIOC_QBUF, &mut buf)
            .map_err(|e| CamError::Backend(format!("VIDIOC_QBUF {} failed: {}", index, e)))?;
        self.slots[index] = Slot::Queued;
        Ok(())
    }

    fn stream(&mut self, on: bool) -> CamResult<()> {
        let mut kind: libc::c_int = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        let request = if on { VIDIOC_STREAMON } else { VIDIOC_STREAMOFF };
        xioctl(self.handle.fd(), request, &mut kind).map_err(|e| {
            CamError::Backend(format!("VIDIOC_STREAM{} failed: {}", if on { "ON" } else { "OFF" }, e))
        })
    }
}

impl PollingDriver for MmapDriver {
    fn raw_fd(&self) -> RawFd {
        self.handle.fd()
    }

    fn start(&mut self) -> CamResult<()> {
        for index in 0..self.slots.len() {
            if self.slots[index] == Slot::Idle {
                self.queue(index)?;
            }
        }
        self.stream(true)?;
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> CamResult<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.stream(false)?;
        // STREAMOFF hands every queued buffer back
        for slot in &mut self.slots {
            if *slot == Slot::Queued {
                *slot = Slot::Idle;
            }
        }
        Ok(())
    }

    fn dequeue(&mut self) -> CamResult<Option<FrameBuffer>> {
        let mut buf = V4l2Buffer::mmap_capture(0);
        if let Err(e) = xioctl(self.handle.fd(), VIDIOC_DQBUF, &mut buf) {
            return match e.kind() {
                ErrorKind::WouldBlock => Ok(None),
                _ => Err(CamError::Io(format!("VIDIOC_DQBUF failed: {}", e))),
            };
        }

        let index = buf.index as usize;
        let Some(mapping) = self.maps.get(index) else {
            return Err(CamError::Backend(format!("driver returned unknown buffer {}", index)));
        };
        self.slots[index] = Slot::Lent;

        let timestamp = if buf.flags & V4L2_BUF_FLAG_TIMESTAMP_MASK == V4L2_BUF_FLAG_TIMESTAMP_COPY {
            buf.timestamp.tv_sec as f64 + buf.timestamp.tv_usec as f64 / 1e6
        } else {
            // Monotonic kernel clock; stamp in wall-clock time instead
            host_timestamp()
        };
        let status = frame_status(buf.flags, buf.bytesused, self.expected);
        trace!(index, sequence = buf.sequence, bytesused = buf.bytesused, ?status, "Dequeued V4L2 buffer");

        // SAFETY: the mapping lives until Drop, and the slot is now Lent so
        // no other FrameBuffer over this region exists until it is requeued.
        let mut frame = unsafe { FrameBuffer::mapped(index, mapping.ptr, mapping.len) };
        frame.meta = FrameMeta {
            timestamp,
            framenumber: buf.sequence as i64,
            status,
        };
        Ok(Some(frame))
    }

    fn enqueue(&mut self, buffer: FrameBuffer) -> CamResult<()> {
        let index = buffer.index;
        drop(buffer);
        match self.slots.get(index) {
            Some(Slot::Lent) => {}
            _ => {
                return Err(CamError::Other(format!("buffer {} was not handed out", index)));
            }
        }
        if self.streaming {
            self.queue(index)
        } else {
            self.slots[index] = Slot::Idle;
            Ok(())
        }
    }
}

impl Drop for MmapDriver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to stop V4L2 stream");
        }
        for mapping in self.maps.drain(..) {
            unsafe {
                libc::munmap(mapping.ptr.as_ptr().cast(), mapping.len);
            }
        }
        if let Err(e) = request_buffers(self.handle.fd(), 0) {
            debug!(error = %e, "Failed to free V4L2 buffers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_status() {
        assert_eq!(frame_status(0, 100, 100), FrameStatus::Complete);
        assert_eq!(frame_status(0, 60, 100), FrameStatus::DataMissing);
        assert_eq!(frame_status(V4L2_BUF_FLAG_ERROR, 100, 100), FrameStatus::DataLost);
    }

    #[test]
    fn test_ioctl_numbers() {
        // _IOWR('V', 9, struct v4l2_buffer)
        let size = std::mem::size_of::<V4l2Buffer>() as libc::c_ulong;
        assert_eq!(VIDIOC_QUERYBUF, (3 << 30) | (size << 16) | ((b'V' as libc::c_ulong) << 8) | 9);
        let size = std::mem::size_of::<V4l2Requestbuffers>() as libc::c_ulong;
        assert_eq!(VIDIOC_REQBUFS, (3 << 30) | (size << 16) | ((b'V' as libc::c_ulong) << 8) | 8);
    }
}
