// SPDX-License-Identifier: GPL-3.0-only

//! Flat call surface with an error channel
//!
//! Mirrors the classic `cam_iface` surface: process-wide startup and
//! shutdown, device enumeration over all backends, and context-scoped
//! calls addressed by an opaque [`ContextHandle`]. Failures are not
//! returned as values: they set the calling thread's error channel, read
//! back with [`have_error`] and [`get_error_string`]. Value-returning calls
//! give `None` on failure.
//!
//! The typed API ([`BackendRegistry`], [`CamContext`]) is the better fit for
//! Rust callers; this module exists for code ported from the C surface.
//!
//! ```ignore
//! api::startup();
//! let ctx = api::new_context(0, 5, 0).expect("camera");
//! api::start(ctx);
//! let mut frame = vec![0u8; 640 * 480];
//! api::grab_next_frame_blocking(ctx, &mut frame, 1.0);
//! if api::have_error() != 0 {
//!     eprintln!("{}", api::get_error_string());
//!     api::clear_error();
//! }
//! api::delete_context(ctx);
//! api::shutdown();
//! ```

use crate::backends::camera::{
    BackendRegistry, CamContext, CameraIdentity, GrabbedFrame, PixelCoding, PointedFrame,
    PropertyInfo, PropertyValue, Timeout,
};
use crate::config::Config;
use crate::constants::{CAM_IFACE_API_VERSION, MAX_ERROR_LEN, UNITY_DRIVER_NAME};
use crate::errors::{CamError, CamResult};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

thread_local! {
    static LAST_ERROR: RefCell<Option<(i32, String)>> = const { RefCell::new(None) };
}

/// Opaque reference to an open context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(u64);

type ContextSlot = Arc<Mutex<Option<CamContext>>>;

struct Driver {
    registry: BackendRegistry,
    contexts: HashMap<u64, ContextSlot>,
    next_handle: u64,
}

static DRIVER: Mutex<Option<Driver>> = Mutex::new(None);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cut `message` to at most `max` bytes on a character boundary
fn truncate_message(message: &mut String, max: usize) {
    if message.len() > max {
        let mut end = max;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
}

fn set_error(err: &CamError) {
    let mut message = err.to_string();
    truncate_message(&mut message, MAX_ERROR_LEN);
    debug!(code = err.code(), message = %message, "Error channel set");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((err.code(), message)));
}

fn report<T>(result: CamResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            set_error(&e);
            None
        }
    }
}

fn not_started() -> CamError {
    CamError::Lifecycle("cam_iface not started".to_string())
}

fn with_driver<T>(f: impl FnOnce(&mut Driver) -> CamResult<T>) -> Option<T> {
    let mut guard = lock(&DRIVER);
    report(guard.as_mut().ok_or_else(not_started).and_then(f))
}

/// Run `f` on a live context. The process-wide lock is released first so a
/// blocking grab on one context never stalls calls on another.
fn with_context<T>(handle: ContextHandle, f: impl FnOnce(&mut CamContext) -> CamResult<T>) -> Option<T> {
    let slot = with_driver(|driver| {
        driver
            .contexts
            .get(&handle.0)
            .cloned()
            .ok_or(CamError::InvalidContext)
    })?;
    let mut guard = lock(&slot);
    report(guard.as_mut().ok_or(CamError::InvalidContext).and_then(f))
}

fn flag_advisory(frame: &GrabbedFrame) {
    if let Some(advisory) = frame.advisory {
        set_error(&CamError::from(advisory));
    }
}

// ===== Process-wide =====

pub fn driver_name() -> &'static str {
    UNITY_DRIVER_NAME
}

pub fn api_version() -> &'static str {
    CAM_IFACE_API_VERSION
}

/// Code of the calling thread's last error, 0 if none
pub fn have_error() -> i32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, |(code, _)| *code))
}

pub fn clear_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Message of the calling thread's last error, empty if none
pub fn get_error_string() -> String {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|(_, message)| message.clone())
            .unwrap_or_default()
    })
}

/// Load the configuration and start every configured backend
pub fn startup() {
    if let Some(config) = report(Config::load()) {
        startup_with_config(config);
    }
}

pub fn startup_with_config(config: Config) {
    let mut guard = lock(&DRIVER);
    if guard.is_some() {
        set_error(&CamError::Lifecycle("cam_iface already started".to_string()));
        return;
    }

    let mut registry = BackendRegistry::new(&config);
    // Ranges of backends started before a failure stay usable
    let started = registry.startup();
    info!(cameras = registry.num_cameras(), "cam_iface started");
    *guard = Some(Driver {
        registry,
        contexts: HashMap::new(),
        next_handle: 1,
    });
    drop(guard);
    report(started);
}

/// Destroy every remaining context, then shut the backends down
pub fn shutdown() {
    let Some(mut driver) = lock(&DRIVER).take() else {
        set_error(&not_started());
        return;
    };

    for (handle, slot) in driver.contexts.drain() {
        if let Some(ctx) = lock(&slot).take() {
            warn!(handle, "Context still open at shutdown, destroying");
            if let Err(e) = ctx.destroy() {
                warn!(handle, error = %e, "Failed to destroy context");
            }
        }
    }
    report(driver.registry.shutdown());
}

// ===== Enumeration =====

pub fn get_num_cameras() -> Option<usize> {
    with_driver(|driver| Ok(driver.registry.num_cameras()))
}

pub fn get_camera_info(device_number: usize) -> Option<CameraIdentity> {
    with_driver(|driver| driver.registry.camera_info(device_number))
}

pub fn get_num_modes(device_number: usize) -> Option<usize> {
    with_driver(|driver| driver.registry.num_modes(device_number))
}

pub fn get_mode_string(device_number: usize, mode_number: usize) -> Option<String> {
    with_driver(|driver| driver.registry.mode_string(device_number, mode_number))
}

// ===== Context lifecycle =====

pub fn new_context(device_number: usize, num_buffers: usize, mode_number: usize) -> Option<ContextHandle> {
    with_driver(|driver| {
        let ctx = driver
            .registry
            .new_context(device_number, num_buffers, mode_number)?;
        let handle = driver.next_handle;
        driver.next_handle += 1;
        driver.contexts.insert(handle, Arc::new(Mutex::new(Some(ctx))));
        Ok(ContextHandle(handle))
    })
}

pub fn delete_context(handle: ContextHandle) {
    let Some(slot) = with_driver(|driver| {
        driver
            .contexts
            .remove(&handle.0)
            .ok_or(CamError::InvalidContext)
    }) else {
        return;
    };
    if let Some(ctx) = lock(&slot).take() {
        report(ctx.destroy());
    }
}

pub fn context_coding(handle: ContextHandle) -> Option<PixelCoding> {
    with_context(handle, |ctx| Ok(ctx.coding()))
}

pub fn context_depth(handle: ContextHandle) -> Option<u32> {
    with_context(handle, |ctx| Ok(ctx.depth()))
}

pub fn context_device_number(handle: ContextHandle) -> Option<usize> {
    with_context(handle, |ctx| Ok(ctx.device_number()))
}

pub fn start(handle: ContextHandle) {
    with_context(handle, CamContext::start);
}

pub fn stop(handle: ContextHandle) {
    with_context(handle, CamContext::stop);
}

// ===== Properties =====

pub fn get_num_properties(handle: ContextHandle) -> Option<usize> {
    with_context(handle, |ctx| ctx.num_properties())
}

pub fn get_property_info(handle: ContextHandle, index: usize) -> Option<PropertyInfo> {
    with_context(handle, |ctx| ctx.property_info(index))
}

/// Current `(value, auto)` of a property
pub fn get_property(handle: ContextHandle, index: usize) -> Option<(i64, bool)> {
    with_context(handle, |ctx| ctx.property(index)).map(|v| (v.value, v.auto))
}

pub fn set_property(handle: ContextHandle, index: usize, value: i64, auto: bool) {
    with_context(handle, |ctx| ctx.set_property(index, PropertyValue { value, auto }));
}

// ===== Frames =====

/// Copy the next frame, tightly packed, into `dest`.
///
/// A negative timeout waits forever. A frame flagged by the transport is
/// still returned; the advisory lands on the error channel.
pub fn grab_next_frame_blocking(handle: ContextHandle, dest: &mut [u8], timeout_secs: f32) -> Option<GrabbedFrame> {
    let frame = with_context(handle, |ctx| {
        ctx.grab_next_frame_blocking(dest, Timeout::from_secs_f32(timeout_secs))
    })?;
    flag_advisory(&frame);
    Some(frame)
}

pub fn grab_next_frame_blocking_with_stride(
    handle: ContextHandle,
    dest: &mut [u8],
    stride: usize,
    timeout_secs: f32,
) -> Option<GrabbedFrame> {
    let frame = with_context(handle, |ctx| {
        ctx.grab_next_frame_blocking_with_stride(dest, stride, Timeout::from_secs_f32(timeout_secs))
    })?;
    flag_advisory(&frame);
    Some(frame)
}

/// Wait for the next frame and run `inspect` on it in place.
///
/// The frame stays lent out until [`unpoint_frame`] or the next grab.
pub fn point_next_frame_blocking<R>(
    handle: ContextHandle,
    timeout_secs: f32,
    inspect: impl FnOnce(&PointedFrame<'_>) -> R,
) -> Option<R> {
    with_context(handle, |ctx| {
        let pointed = ctx.point_next_frame_blocking(Timeout::from_secs_f32(timeout_secs))?;
        flag_advisory(&pointed.frame);
        Ok(inspect(&pointed))
    })
}

pub fn unpoint_frame(handle: ContextHandle) {
    with_context(handle, CamContext::unpoint_frame);
}

pub fn get_last_timestamp(handle: ContextHandle) -> Option<f64> {
    with_context(handle, |ctx| ctx.last_timestamp())
}

pub fn get_last_framenumber(handle: ContextHandle) -> Option<i64> {
    with_context(handle, |ctx| ctx.last_framenumber())
}

// ===== Trigger modes =====

pub fn get_num_trigger_modes(handle: ContextHandle) -> Option<usize> {
    with_context(handle, |ctx| ctx.num_trigger_modes())
}

pub fn get_trigger_mode_string(handle: ContextHandle, index: usize) -> Option<String> {
    with_context(handle, |ctx| ctx.trigger_mode_string(index))
}

pub fn get_trigger_mode_number(handle: ContextHandle) -> Option<usize> {
    with_context(handle, |ctx| ctx.trigger_mode_number())
}

pub fn set_trigger_mode_number(handle: ContextHandle, index: usize) {
    with_context(handle, |ctx| ctx.set_trigger_mode_number(index));
}

// ===== Geometry and buffers =====

pub fn get_frame_offset(handle: ContextHandle) -> Option<(u32, u32)> {
    with_context(handle, |ctx| ctx.frame_offset())
}

pub fn set_frame_offset(handle: ContextHandle, left: u32, top: u32) {
    with_context(handle, |ctx| ctx.set_frame_offset(left, top));
}

pub fn get_frame_size(handle: ContextHandle) -> Option<(u32, u32)> {
    with_context(handle, |ctx| ctx.frame_size())
}

pub fn set_frame_size(handle: ContextHandle, width: u32, height: u32) {
    with_context(handle, |ctx| ctx.set_frame_size(width, height));
}

pub fn get_max_frame_size(handle: ContextHandle) -> Option<(u32, u32)> {
    with_context(handle, |ctx| ctx.max_frame_size())
}

pub fn get_buffer_size(handle: ContextHandle) -> Option<usize> {
    with_context(handle, |ctx| ctx.buffer_size())
}

pub fn get_framerate(handle: ContextHandle) -> Option<f32> {
    with_context(handle, |ctx| ctx.framerate())
}

pub fn set_framerate(handle: ContextHandle, framerate: f32) {
    with_context(handle, |ctx| ctx.set_framerate(framerate));
}

pub fn get_num_framebuffers(handle: ContextHandle) -> Option<usize> {
    with_context(handle, |ctx| ctx.num_framebuffers())
}

pub fn set_num_framebuffers(handle: ContextHandle, count: usize) {
    with_context(handle, |ctx| ctx.set_num_framebuffers(count));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_truncation_respects_char_boundaries() {
        let mut message = "é".repeat(200);
        truncate_message(&mut message, MAX_ERROR_LEN);
        assert!(message.len() <= MAX_ERROR_LEN);
        assert_eq!(message.len(), 254);

        let mut short = "timeout exceeded".to_string();
        truncate_message(&mut short, MAX_ERROR_LEN);
        assert_eq!(short, "timeout exceeded");
    }

    #[test]
    fn test_error_channel_is_per_thread() {
        clear_error();
        set_error(&CamError::FrameTimeout);
        assert_eq!(have_error(), -392074);
        assert_eq!(get_error_string(), "timeout exceeded");

        let other = std::thread::spawn(have_error).join().unwrap();
        assert_eq!(other, 0);

        clear_error();
        assert_eq!(have_error(), 0);
        assert!(get_error_string().is_empty());
    }
}
