// SPDX-License-Identifier: GPL-3.0-only

//! cam_iface - uniform camera access over many capture backends
//!
//! Every compiled-in backend contributes a contiguous range of device
//! numbers to one flat namespace. Opening a device yields a [`CamContext`]
//! that dispatches to the owning backend's capture session.
//!
//! # Architecture
//!
//! - [`backends`]: backend contracts, the registry, capture sessions and
//!   the blank, simulated and Video4Linux2 backends
//! - [`api`]: flat call surface with a per-thread error channel
//! - [`config`]: JSON configuration and environment overrides
//! - [`errors`]: error type and the stable integer codes
//!
//! # Example
//!
//! ```ignore
//! use cam_iface::{BackendRegistry, Config, Timeout};
//!
//! let mut registry = BackendRegistry::new(&Config::load()?);
//! registry.startup()?;
//! let mut ctx = registry.new_context(0, 5, 0)?;
//! ctx.start()?;
//! let (w, h) = ctx.frame_size()?;
//! let mut frame = vec![0u8; (w * h * ctx.depth() / 8) as usize];
//! let info = ctx.grab_next_frame_blocking(&mut frame, Timeout::from_secs_f32(1.0))?;
//! println!("frame {} at {}", info.framenumber, info.timestamp);
//! ```

pub mod api;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types
pub use backends::camera::{
    BackendRegistry, CamContext, CameraIdentity, GrabbedFrame, PixelCoding, PointedFrame,
    PropertyInfo, PropertyValue, Timeout,
};
pub use config::{Config, LoadPolicy};
pub use errors::{Advisory, CamError, CamResult};
