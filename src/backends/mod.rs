// SPDX-License-Identifier: GPL-3.0-only

//! Capture backends
//!
//! - [`camera`]: backend contracts, the capture state machine and the
//!   concrete backends (blank, simulated and Video4Linux2)

pub mod camera;
