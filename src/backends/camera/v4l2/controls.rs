// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 control interface
//!
//! Maps the camera property table onto V4L2 controls. Every property is a
//! main control plus an optional companion control switching auto mode.

use crate::backends::camera::types::{PropertyInfo, PropertyValue};
use crate::errors::{CamError, CamResult};
use std::os::fd::RawFd;
use tracing::debug;

// ===== V4L2 Control Class Bases =====
const V4L2_CTRL_CLASS_USER: u32 = 0x00980000;
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;

const V4L2_CID_BASE: u32 = V4L2_CTRL_CLASS_USER | 0x900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

// ===== V4L2 Control IDs =====

pub const V4L2_CID_BRIGHTNESS: u32 = V4L2_CID_BASE;
pub const V4L2_CID_CONTRAST: u32 = V4L2_CID_BASE + 1;
pub const V4L2_CID_AUTO_WHITE_BALANCE: u32 = V4L2_CID_BASE + 12;
pub const V4L2_CID_AUTOGAIN: u32 = V4L2_CID_BASE + 18;
pub const V4L2_CID_GAIN: u32 = V4L2_CID_BASE + 19;
/// White balance temperature in Kelvin
pub const V4L2_CID_WHITE_BALANCE_TEMPERATURE: u32 = V4L2_CID_BASE + 26;
/// Exposure mode menu
pub const V4L2_CID_EXPOSURE_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 1;
/// Absolute exposure time in 100µs units
pub const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 2;

// ===== V4L2 Exposure Auto Menu Values =====
const V4L2_EXPOSURE_MANUAL: i32 = 1;
/// Auto exposure time, manual iris. The auto mode UVC cameras implement.
const V4L2_EXPOSURE_APERTURE_PRIORITY: i32 = 3;

// ===== V4L2 Control Flags =====
const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;
const V4L2_CTRL_FLAG_READ_ONLY: u32 = 0x0004;

// ===== V4L2 ioctl Numbers =====

/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<V4l2Queryctrl>() == 68);

/// Range and flags of one V4L2 control
#[derive(Debug, Clone)]
pub struct ControlInfo {
    pub id: u32,
    pub name: String,
    pub minimum: i32,
    pub maximum: i32,
    pub default_value: i32,
    pub flags: u32,
}

impl ControlInfo {
    pub fn is_disabled(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_DISABLED != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_READ_ONLY != 0
    }
}

fn extract_name(bytes: &[u8; 32]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..len]).to_string()
}

fn control_error(what: &str, control_id: u32) -> CamError {
    let errno = std::io::Error::last_os_error();
    match errno.raw_os_error() {
        Some(libc::EINTR) => CamError::InterruptedSyscall,
        Some(libc::EINVAL) => CamError::HardwareFeatureNotAvailable(format!(
            "control {:#010x} is not supported",
            control_id
        )),
        _ => CamError::Io(format!("{} control {:#010x}: {}", what, control_id, errno)),
    }
}

/// Query a control; `None` when the device does not have it or it is disabled
pub fn query_control(fd: RawFd, control_id: u32) -> Option<ControlInfo> {
    // SAFETY: plain-data ioctl argument
    let mut qctrl: V4l2Queryctrl = unsafe { std::mem::zeroed() };
    qctrl.id = control_id;

    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCTRL as _, &mut qctrl as *mut V4l2Queryctrl) };
    if result < 0 {
        return None;
    }

    let info = ControlInfo {
        id: qctrl.id,
        name: extract_name(&qctrl.name),
        minimum: qctrl.minimum,
        maximum: qctrl.maximum,
        default_value: qctrl.default_value,
        flags: qctrl.flags,
    };
    (!info.is_disabled()).then_some(info)
}

pub fn get_control(fd: RawFd, control_id: u32) -> CamResult<i32> {
    let mut ctrl = V4l2Control {
        id: control_id,
        value: 0,
    };
    let result = unsafe { libc::ioctl(fd, VIDIOC_G_CTRL as _, &mut ctrl as *mut V4l2Control) };
    if result < 0 {
        return Err(control_error("get", control_id));
    }
    Ok(ctrl.value)
}

pub fn set_control(fd: RawFd, control_id: u32, value: i32) -> CamResult<()> {
    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };
    let result = unsafe { libc::ioctl(fd, VIDIOC_S_CTRL as _, &mut ctrl as *mut V4l2Control) };
    if result < 0 {
        return Err(control_error("set", control_id));
    }
    if ctrl.value != value {
        debug!(control_id, requested = value, actual = ctrl.value, "V4L2 control value was clamped");
    }
    Ok(())
}

/// How a property switches between auto and manual
#[derive(Debug, Clone, Copy)]
pub struct AutoControl {
    pub id: u32,
    pub on: i32,
    pub off: i32,
}

/// Property backed by V4L2 controls
#[derive(Debug, Clone, Copy)]
pub struct ControlProperty {
    pub name: &'static str,
    pub id: u32,
    pub auto: Option<AutoControl>,
    /// Unit, offset and gain for the scaled representation
    pub scale: Option<(&'static str, f64, f64)>,
}

/// Property table, in index order
pub const PROPERTIES: [ControlProperty; 5] = [
    ControlProperty {
        name: "brightness",
        id: V4L2_CID_BRIGHTNESS,
        auto: None,
        scale: None,
    },
    ControlProperty {
        name: "contrast",
        id: V4L2_CID_CONTRAST,
        auto: None,
        scale: None,
    },
    ControlProperty {
        name: "gain",
        id: V4L2_CID_GAIN,
        auto: Some(AutoControl {
            id: V4L2_CID_AUTOGAIN,
            on: 1,
            off: 0,
        }),
        scale: None,
    },
    ControlProperty {
        name: "shutter",
        id: V4L2_CID_EXPOSURE_ABSOLUTE,
        auto: Some(AutoControl {
            id: V4L2_CID_EXPOSURE_AUTO,
            on: V4L2_EXPOSURE_APERTURE_PRIORITY,
            off: V4L2_EXPOSURE_MANUAL,
        }),
        scale: Some(("msec", 0.0, 0.1)),
    },
    ControlProperty {
        name: "white balance",
        id: V4L2_CID_WHITE_BALANCE_TEMPERATURE,
        auto: Some(AutoControl {
            id: V4L2_CID_AUTO_WHITE_BALANCE,
            on: 1,
            off: 0,
        }),
        scale: Some(("K", 0.0, 1.0)),
    },
];

pub fn control_property(index: usize) -> CamResult<&'static ControlProperty> {
    PROPERTIES
        .get(index)
        .ok_or_else(|| CamError::InvalidArgument(format!("property {} does not exist", index)))
}

impl ControlProperty {
    /// Descriptor as seen on the device behind `fd`
    pub fn describe(&self, fd: RawFd) -> PropertyInfo {
        let main = query_control(fd, self.id);
        let auto_present = self
            .auto
            .is_some_and(|auto| query_control(fd, auto.id).is_some());

        let mut info = match &main {
            Some(ctrl) => PropertyInfo::manual(self.name, ctrl.minimum as i64, ctrl.maximum as i64),
            None => PropertyInfo {
                is_present: auto_present,
                has_manual_mode: false,
                ..PropertyInfo::manual(self.name, 0, 0)
            },
        };
        if main.as_ref().is_some_and(ControlInfo::is_read_only) {
            info.has_manual_mode = false;
        }
        if auto_present {
            info = info.with_auto();
        }
        if let Some((unit, offset, gain)) = self.scale {
            info = info.scaled(unit, offset, gain);
        }
        info
    }

    pub fn read(&self, fd: RawFd) -> CamResult<PropertyValue> {
        let value = match query_control(fd, self.id) {
            Some(_) => get_control(fd, self.id)? as i64,
            None if self.auto_present(fd) => 0,
            None => {
                return Err(CamError::HardwareFeatureNotAvailable(format!(
                    "camera has no {} control",
                    self.name
                )));
            }
        };
        let auto = match self.auto {
            Some(auto) if self.auto_present(fd) => get_control(fd, auto.id)? != auto.off,
            _ => false,
        };
        Ok(PropertyValue { value, auto })
    }

    pub fn write(&self, fd: RawFd, value: PropertyValue) -> CamResult<()> {
        let info = self.describe(fd);
        if !info.is_present {
            return Err(CamError::HardwareFeatureNotAvailable(format!(
                "camera has no {} control",
                self.name
            )));
        }
        if !info.accepts(&value) {
            return Err(CamError::InvalidArgument(format!(
                "{} does not accept {} (auto: {})",
                self.name, value.value, value.auto
            )));
        }

        match (self.auto, value.auto) {
            (Some(auto), true) => set_control(fd, auto.id, auto.on),
            (auto, false) => {
                if let Some(auto) = auto
                    && info.has_auto_mode
                {
                    set_control(fd, auto.id, auto.off)?;
                }
                let raw = i32::try_from(value.value).map_err(|_| {
                    CamError::InvalidArgument(format!("{} is out of range", value.value))
                })?;
                set_control(fd, self.id, raw)
            }
            (None, true) => Err(CamError::HardwareFeatureNotAvailable(format!(
                "{} has no auto mode",
                self.name
            ))),
        }
    }

    fn auto_present(&self, fd: RawFd) -> bool {
        self.auto.is_some_and(|auto| query_control(fd, auto.id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_id_values() {
        assert_eq!(V4L2_CID_BRIGHTNESS, 0x00980900);
        assert_eq!(V4L2_CID_GAIN, 0x00980913);
        assert_eq!(V4L2_CID_WHITE_BALANCE_TEMPERATURE, 0x0098091a);
        assert_eq!(V4L2_CID_EXPOSURE_AUTO, 0x009a0901);
        assert_eq!(V4L2_CID_EXPOSURE_ABSOLUTE, 0x009a0902);
    }

    #[test]
    fn test_property_table() {
        assert_eq!(PROPERTIES[3].name, "shutter");
        assert!(PROPERTIES[0].auto.is_none());
        assert!(control_property(PROPERTIES.len()).is_err());
    }

    #[test]
    fn test_bad_descriptor_reports_absent_property() {
        // Queries fail on a descriptor that is not a video device
        let info = PROPERTIES[2].describe(-1);
        assert!(!info.is_present);
        assert!(matches!(
            PROPERTIES[0].read(-1),
            Err(CamError::HardwareFeatureNotAvailable(_))
        ));
    }
}
