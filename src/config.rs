// SPDX-License-Identifier: GPL-3.0-only

//! Runtime configuration
//!
//! Read from JSON at `$CAM_IFACE_CONFIG` or `<config dir>/cam_iface/config.json`.
//! A missing file means defaults; `$CAM_IFACE_BACKENDS` overrides the probe order.

use crate::backends::camera::types::PixelCoding;
use crate::constants::{backend_names, env};
use crate::errors::{CamError, CamResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What to do when a backend named in the configuration cannot be loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPolicy {
    /// Skip it; it contributes zero cameras
    #[default]
    Permissive,
    /// Fail startup
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backends to probe, in device-number order
    pub backends: Vec<String>,
    pub load_policy: LoadPolicy,
    pub blank: BlankConfig,
    pub sim: SimConfig,
    pub v4l2: V4l2Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backends: vec![backend_names::V4L2.to_string(), backend_names::SIM.to_string()],
            load_policy: LoadPolicy::default(),
            blank: BlankConfig::default(),
            sim: SimConfig::default(),
            v4l2: V4l2Config::default(),
        }
    }
}

/// Null backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlankConfig {
    pub num_cameras: usize,
}

impl Default for BlankConfig {
    fn default() -> Self {
        Self { num_cameras: 1 }
    }
}

/// Software cameras, one entry per camera
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub cameras: Vec<SimCameraConfig>,
}

/// How a software camera hands frames over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimTransport {
    /// Pollable descriptor, dequeue after readiness
    #[default]
    Polled,
    /// Producer thread calling back into a bounded channel
    Callback,
    /// Retrieve call that blocks until the frame is due
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimCameraConfig {
    pub vendor: String,
    pub model: String,
    pub chip: String,
    pub transport: SimTransport,
    pub modes: Vec<SimModeConfig>,
    pub faults: SimFaults,
}

impl Default for SimCameraConfig {
    fn default() -> Self {
        Self {
            vendor: "cam_iface".to_string(),
            model: "simulated camera".to_string(),
            chip: "5AE0000000000000h".to_string(),
            transport: SimTransport::default(),
            modes: vec![
                SimModeConfig {
                    width: 640,
                    height: 480,
                    coding: PixelCoding::Mono8,
                    framerate: 30.0,
                },
                SimModeConfig {
                    width: 320,
                    height: 240,
                    coding: PixelCoding::Yuv422,
                    framerate: 60.0,
                },
            ],
            faults: SimFaults::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimModeConfig {
    pub width: u32,
    pub height: u32,
    pub coding: PixelCoding,
    pub framerate: f32,
}

/// Injected transport faults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimFaults {
    /// Every n-th frame arrives with part of its rows missing (0 = never)
    pub data_missing_every: u64,
    /// Every n-th frame is flagged as lost by the transport (0 = never)
    pub data_lost_every: u64,
    /// Never deliver any frame
    pub stalled: bool,
}

/// Video4Linux2 settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct V4l2Config {
    /// Device nodes to use instead of scanning `/dev/video*`
    pub devices: Option<Vec<String>>,
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> CamResult<Self> {
        let mut config = match Self::path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Location of the configuration file
    pub fn path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(env::CONFIG_PATH) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("cam_iface").join("config.json"))
    }

    pub fn from_file(path: &Path) -> CamResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CamError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), backends = ?config.backends, "Loaded configuration");
        Ok(config)
    }

    pub fn from_json(text: &str) -> CamResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> CamResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(list) = std::env::var(env::BACKENDS) {
            self.backends = parse_backend_list(&list);
            info!(backends = ?self.backends, "Backend order overridden from environment");
        }
    }
}

/// Parse a comma separated backend list, e.g. `" SIM, blank ,"`
pub fn parse_backend_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}
