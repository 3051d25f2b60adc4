// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing cameras and modes over all backends
//! - Grabbing frames with timing statistics
//! - Showing camera properties and trigger modes

use cam_iface::constants::capture::DEFAULT_NUM_BUFFERS;
use cam_iface::constants::timing::DEFAULT_GRAB_TIMEOUT_SECS;
use cam_iface::{BackendRegistry, CamContext, CamError, Config, Timeout};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Configuration from `path` if given, else from the default location
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load()?,
    };
    Ok(config)
}

fn start_registry(config: &Config) -> Result<BackendRegistry, Box<dyn std::error::Error>> {
    let mut registry = BackendRegistry::new(config);
    registry.startup()?;
    Ok(registry)
}

fn open_context(
    registry: &BackendRegistry,
    device: usize,
    num_buffers: usize,
    mode: usize,
) -> Result<CamContext, Box<dyn std::error::Error>> {
    let count = registry.num_cameras();
    if device >= count {
        return Err(match count {
            0 => "No cameras found".to_string(),
            n => format!("Device number {} out of range (0-{})", device, n - 1),
        }
        .into());
    }
    Ok(registry.new_context(device, num_buffers, mode)?)
}

/// List all cameras with their modes
pub fn list_cameras(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let registry = start_registry(config)?;

    if registry.num_cameras() == 0 {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for range in registry.backend_ranges().iter().filter(|r| !r.range.is_empty()) {
        for device in range.range.clone() {
            let info = registry.camera_info(device)?;
            println!("  [{}] {} ({})", device, info, range.name);

            let modes = registry.num_modes(device)?;
            for mode in 0..modes {
                println!("      {}: {}", mode, registry.mode_string(device, mode)?);
            }
        }
        println!();
    }

    Ok(())
}

/// Settings of the `grab` command
pub struct GrabOptions {
    pub device: usize,
    pub buffers: usize,
    pub mode: usize,
    /// Stop after this many frames; Ctrl+C otherwise
    pub count: Option<u64>,
    /// Per-frame timeout in seconds
    pub timeout: Option<f32>,
    pub output: Option<PathBuf>,
}

/// Capture frames until the count is reached or Ctrl+C
pub fn grab(config: &Config, options: GrabOptions) -> Result<(), Box<dyn std::error::Error>> {
    let GrabOptions {
        device,
        buffers,
        mode,
        count,
        timeout,
        output,
    } = options;
    let registry = start_registry(config)?;
    let mut ctx = open_context(&registry, device, buffers, mode)?;

    let (width, height) = ctx.frame_size()?;
    let stride = width as usize * ctx.depth() as usize / 8;
    let mut frame = vec![0u8; stride * height as usize];
    println!(
        "Using camera [{}] {}: {}x{} {}",
        device,
        registry.camera_info(device)?,
        width,
        height,
        ctx.coding()
    );

    let mut sink = match &output {
        Some(path) => Some(File::create(path)?),
        None => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::SeqCst))?;

    let timeout = Timeout::from_secs_f32(timeout.unwrap_or(DEFAULT_GRAB_TIMEOUT_SECS));
    let started = Instant::now();
    let mut stats = GrabStats::default();

    ctx.start()?;
    while !stop.load(Ordering::SeqCst) && count.is_none_or(|n| stats.frames < n) {
        match ctx.grab_next_frame_blocking(&mut frame, timeout) {
            Ok(grabbed) => {
                stats.record(grabbed.framenumber, grabbed.advisory.is_some());
                if let Some(advisory) = grabbed.advisory {
                    println!("  frame {}: {}", grabbed.framenumber, CamError::from(advisory));
                }
                if let Some(file) = sink.as_mut() {
                    file.write_all(&frame)?;
                }
                if stats.frames % 30 == 1 {
                    println!(
                        "  frame {} at {}",
                        grabbed.framenumber,
                        format_timestamp(grabbed.timestamp)
                    );
                }
            }
            Err(e) if e.is_transient() => {
                stats.timeouts += 1;
                println!("  {}", e);
            }
            Err(e) => {
                ctx.destroy().ok();
                return Err(e.into());
            }
        }
    }
    ctx.destroy()?;

    let elapsed = started.elapsed().as_secs_f64();
    println!();
    println!(
        "Captured {} frames in {:.1}s ({:.1} fps)",
        stats.frames,
        elapsed,
        if elapsed > 0.0 { stats.frames as f64 / elapsed } else { 0.0 }
    );
    println!(
        "Skipped framenumbers: {}, flagged frames: {}, failed waits: {}",
        stats.skipped, stats.flagged, stats.timeouts
    );
    if let Some(path) = output {
        println!("Raw frames written to {}", path.display());
    }

    Ok(())
}

/// Show property table and trigger modes of a camera
pub fn show_properties(config: &Config, device: usize, mode: usize) -> Result<(), Box<dyn std::error::Error>> {
    let registry = start_registry(config)?;
    let ctx = open_context(&registry, device, DEFAULT_NUM_BUFFERS, mode)?;

    println!("Camera [{}] {}", device, registry.camera_info(device)?);
    println!("Properties:");
    for index in 0..ctx.num_properties()? {
        let info = ctx.property_info(index)?;
        if !info.is_present {
            println!("  [{}] {}: not present", index, info.name);
            continue;
        }
        let current = match ctx.property(index) {
            Ok(v) if v.auto => format!("{} (auto)", v.value),
            Ok(v) => v.value.to_string(),
            Err(e) => format!("unreadable: {}", e),
        };
        let mut line = format!(
            "  [{}] {}: {} in {}..={}",
            index, info.name, current, info.min_value, info.max_value
        );
        if let (true, Some(unit)) = (info.is_scaled_quantity, &info.scaled_unit_name) {
            line.push_str(&format!(
                " ({} {} per step, offset {})",
                info.scale_gain, unit, info.scale_offset
            ));
        }
        if info.has_auto_mode {
            line.push_str(", auto available");
        }
        println!("{}", line);
    }

    println!("Trigger modes:");
    let current = ctx.trigger_mode_number()?;
    for index in 0..ctx.num_trigger_modes()? {
        let marker = if index == current { "*" } else { " " };
        println!(" {}[{}] {}", marker, index, ctx.trigger_mode_string(index)?);
    }

    ctx.destroy()?;
    Ok(())
}

fn format_timestamp(timestamp: f64) -> String {
    let secs = timestamp.trunc() as i64;
    let nanos = (timestamp.fract() * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{:.3}", timestamp))
}

#[derive(Debug, Default)]
struct GrabStats {
    frames: u64,
    flagged: u64,
    skipped: u64,
    timeouts: u64,
    last_framenumber: Option<i64>,
}

impl GrabStats {
    fn record(&mut self, framenumber: i64, flagged: bool) {
        self.frames += 1;
        if flagged {
            self.flagged += 1;
        }
        if let Some(last) = self.last_framenumber
            && framenumber > last + 1
        {
            self.skipped += (framenumber - last - 1) as u64;
        }
        self.last_framenumber = Some(framenumber);
    }
}
