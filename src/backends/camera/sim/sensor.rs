// SPDX-License-Identifier: GPL-3.0-only

//! Frame generator of a software camera

use crate::backends::camera::types::{
    FrameBuffer, FrameLayout, FrameMeta, FrameStatus, PropertyValue, host_timestamp,
};
use crate::config::SimFaults;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Settings shared between a session and its producer
#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub framerate: f32,
    pub brightness: i64,
    pub gain: PropertyValue,
    pub shutter: PropertyValue,
    /// 0 is free running; every other mode waits for an external trigger
    pub trigger_mode: usize,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            framerate: 30.0,
            brightness: 0,
            gain: PropertyValue::manual(0),
            shutter: PropertyValue::manual(10_000),
            trigger_mode: 0,
        }
    }
}

pub type SharedSettings = Arc<Mutex<SensorSettings>>;

pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Byte written at `offset` of `row` in frame `framenumber`
pub fn pattern_byte(offset: usize, row: usize, framenumber: i64) -> u8 {
    ((offset + row + framenumber as usize) % 251) as u8
}

/// Status the fault schedule assigns to a frame
pub fn fault_status(faults: &SimFaults, framenumber: i64) -> FrameStatus {
    let n = framenumber as u64 + 1;
    if faults.data_lost_every > 0 && n % faults.data_lost_every == 0 {
        FrameStatus::DataLost
    } else if faults.data_missing_every > 0 && n % faults.data_missing_every == 0 {
        FrameStatus::DataMissing
    } else {
        FrameStatus::Complete
    }
}

/// Fills buffers with a moving test pattern
pub struct Sensor {
    layout: FrameLayout,
    settings: SharedSettings,
    faults: SimFaults,
    next_framenumber: i64,
}

impl Sensor {
    pub fn new(layout: FrameLayout, settings: SharedSettings, faults: SimFaults) -> Self {
        Self {
            layout,
            settings,
            faults,
            next_framenumber: 0,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        let fps = lock(&self.settings).framerate.max(0.01);
        Duration::from_secs_f32(1.0 / fps)
    }

    /// Whether frames are produced at all
    pub fn is_armed(&self) -> bool {
        !self.faults.stalled && lock(&self.settings).trigger_mode == 0
    }

    /// Count a frame that had no buffer to land in
    pub fn drop_frame(&mut self) -> i64 {
        let dropped = self.next_framenumber;
        self.next_framenumber += 1;
        dropped
    }

    /// Expose the next frame into `buffer`.
    ///
    /// Row padding is zeroed. Frames scheduled as data-missing lose their
    /// lower half.
    pub fn expose(&mut self, buffer: &mut FrameBuffer) {
        let framenumber = self.next_framenumber;
        self.next_framenumber += 1;

        let brightness = lock(&self.settings).brightness as u8;
        let status = fault_status(&self.faults, framenumber);
        let stride = self.layout.src_stride;
        let row_bytes = self.layout.row_bytes().min(stride);
        let height = self.layout.height as usize;

        for (row, line) in buffer.data_mut().chunks_mut(stride).take(height).enumerate() {
            let split = row_bytes.min(line.len());
            let (pixels, padding) = line.split_at_mut(split);
            let blank = status == FrameStatus::DataMissing && row >= height / 2;
            for (offset, px) in pixels.iter_mut().enumerate() {
                *px = if blank {
                    0
                } else {
                    pattern_byte(offset, row, framenumber).wrapping_add(brightness)
                };
            }
            padding.fill(0);
        }

        buffer.meta = FrameMeta {
            timestamp: host_timestamp(),
            framenumber,
            status,
        };
    }
}
