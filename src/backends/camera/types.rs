// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use crate::constants::capture::YUV_ROW_ALIGNMENT;
use crate::errors::Advisory;
use serde::{Deserialize, Serialize};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

/// Identity of an enumerated camera
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraIdentity {
    pub vendor: String,
    pub model: String,
    /// Chip id or serial number
    pub chip: String,
}

impl std::fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.vendor, self.model, self.chip)
    }
}

/// Pixel coding tag of a context
///
/// Fixed when the context is constructed. No colour-space conversion is
/// ever performed on frames, the tag only describes the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelCoding {
    #[default]
    Unknown,
    Mono8,
    Yuv411,
    Yuv422,
    Yuv444,
    Rgb8,
    Mono16,
    Rgb16,
    Mono16S,
    Rgb16S,
    Raw8,
    Raw16,
    Argb8,
}

impl PixelCoding {
    pub const ALL: [PixelCoding; 13] = [
        PixelCoding::Unknown,
        PixelCoding::Mono8,
        PixelCoding::Yuv411,
        PixelCoding::Yuv422,
        PixelCoding::Yuv444,
        PixelCoding::Rgb8,
        PixelCoding::Mono16,
        PixelCoding::Rgb16,
        PixelCoding::Mono16S,
        PixelCoding::Rgb16S,
        PixelCoding::Raw8,
        PixelCoding::Raw16,
        PixelCoding::Argb8,
    ];

    /// Bits per pixel
    pub fn depth(&self) -> u32 {
        match self {
            PixelCoding::Unknown => 0,
            PixelCoding::Mono8 | PixelCoding::Raw8 => 8,
            PixelCoding::Yuv411 => 12,
            PixelCoding::Yuv422
            | PixelCoding::Mono16
            | PixelCoding::Mono16S
            | PixelCoding::Raw16 => 16,
            PixelCoding::Yuv444 | PixelCoding::Rgb8 => 24,
            PixelCoding::Argb8 => 32,
            PixelCoding::Rgb16 | PixelCoding::Rgb16S => 48,
        }
    }

    pub fn is_yuv(&self) -> bool {
        matches!(
            self,
            PixelCoding::Yuv411 | PixelCoding::Yuv422 | PixelCoding::Yuv444
        )
    }

    /// Width in pixels after the row padding this coding requires
    pub fn padded_width(&self, width: u32) -> u32 {
        if self.is_yuv() {
            width.div_ceil(YUV_ROW_ALIGNMENT) * YUV_ROW_ALIGNMENT
        } else {
            width
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelCoding::Unknown => "UNKNOWN",
            PixelCoding::Mono8 => "MONO8",
            PixelCoding::Yuv411 => "YUV411",
            PixelCoding::Yuv422 => "YUV422",
            PixelCoding::Yuv444 => "YUV444",
            PixelCoding::Rgb8 => "RGB8",
            PixelCoding::Mono16 => "MONO16",
            PixelCoding::Rgb16 => "RGB16",
            PixelCoding::Mono16S => "MONO16S",
            PixelCoding::Rgb16S => "RGB16S",
            PixelCoding::Raw8 => "RAW8",
            PixelCoding::Raw16 => "RAW16",
            PixelCoding::Argb8 => "ARGB8",
        }
    }
}

impl std::fmt::Display for PixelCoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Geometry of the frames held by a buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Bytes between the starts of two consecutive rows in the pool
    pub src_stride: usize,
}

impl FrameLayout {
    /// Layout for a coding, including that coding's row padding
    pub fn for_coding(width: u32, height: u32, coding: PixelCoding) -> Self {
        let depth = coding.depth();
        let src_stride = coding.padded_width(width) as usize * depth as usize / 8;
        Self {
            width,
            height,
            depth,
            src_stride,
        }
    }

    /// Layout with an explicit stride, as reported by a driver
    pub fn with_stride(width: u32, height: u32, depth: u32, src_stride: usize) -> Self {
        Self {
            width,
            height,
            depth,
            src_stride,
        }
    }

    /// Meaningful bytes per row
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.depth as usize / 8
    }

    /// Size of one pool buffer
    pub fn buffer_size(&self) -> usize {
        self.src_stride * self.height as usize
    }
}

/// Descriptor of one index-addressed property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInfo {
    pub name: String,
    pub is_present: bool,
    pub min_value: i64,
    pub max_value: i64,
    pub has_auto_mode: bool,
    pub has_manual_mode: bool,
    pub is_scaled_quantity: bool,
    pub scaled_unit_name: Option<String>,
    pub scale_offset: f64,
    pub scale_gain: f64,
}

impl PropertyInfo {
    /// Plain manual property with an integer range
    pub fn manual(name: &str, min_value: i64, max_value: i64) -> Self {
        Self {
            name: name.to_string(),
            is_present: true,
            min_value,
            max_value,
            has_auto_mode: false,
            has_manual_mode: true,
            is_scaled_quantity: false,
            scaled_unit_name: None,
            scale_offset: 0.0,
            scale_gain: 1.0,
        }
    }

    pub fn with_auto(mut self) -> Self {
        self.has_auto_mode = true;
        self
    }

    /// Raw values map to `offset + gain * raw` expressed in `unit`
    pub fn scaled(mut self, unit: &str, offset: f64, gain: f64) -> Self {
        self.is_scaled_quantity = true;
        self.scaled_unit_name = Some(unit.to_string());
        self.scale_offset = offset;
        self.scale_gain = gain;
        self
    }

    /// Check a requested value against this descriptor
    pub fn accepts(&self, value: &PropertyValue) -> bool {
        if value.auto {
            self.has_auto_mode
        } else {
            self.has_manual_mode && (self.min_value..=self.max_value).contains(&value.value)
        }
    }
}

/// Current value of a property and whether the camera controls it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertyValue {
    pub value: i64,
    pub auto: bool,
}

impl PropertyValue {
    pub fn manual(value: i64) -> Self {
        Self { value, auto: false }
    }
}

/// Bound on a blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    After(Duration),
}

impl Timeout {
    /// Negative (or non-finite) seconds mean forever
    pub fn from_secs_f32(secs: f32) -> Self {
        if secs < 0.0 {
            return Timeout::Forever;
        }
        match Duration::try_from_secs_f32(secs) {
            Ok(d) => Timeout::After(d),
            Err(_) => Timeout::Forever,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Forever => None,
            Timeout::After(d) => Some(*d),
        }
    }

    /// `None` when there is no deadline, including waits too long to represent
    pub fn deadline_from(&self, now: Instant) -> Option<Instant> {
        self.as_duration().and_then(|d| now.checked_add(d))
    }

    /// Time left until `deadline`, saturating at zero
    pub fn remaining(deadline: Option<Instant>) -> Self {
        match deadline {
            None => Timeout::Forever,
            Some(at) => Timeout::After(at.saturating_duration_since(Instant::now())),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Quality of a filled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    #[default]
    Complete,
    DataMissing,
    DataLost,
}

impl FrameStatus {
    pub fn advisory(&self) -> Option<Advisory> {
        match self {
            FrameStatus::Complete => None,
            FrameStatus::DataMissing => Some(Advisory::DataMissing),
            FrameStatus::DataLost => Some(Advisory::DataLost),
        }
    }
}

/// Metadata stamped on a buffer when it is filled
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameMeta {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    pub framenumber: i64,
    pub status: FrameStatus,
}

/// Storage behind a pool buffer
pub enum FrameMemory {
    /// Heap memory owned by the buffer
    Owned(Vec<u8>),
    /// Driver memory mapped into the process
    Mapped { ptr: NonNull<u8>, len: usize },
}

/// One buffer of a pool, moved by value between driver side and caller side
///
/// Whoever holds the value owns the memory; handing it back to the driver
/// (requeue) is the only way the driver side regains it.
pub struct FrameBuffer {
    pub index: usize,
    pub meta: FrameMeta,
    memory: FrameMemory,
}

// SAFETY: a mapped region is only reachable through the single FrameBuffer
// value carrying it, so moving that value to another thread moves exclusive access.
unsafe impl Send for FrameBuffer {}

impl FrameBuffer {
    /// Zero-filled heap buffer
    pub fn owned(index: usize, len: usize) -> Self {
        Self {
            index,
            meta: FrameMeta::default(),
            memory: FrameMemory::Owned(vec![0; len]),
        }
    }

    /// Buffer over driver-mapped memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the returned buffer (or any buffer later built from the same region)
    /// exists, and no other `FrameBuffer` may alias the region at the same time.
    pub unsafe fn mapped(index: usize, ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            index,
            meta: FrameMeta::default(),
            memory: FrameMemory::Mapped { ptr, len },
        }
    }

    pub fn len(&self) -> usize {
        match &self.memory {
            FrameMemory::Owned(data) => data.len(),
            FrameMemory::Mapped { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &[u8] {
        match &self.memory {
            FrameMemory::Owned(data) => data,
            // SAFETY: guaranteed by the contract of `FrameBuffer::mapped`
            FrameMemory::Mapped { ptr, len } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *len)
            },
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.memory {
            FrameMemory::Owned(data) => data,
            // SAFETY: guaranteed by the contract of `FrameBuffer::mapped`
            FrameMemory::Mapped { ptr, len } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), *len)
            },
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.memory {
            FrameMemory::Owned(_) => "owned",
            FrameMemory::Mapped { .. } => "mapped",
        };
        f.debug_struct("FrameBuffer")
            .field("index", &self.index)
            .field("memory", &kind)
            .field("len", &self.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Result of a successful grab
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrabbedFrame {
    pub timestamp: f64,
    pub framenumber: i64,
    /// Set when the frame is usable but flagged by the transport
    pub advisory: Option<Advisory>,
}

/// A frame left in the pool for zero-copy inspection
#[derive(Debug)]
pub struct PointedFrame<'a> {
    pub data: &'a [u8],
    pub stride: usize,
    pub frame: GrabbedFrame,
}

/// Seconds since the Unix epoch, microsecond resolution
pub fn host_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrepresentable_deadline_means_none() {
        let now = Instant::now();
        assert_eq!(Timeout::Forever.deadline_from(now), None);
        assert_eq!(Timeout::from_secs_f32(1.0e19).deadline_from(now), None);
        assert_eq!(Timeout::After(Duration::MAX).deadline_from(now), None);
        assert_eq!(
            Timeout::After(Duration::from_millis(5)).deadline_from(now),
            Some(now + Duration::from_millis(5))
        );
    }

    #[test]
    fn test_coding_depths() {
        assert_eq!(PixelCoding::Unknown.depth(), 0);
        assert_eq!(PixelCoding::Mono8.depth(), 8);
        assert_eq!(PixelCoding::Yuv411.depth(), 12);
        assert_eq!(PixelCoding::Yuv422.depth(), 16);
        assert_eq!(PixelCoding::Rgb8.depth(), 24);
        assert_eq!(PixelCoding::Rgb16S.depth(), 48);
        assert_eq!(PixelCoding::Argb8.depth(), 32);
    }

    #[test]
    fn test_yuv_rows_are_padded() {
        let layout = FrameLayout::for_coding(330, 10, PixelCoding::Yuv422);
        assert_eq!(layout.src_stride, 336 * 2);
        assert_eq!(layout.row_bytes(), 660);
        assert_eq!(layout.buffer_size(), 336 * 2 * 10);

        let mono = FrameLayout::for_coding(330, 10, PixelCoding::Mono8);
        assert_eq!(mono.src_stride, 330);
    }

    #[test]
    fn test_coding_serde_names() {
        let json = serde_json::to_string(&PixelCoding::Mono16S).unwrap();
        assert_eq!(json, "\"MONO16S\"");
        let parsed: PixelCoding = serde_json::from_str("\"YUV422\"").unwrap();
        assert_eq!(parsed, PixelCoding::Yuv422);
        for coding in PixelCoding::ALL {
            assert_eq!(format!("\"{}\"", coding), serde_json::to_string(&coding).unwrap());
        }
    }

    #[test]
    fn test_timeout_from_seconds() {
        assert_eq!(Timeout::from_secs_f32(-1.0), Timeout::Forever);
        assert_eq!(Timeout::from_secs_f32(f32::NAN), Timeout::Forever);
        assert_eq!(
            Timeout::from_secs_f32(0.25),
            Timeout::After(Duration::from_millis(250))
        );
        assert_eq!(Timeout::from_secs_f32(0.0), Timeout::After(Duration::ZERO));
    }

    #[test]
    fn test_property_accepts() {
        let shutter = PropertyInfo::manual("shutter", 50, 500_000).with_auto();
        assert!(shutter.accepts(&PropertyValue::manual(1000)));
        assert!(!shutter.accepts(&PropertyValue::manual(10)));
        assert!(shutter.accepts(&PropertyValue { value: 0, auto: true }));

        let brightness = PropertyInfo::manual("brightness", 0, 255);
        assert!(!brightness.accepts(&PropertyValue { value: 1, auto: true }));
    }
}
