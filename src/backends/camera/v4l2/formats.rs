// SPDX-License-Identifier: GPL-3.0-only

//! Pixel format and mode helpers for V4L2 devices

use crate::backends::camera::types::PixelCoding;
use crate::constants::capture::FALLBACK_FRAMERATE;

/// Coding of an uncompressed V4L2 pixel format.
///
/// Compressed and unsupported formats map to [`PixelCoding::Unknown`].
pub fn coding_for_fourcc(fourcc: &[u8; 4]) -> PixelCoding {
    match fourcc {
        b"GREY" => PixelCoding::Mono8,
        b"Y16 " => PixelCoding::Mono16,
        b"YUYV" | b"UYVY" => PixelCoding::Yuv422,
        b"Y41P" => PixelCoding::Yuv411,
        b"RGB3" => PixelCoding::Rgb8,
        // 8-bit Bayer
        b"BA81" | b"GBRG" | b"GRBG" | b"RGGB" => PixelCoding::Raw8,
        // 16-bit Bayer
        b"BYR2" | b"GB16" | b"GR16" | b"RG16" => PixelCoding::Raw16,
        _ => PixelCoding::Unknown,
    }
}

/// Printable form of a fourcc; non-ASCII bytes become `?`
pub fn fourcc_str(fourcc: &[u8; 4]) -> String {
    fourcc
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Frames per second of a frame interval given as a fraction of a second
pub fn fps_from_interval(numerator: u32, denominator: u32) -> f32 {
    if numerator == 0 || denominator == 0 {
        return FALLBACK_FRAMERATE;
    }
    denominator as f32 / numerator as f32
}

/// One capturable combination of format, size and rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct V4l2Mode {
    pub fourcc: [u8; 4],
    pub coding: PixelCoding,
    pub width: u32,
    pub height: u32,
    pub framerate: f32,
}

impl V4l2Mode {
    /// e.g. `640 x 480 YUYV YUV422 30 fps`
    pub fn description(&self) -> String {
        format!(
            "{} x {} {} {} {} fps",
            self.width,
            self.height,
            fourcc_str(&self.fourcc).trim_end(),
            self.coding,
            self.framerate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(coding_for_fourcc(b"GREY"), PixelCoding::Mono8);
        assert_eq!(coding_for_fourcc(b"Y16 "), PixelCoding::Mono16);
        assert_eq!(coding_for_fourcc(b"UYVY"), PixelCoding::Yuv422);
        assert_eq!(coding_for_fourcc(b"GRBG"), PixelCoding::Raw8);
        assert_eq!(coding_for_fourcc(b"MJPG"), PixelCoding::Unknown);
    }

    #[test]
    fn test_mode_description() {
        let mode = V4l2Mode {
            fourcc: *b"Y16 ",
            coding: PixelCoding::Mono16,
            width: 640,
            height: 480,
            framerate: fps_from_interval(1, 30),
        };
        assert_eq!(mode.description(), "640 x 480 Y16 MONO16 30 fps");
        assert_eq!(fps_from_interval(2, 15), 7.5);
        assert_eq!(fps_from_interval(0, 0), FALLBACK_FRAMERATE);
        assert_eq!(fourcc_str(&[b'A', 0, b'B', b'C']), "A?BC");
    }
}
