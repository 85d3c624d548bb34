//! Synthetic stand-in for a camera sensor

use bytes::Bytes;

use super::frame::{canonical_len, Frame, FrameOrigin};

/// Width of each vertical stripe, in columns
pub const STRIPE_WIDTH: u32 = 20;
pub const LUMA_BRIGHT: u8 = 255;
pub const LUMA_DARK: u8 = 0;
/// Neutral chroma: no color
pub const CHROMA_NEUTRAL: u8 = 128;

/// Alternating bright/dark vertical stripes with neutral chroma.
///
/// Pure: the same dimensions always give the same bytes.
pub fn test_pattern(width: u32, height: u32) -> Bytes {
    let w = width as usize;
    let luma = w * height as usize;
    let mut frame = vec![CHROMA_NEUTRAL; canonical_len(width, height)];

    let row: Vec<u8> = (0..width).map(stripe_value).collect();
    for line in frame[..luma].chunks_exact_mut(w.max(1)) {
        line.copy_from_slice(&row);
    }

    Bytes::from(frame)
}

/// Luma value of column `x`.
pub fn stripe_value(x: u32) -> u8 {
    if (x / STRIPE_WIDTH) % 2 == 0 {
        LUMA_BRIGHT
    } else {
        LUMA_DARK
    }
}

pub fn mock_frame(width: u32, height: u32, sequence: u64) -> Frame {
    Frame::new(
        test_pattern(width, height),
        width,
        height,
        sequence,
        FrameOrigin::Mock,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_is_canonical_for_even_sizes() {
        for (w, h) in [(640, 480), (2, 2), (320, 240), (1920, 1080), (40, 2)] {
            assert_eq!(test_pattern(w, h).len(), (w * h * 3 / 2) as usize);
        }
    }

    #[test]
    fn stripes_alternate_every_twenty_columns() {
        let (w, h) = (100u32, 6u32);
        let data = test_pattern(w, h);
        for y in 0..h {
            for x in 0..w {
                let expected = if (x / 20) % 2 == 0 { 255 } else { 0 };
                assert_eq!(data[(y * w + x) as usize], expected, "x={x} y={y}");
            }
        }
        assert_eq!(data[19], 255);
        assert_eq!(data[20], 0);
        assert_eq!(data[40], 255);
    }

    #[test]
    fn chroma_is_neutral() {
        let (w, h) = (64u32, 48u32);
        let data = test_pattern(w, h);
        let luma = (w * h) as usize;
        assert_eq!(data.len() - luma, luma / 2);
        assert!(data[luma..].iter().all(|&b| b == 128));
    }

    #[test]
    fn generation_is_deterministic() {
        assert_eq!(test_pattern(640, 480), test_pattern(640, 480));
    }

    #[test]
    fn zero_sized_pattern_is_empty() {
        assert!(test_pattern(0, 0).is_empty());
        assert!(test_pattern(0, 10).is_empty());
    }

    #[test]
    fn mock_frame_carries_dimensions() {
        let frame = mock_frame(640, 480, 9);
        assert_eq!(frame.meta.origin, FrameOrigin::Mock);
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert_eq!(frame.luma().len(), 640 * 480);
        assert_eq!(frame.chroma().len(), 640 * 480 / 2);
    }
}
