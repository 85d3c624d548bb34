use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One canonical frame: full-resolution luma plane followed by the two
/// chroma planes, concatenated.
#[derive(Clone)]
pub struct Frame {
    /// Y plane, then U, then V
    pub data: Bytes,

    pub meta: FrameMetadata,

    /// Production timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub origin: FrameOrigin,
}

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOrigin {
    /// Synthetic test pattern
    Mock,
    /// Converted camera image
    Live,
}

impl Frame {
    pub fn new(data: Bytes, width: u32, height: u32, sequence: u64, origin: FrameOrigin) -> Self {
        Self {
            data,
            meta: FrameMetadata {
                sequence,
                width,
                height,
                origin,
            },
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    /// Size of the luma plane in bytes.
    pub fn luma_len(&self) -> usize {
        self.meta.width as usize * self.meta.height as usize
    }

    pub fn luma(&self) -> &[u8] {
        &self.data[..self.luma_len().min(self.data.len())]
    }

    pub fn chroma(&self) -> &[u8] {
        &self.data[self.luma_len().min(self.data.len())..]
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Byte length of a canonical 4:2:0 frame: `w*h` luma plus `w*h/2` chroma.
pub fn canonical_len(width: u32, height: u32) -> usize {
    let luma = width as usize * height as usize;
    luma + luma / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_len_is_one_and_a_half_times_area() {
        assert_eq!(canonical_len(640, 480), 640 * 480 * 3 / 2);
        assert_eq!(canonical_len(2, 2), 6);
        assert_eq!(canonical_len(0, 480), 0);
    }

    #[test]
    fn luma_and_chroma_split_at_area() {
        let data = Bytes::from(vec![1, 1, 1, 1, 2, 2]);
        let frame = Frame::new(data, 2, 2, 7, FrameOrigin::Mock);
        assert_eq!(frame.luma(), &[1, 1, 1, 1]);
        assert_eq!(frame.chroma(), &[2, 2]);
        assert_eq!(frame.meta.sequence, 7);
    }
}
