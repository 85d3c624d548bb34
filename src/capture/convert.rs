//! Three-plane YUV 4:2:0 images and their conversion to the canonical layout

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::frame::{Frame, FrameOrigin};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("plane {plane} declares {declared} valid bytes but holds {available}")]
    PlaneLength {
        plane: usize,
        declared: usize,
        available: usize,
    },

    #[error("combined plane size overflows")]
    TooLarge,
}

/// One component buffer as handed over by the capture subsystem.
///
/// `valid_len` is what the producer claims is readable; it must agree with
/// the buffer it ships.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub valid_len: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let valid_len = data.len();
        Self { data, valid_len }
    }

    pub fn with_declared_len(data: impl Into<Bytes>, valid_len: usize) -> Self {
        Self {
            data: data.into(),
            valid_len,
        }
    }

    fn checked(&self, index: usize) -> Result<&[u8], ConvertError> {
        if self.valid_len != self.data.len() {
            return Err(ConvertError::PlaneLength {
                plane: index,
                declared: self.valid_len,
                available: self.data.len(),
            });
        }
        Ok(&self.data[..])
    }
}

/// Image delivered by an image reader: Y, U and V planes.
#[derive(Debug, Clone)]
pub struct YuvImage {
    pub width: u32,
    pub height: u32,
    pub planes: [Plane; 3],
}

impl YuvImage {
    pub fn new(width: u32, height: u32, y: Plane, u: Plane, v: Plane) -> Self {
        Self {
            width,
            height,
            planes: [y, u, v],
        }
    }

    /// Copy into a live frame. The image can be released as soon as this
    /// returns.
    pub fn to_frame(&self, sequence: u64) -> Result<Frame, ConvertError> {
        let start = Instant::now();
        let data = concat_planes(&self.planes)?;
        metrics::histogram!("convert_time_us").record(start.elapsed().as_micros() as f64);
        Ok(Frame::new(
            data,
            self.width,
            self.height,
            sequence,
            FrameOrigin::Live,
        ))
    }
}

/// Concatenate Y, U and V into one buffer: `[Y | U | V]`.
///
/// Chroma samples are not interleaved. Every plane is validated before
/// anything is allocated, so a bad plane yields no output at all.
pub fn concat_planes(planes: &[Plane; 3]) -> Result<Bytes, ConvertError> {
    let y = planes[0].checked(0)?;
    let u = planes[1].checked(1)?;
    let v = planes[2].checked(2)?;

    let total = y
        .len()
        .checked_add(u.len())
        .and_then(|n| n.checked_add(v.len()))
        .ok_or(ConvertError::TooLarge)?;

    let mut out = BytesMut::with_capacity(total);
    out.extend_from_slice(y);
    out.extend_from_slice(u);
    out.extend_from_slice(v);
    Ok(out.freeze())
}
