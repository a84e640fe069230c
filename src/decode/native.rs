//! Direct extraction of uncompressed samples.

use ndarray::{ArrayD, IxDyn};

use crate::error::DecodeError;
use crate::format::{PixelData, RawContainer, SampleVolume};

use super::transfer_syntax::is_big_endian;

/// Interpret native pixel bytes according to the declared layout.
///
/// Trailing bytes beyond the declared geometry (odd-length padding) are
/// ignored.
pub fn extract_native(container: &RawContainer) -> Result<SampleVolume, DecodeError> {
    let bytes = match &container.pixel_data {
        PixelData::Native(bytes) => bytes,
        PixelData::Encapsulated(_) => {
            return Err(DecodeError::NotApplicable {
                strategy: "direct",
                transfer_syntax: container.transfer_syntax.clone(),
            })
        }
    };

    let layout = &container.layout;
    layout.validate()?;

    let needed = layout.frames * layout.frame_bytes();
    if bytes.len() < needed {
        return Err(DecodeError::ShortPixelData {
            expected: needed,
            actual: bytes.len(),
        });
    }

    let data = &bytes[..needed];
    let shape = layout.shape();
    let big_endian = is_big_endian(&container.transfer_syntax);

    let volume = match (layout.bits_allocated, layout.signed) {
        (8, false) => SampleVolume::U8(array(&shape, data.to_vec())?),
        (8, true) => SampleVolume::I16(array(
            &shape,
            data.iter().map(|&b| b as i8 as i16).collect(),
        )?),
        (16, false) => SampleVolume::U16(array(
            &shape,
            data.chunks_exact(2)
                .map(|c| {
                    let raw = [c[0], c[1]];
                    if big_endian {
                        u16::from_be_bytes(raw)
                    } else {
                        u16::from_le_bytes(raw)
                    }
                })
                .collect(),
        )?),
        (16, true) => SampleVolume::I16(array(
            &shape,
            data.chunks_exact(2)
                .map(|c| {
                    let raw = [c[0], c[1]];
                    if big_endian {
                        i16::from_be_bytes(raw)
                    } else {
                        i16::from_le_bytes(raw)
                    }
                })
                .collect(),
        )?),
        (32, false) => SampleVolume::U32(array(
            &shape,
            data.chunks_exact(4)
                .map(|c| {
                    let raw = [c[0], c[1], c[2], c[3]];
                    if big_endian {
                        u32::from_be_bytes(raw)
                    } else {
                        u32::from_le_bytes(raw)
                    }
                })
                .collect(),
        )?),
        (32, true) => SampleVolume::I32(array(
            &shape,
            data.chunks_exact(4)
                .map(|c| {
                    let raw = [c[0], c[1], c[2], c[3]];
                    if big_endian {
                        i32::from_be_bytes(raw)
                    } else {
                        i32::from_le_bytes(raw)
                    }
                })
                .collect(),
        )?),
        (bits, _) => {
            return Err(DecodeError::InvalidLayout(format!(
                "unsupported bits allocated: {}",
                bits
            )))
        }
    };

    Ok(volume)
}

fn array<T>(shape: &[usize], samples: Vec<T>) -> Result<ArrayD<T>, DecodeError> {
    ArrayD::from_shape_vec(IxDyn(shape), samples)
        .map_err(|e| DecodeError::InvalidLayout(e.to_string()))
}
