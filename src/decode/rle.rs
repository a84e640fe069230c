//! RLE Lossless transcoding.
//!
//! Each frame fragment carries a 64-byte header (segment count plus up to 15
//! segment offsets) followed by PackBits-encoded segments. Segments hold one
//! byte plane each, most significant byte first, one group per sample. The
//! transcoder rebuilds an explicit little-endian native buffer, which the
//! direct extraction path then reads.

use bytes::Bytes;

use crate::error::DecodeError;
use crate::format::{PixelData, RawContainer, SampleLayout, SampleVolume};

use super::native::extract_native;
use super::transfer_syntax::{EXPLICIT_VR_LITTLE_ENDIAN, RLE_LOSSLESS};

const HEADER_LEN: usize = 64;
const MAX_SEGMENTS: usize = 15;
const BACKEND: &str = "rle-transcode";

/// Transcode RLE pixel data to native samples and extract them.
pub fn transcode_and_extract(container: &RawContainer) -> Result<SampleVolume, DecodeError> {
    let native = transcode(container)?;
    extract_native(&native)
}

/// Rewrite an RLE Lossless container as explicit little-endian native data.
pub fn transcode(container: &RawContainer) -> Result<RawContainer, DecodeError> {
    if container.transfer_syntax.trim_end_matches('\0') != RLE_LOSSLESS {
        return Err(DecodeError::NotApplicable {
            strategy: BACKEND,
            transfer_syntax: container.transfer_syntax.clone(),
        });
    }

    let layout = container.layout;
    layout.validate()?;

    let fragments = container.pixel_data.frame_fragments(layout.frames)?;
    let mut native = Vec::with_capacity(layout.frames * layout.frame_bytes());
    for fragment in &fragments {
        decode_frame(fragment, &layout, &mut native)?;
    }

    Ok(RawContainer {
        transfer_syntax: EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
        layout,
        pixel_data: PixelData::Native(Bytes::from(native)),
        window: container.window,
    })
}

fn codec_error(message: impl Into<String>) -> DecodeError {
    DecodeError::Codec {
        backend: BACKEND,
        message: message.into(),
    }
}

fn decode_frame(data: &[u8], layout: &SampleLayout, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(codec_error("fragment shorter than RLE header"));
    }

    let read_u32 = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as usize;

    let segment_count = read_u32(0);
    let bytes_per_sample = layout.bytes_per_sample();
    let expected_segments = bytes_per_sample * layout.samples_per_pixel;
    if segment_count != expected_segments || segment_count > MAX_SEGMENTS {
        return Err(codec_error(format!(
            "expected {} segments, header declares {}",
            expected_segments, segment_count
        )));
    }

    let offsets: Vec<usize> = (0..segment_count).map(|i| read_u32(4 + i * 4)).collect();
    let pixels = layout.rows * layout.columns;

    let mut segments = Vec::with_capacity(segment_count);
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());
        if start < HEADER_LEN || start > end || end > data.len() {
            return Err(codec_error(format!("segment {} has invalid bounds {}..{}", i, start, end)));
        }
        segments.push(unpack_bits(&data[start..end], pixels)?);
    }

    for pixel in 0..pixels {
        for sample in 0..layout.samples_per_pixel {
            // Little-endian output: least significant plane first
            for byte in 0..bytes_per_sample {
                let plane = sample * bytes_per_sample + (bytes_per_sample - 1 - byte);
                out.push(segments[plane][pixel]);
            }
        }
    }

    Ok(())
}

/// Decode one PackBits segment into exactly `expected` bytes.
pub fn unpack_bits(src: &[u8], expected: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(expected);
    let mut i = 0;

    while i < src.len() && out.len() < expected {
        let header = src[i] as i8;
        i += 1;

        if header >= 0 {
            let count = header as usize + 1;
            let end = i + count;
            if end > src.len() {
                return Err(codec_error("literal run past end of segment"));
            }
            out.extend_from_slice(&src[i..end]);
            i = end;
        } else if header != -128 {
            let count = (1 - header as isize) as usize;
            let value = *src
                .get(i)
                .ok_or_else(|| codec_error("replicate run past end of segment"))?;
            i += 1;
            out.extend(std::iter::repeat(value).take(count));
        }
    }

    if out.len() < expected {
        return Err(codec_error(format!(
            "segment decoded to {} bytes, need {}",
            out.len(),
            expected
        )));
    }
    out.truncate(expected);
    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================
