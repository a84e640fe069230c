//! Baseline/extended JPEG backend built on the `image` decoder.

use image::ImageFormat;
use ndarray::{ArrayD, IxDyn};

use crate::error::DecodeError;
use crate::format::{RawContainer, SampleVolume};

use super::transfer_syntax::{compression_family, CompressionFamily};
use super::DecodeStrategy;

const BACKEND: &str = "jpeg";

/// Registry entry for this backend.
pub const STRATEGY: DecodeStrategy = DecodeStrategy {
    name: BACKEND,
    serves: &["JPEG Baseline", "JPEG Extended"],
    attempt: decode_jpeg,
};

/// Decode 8-bit JPEG fragments, one per frame.
pub fn decode_jpeg(container: &RawContainer) -> Result<SampleVolume, DecodeError> {
    if compression_family(&container.transfer_syntax) != CompressionFamily::Jpeg {
        return Err(DecodeError::NotApplicable {
            strategy: BACKEND,
            transfer_syntax: container.transfer_syntax.clone(),
        });
    }

    let layout = container.layout;
    layout.validate()?;
    if layout.bits_allocated != 8 {
        return Err(DecodeError::Codec {
            backend: BACKEND,
            message: format!("{}-bit JPEG is not supported", layout.bits_allocated),
        });
    }

    let fragments = container.pixel_data.frame_fragments(layout.frames)?;
    let mut samples = Vec::with_capacity(layout.frames * layout.samples_per_frame());

    for (index, fragment) in fragments.iter().enumerate() {
        let img = image::load_from_memory_with_format(fragment, ImageFormat::Jpeg).map_err(|e| {
            DecodeError::Codec {
                backend: BACKEND,
                message: format!("frame {}: {}", index, e),
            }
        })?;

        if img.width() as usize != layout.columns || img.height() as usize != layout.rows {
            return Err(DecodeError::Codec {
                backend: BACKEND,
                message: format!(
                    "frame {} is {}x{}, expected {}x{}",
                    index,
                    img.width(),
                    img.height(),
                    layout.columns,
                    layout.rows
                ),
            });
        }

        match layout.samples_per_pixel {
            1 => samples.extend(img.to_luma8().into_raw()),
            3 => samples.extend(img.to_rgb8().into_raw()),
            n => {
                return Err(DecodeError::InvalidLayout(format!(
                    "{} samples per pixel in JPEG data",
                    n
                )))
            }
        }
    }

    ArrayD::from_shape_vec(IxDyn(&layout.shape()), samples)
        .map(SampleVolume::U8)
        .map_err(|e| DecodeError::InvalidLayout(e.to_string()))
}
