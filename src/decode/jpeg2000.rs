//! JPEG 2000 backend built on OpenJPEG (`jpeg2k`).

use ndarray::{ArrayD, IxDyn};

use crate::error::DecodeError;
use crate::format::{RawContainer, SampleVolume};

use super::transfer_syntax::{compression_family, CompressionFamily};
use super::DecodeStrategy;

const BACKEND: &str = "jpeg2000";

/// Registry entry for this backend.
pub const STRATEGY: DecodeStrategy = DecodeStrategy {
    name: BACKEND,
    serves: &["JPEG 2000 Lossless", "JPEG 2000"],
    attempt: decode_jpeg2000,
};

fn codec_error(message: String) -> DecodeError {
    DecodeError::Codec {
        backend: BACKEND,
        message,
    }
}

/// Decode JPEG 2000 codestreams, one per frame, into 32-bit samples.
pub fn decode_jpeg2000(container: &RawContainer) -> Result<SampleVolume, DecodeError> {
    if compression_family(&container.transfer_syntax) != CompressionFamily::Jpeg2000 {
        return Err(DecodeError::NotApplicable {
            strategy: BACKEND,
            transfer_syntax: container.transfer_syntax.clone(),
        });
    }

    let layout = container.layout;
    layout.validate()?;

    let fragments = container.pixel_data.frame_fragments(layout.frames)?;
    let pixels = layout.rows * layout.columns;
    let mut samples: Vec<i32> = Vec::with_capacity(layout.frames * layout.samples_per_frame());

    for (index, fragment) in fragments.iter().enumerate() {
        let image = jpeg2k::Image::from_bytes(fragment)
            .map_err(|e| codec_error(format!("frame {}: {}", index, e)))?;
        let components = image.components();

        if components.len() < layout.samples_per_pixel {
            return Err(codec_error(format!(
                "frame {} has {} components, expected {}",
                index,
                components.len(),
                layout.samples_per_pixel
            )));
        }

        let planes: Vec<&[i32]> = components[..layout.samples_per_pixel]
            .iter()
            .map(|c| c.data())
            .collect();
        if planes.iter().any(|plane| plane.len() != pixels) {
            return Err(codec_error(format!(
                "frame {} does not match {}x{}",
                index, layout.columns, layout.rows
            )));
        }

        for pixel in 0..pixels {
            for plane in &planes {
                samples.push(plane[pixel]);
            }
        }
    }

    ArrayD::from_shape_vec(IxDyn(&layout.shape()), samples)
        .map(SampleVolume::I32)
        .map_err(|e| DecodeError::InvalidLayout(e.to_string()))
}
