//! Pixel decoding with an ordered chain of fallbacks.
//!
//! Optional codec backends are discovered once when the registry is built and
//! never re-probed. Decoding a container walks a fixed chain and returns the
//! first success:
//!
//! ```text
//! uncompressed:  direct
//! compressed:    backend A ─► backend B ─► rle-transcode ─► direct
//! ```
//!
//! Individual failures are logged and recorded. When every strategy fails the
//! caller gets [`ExtractionError::Exhausted`] carrying the encoding label and
//! remediation hints.

#[cfg(feature = "jpeg-backend")]
pub mod jpeg;
#[cfg(feature = "jpeg2000")]
pub mod jpeg2000;
pub mod native;
pub mod rle;
pub mod transfer_syntax;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DecodeError, ExtractionError};
use crate::format::{RawContainer, SampleVolume};

use transfer_syntax::{compression_family, CompressionFamily};

pub use native::extract_native;
pub use rle::{transcode, transcode_and_extract, unpack_bits};
pub use transfer_syntax::{compression_label, is_big_endian, is_compressed};

/// Signature shared by every strategy in the chain.
pub type DecodeFn = fn(&RawContainer) -> Result<SampleVolume, DecodeError>;

/// One step of the decoder chain.
#[derive(Debug, Clone, Copy)]
pub struct DecodeStrategy {
    pub name: &'static str,

    /// Compression labels this strategy is meant for
    pub serves: &'static [&'static str],

    pub attempt: DecodeFn,
}

/// Plain sample extraction, also the last resort for compressed data.
pub const DIRECT: DecodeStrategy = DecodeStrategy {
    name: "direct",
    serves: &["Uncompressed"],
    attempt: native::extract_native,
};

/// RLE Lossless → native transcode, then direct extraction.
pub const TRANSCODE: DecodeStrategy = DecodeStrategy {
    name: "rle-transcode",
    serves: &["RLE Lossless"],
    attempt: rle::transcode_and_extract,
};

/// A successfully decoded container.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub volume: SampleVolume,

    /// Strategy that produced the samples
    pub strategy: &'static str,

    pub encoding_label: &'static str,

    pub compressed: bool,
}

/// Which backends are present and what they can decode.
#[derive(Debug, Clone, Serialize)]
pub struct SupportStatus {
    pub backends: Vec<&'static str>,

    /// Compression labels, annotated with the feature they need when missing
    pub supported_compressions: Vec<String>,
}

// =============================================================================
// Decoder Registry
// =============================================================================

/// Capability registry for optional codec backends.
#[derive(Debug, Clone)]
pub struct DecoderRegistry {
    backends: Vec<DecodeStrategy>,
}

impl DecoderRegistry {
    /// Register every backend compiled into this build.
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut backends: Vec<DecodeStrategy> = Vec::new();

        #[cfg(feature = "jpeg-backend")]
        backends.push(jpeg::STRATEGY);

        #[cfg(feature = "jpeg2000")]
        backends.push(jpeg2000::STRATEGY);

        let registry = Self { backends };
        info!(backends = ?registry.backend_names(), "Decoder backends resolved");
        registry
    }

    /// A registry with no optional backends.
    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    pub fn with_backends(backends: Vec<DecodeStrategy>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name).collect()
    }

    fn serves(&self, label: &str) -> bool {
        self.backends.iter().any(|b| b.serves.contains(&label))
    }

    /// Decode a container's pixel data.
    pub fn decode(&self, container: &RawContainer) -> Result<Decoded, ExtractionError> {
        let transfer_syntax = container.transfer_syntax.as_str();
        let label = compression_label(transfer_syntax);
        let compressed = is_compressed(transfer_syntax) || container.pixel_data.is_encapsulated();

        let chain: Vec<DecodeStrategy> = if compressed {
            debug!(encoding = label, "Decoding compressed pixel data");
            self.backends
                .iter()
                .copied()
                .chain([TRANSCODE, DIRECT])
                .collect()
        } else {
            vec![DIRECT]
        };

        let mut attempts = Vec::with_capacity(chain.len());
        for strategy in chain {
            match (strategy.attempt)(container) {
                Ok(volume) => {
                    debug!(
                        strategy = strategy.name,
                        encoding = label,
                        shape = ?volume.shape(),
                        "Decoded pixel data"
                    );
                    return Ok(Decoded {
                        volume,
                        strategy: strategy.name,
                        encoding_label: label,
                        compressed,
                    });
                }
                Err(err @ DecodeError::NotApplicable { .. }) => {
                    debug!(strategy = strategy.name, "{}", err);
                    attempts.push(format!("{}: {}", strategy.name, err));
                }
                Err(err) => {
                    warn!(
                        strategy = strategy.name,
                        encoding = label,
                        error = %err,
                        "Decode attempt failed"
                    );
                    attempts.push(format!("{}: {}", strategy.name, err));
                }
            }
        }

        Err(ExtractionError::Exhausted {
            encoding_label: label.to_string(),
            attempts,
            suggestions: self.suggestions(transfer_syntax, compressed),
        })
    }

    /// Remediation hints for a failed decode. Never empty.
    fn suggestions(&self, transfer_syntax: &str, compressed: bool) -> Vec<String> {
        let mut hints = Vec::new();

        if compressed {
            match compression_family(transfer_syntax) {
                CompressionFamily::Jpeg if !self.serves("JPEG Baseline") => hints.push(
                    "Rebuild with the `jpeg-backend` feature to decode JPEG Baseline/Extended"
                        .to_string(),
                ),
                CompressionFamily::Jpeg2000 if !self.serves("JPEG 2000") => hints.push(
                    "Rebuild with the `jpeg2000` feature to decode JPEG 2000".to_string(),
                ),
                CompressionFamily::JpegLossless | CompressionFamily::JpegLs => hints.push(
                    "JPEG Lossless and JPEG-LS need an external toolkit, e.g. `gdcmconv --raw`"
                        .to_string(),
                ),
                _ => {}
            }
            hints.push("Convert the file to an uncompressed transfer syntax".to_string());
        } else {
            hints.push(
                "Check that rows, columns, bits allocated and frame count match the pixel data"
                    .to_string(),
            );
            hints.push("Re-export the file from the acquisition software".to_string());
        }

        hints
    }

    /// Report backends and the compressions this build can decode.
    pub fn support_status(&self) -> SupportStatus {
        let annotate = |label: &str, feature: &str| {
            if self.serves(label) {
                label.to_string()
            } else {
                format!("{} (requires `{}` feature)", label, feature)
            }
        };

        SupportStatus {
            backends: self.backend_names(),
            supported_compressions: vec![
                "Uncompressed".to_string(),
                "RLE Lossless".to_string(),
                annotate("JPEG Baseline", "jpeg-backend"),
                annotate("JPEG 2000", "jpeg2000"),
            ],
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::detect()
    }
}

// =============================================================================
// Tests
// =============================================================================
