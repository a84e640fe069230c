use thiserror::Error;

/// Errors raised by a container reader while turning bytes into pixel data.
#[derive(Debug, Clone, Error)]
pub enum ReaderError {
    /// The container is not something this reader understands
    #[error("Unsupported container: {reason}")]
    Unsupported { reason: String },

    /// The container is recognised but structurally broken
    #[error("Malformed container: {0}")]
    Malformed(String),

    /// A required attribute is missing from the container
    #[error("Missing attribute: {0}")]
    MissingAttribute(&'static str),

    /// The underlying bytes could not be read
    #[error("I/O error: {0}")]
    Io(String),
}

/// A single decode strategy failed.
///
/// These are transient: the decoder chain logs them and moves on to the next
/// strategy.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The strategy does not handle this encoding at all
    #[error("{strategy} does not handle transfer syntax {transfer_syntax}")]
    NotApplicable {
        strategy: &'static str,
        transfer_syntax: String,
    },

    /// Pixel payload is shorter than the declared geometry requires
    #[error("Pixel data too short: need {expected} bytes, got {actual}")]
    ShortPixelData { expected: usize, actual: usize },

    /// Declared geometry cannot be represented
    #[error("Invalid sample layout: {0}")]
    InvalidLayout(String),

    /// Encapsulated fragments do not map onto frames
    #[error("Cannot map {fragments} fragments onto {frames} frames")]
    FragmentMismatch { fragments: usize, frames: usize },

    /// A codec backend rejected the data
    #[error("{backend} failed: {message}")]
    Codec {
        backend: &'static str,
        message: String,
    },
}

/// Every decode strategy failed for a container.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("Could not decode {encoding_label} pixel data ({} strategies tried)", .attempts.len())]
    Exhausted {
        /// Human-readable name of the compression scheme
        encoding_label: String,

        /// One line per failed attempt, in order
        attempts: Vec<String>,

        /// Remediation hints, never empty
        suggestions: Vec<String>,
    },
}

/// Errors from sample normalization.
#[derive(Debug, Clone, Error)]
pub enum NormalizeError {
    #[error("Sample array is empty")]
    EmptyArray,

    #[error("Invalid window: center {center}, width {width}")]
    InvalidWindow { center: f64, width: f64 },

    #[error("Sample array contains non-finite values")]
    NonFiniteSamples,

    #[error("Sample array has no finite values")]
    NoFiniteSamples,
}

/// Errors from encoding or decoding frame images.
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    #[error("Failed to encode frame: {message}")]
    Encode { message: String },

    #[error("Failed to decode frame: {message}")]
    Decode { message: String },

    #[error("Unsupported raster shape: {0:?}")]
    Shape(Vec<usize>),
}

/// Errors that can surface from an ingestion.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The container decoded to zero frames
    #[error("Container holds no frames")]
    EmptyVolume,

    /// Background task failure (panic or cancellation)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from frame queries against the store.
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    /// The document is still being ingested
    #[error("Document {document_id} is not ready yet")]
    NotReady { document_id: String },

    #[error("Frame {frame} not found in document {document_id}")]
    FrameNotFound { document_id: String, frame: String },

    /// Eye queries against a single-volume document
    #[error("Document {document_id} has no per-eye frames")]
    NotDualEye { document_id: String },

    /// Flattening requested for a dual-eye document
    #[error("Document {document_id} is not a single volume")]
    NotVolume { document_id: String },

    /// No usable source for a flattened cross-section
    #[error("Document {document_id} has no frames to flatten")]
    NothingToFlatten { document_id: String },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures inside the flattening pipeline.
///
/// These never leave the engine's public `flatten` entry point, which falls
/// back to the unflattened slice instead.
#[derive(Debug, Clone, Error)]
pub enum FlattenError {
    #[error("Cannot flatten array of shape {0:?}")]
    Shape(Vec<usize>),

    #[error("Grayscale conversion failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Smoothing failed: {0}")]
    Encode(#[from] EncodeError),

    /// Quadratic fit is underdetermined or singular
    #[error("Curve fit failed: {0}")]
    Fit(String),
}
