//! Source containers and the reader seam.
//!
//! Parsing proprietary containers is left to [`VolumeReader`] implementations.
//! This module defines what they produce and how a file is routed to one:
//!
//! - [`detect::detect_format`] maps a file name (or a DICOM preamble) to a
//!   [`SourceFormat`], whose tag names the cache partition
//! - [`container`] holds the raw container and sample-volume model
//! - [`dicom`] (feature `dicom`) is the one reader built into the crate

pub mod container;
pub mod detect;
#[cfg(feature = "dicom")]
pub mod dicom;

pub(crate) use container::with_samples;
pub use container::{
    DualEyeExtraction, Extraction, EyeImage, EyeVolume, PixelData, RawContainer, ReaderSet,
    SampleLayout, SampleVolume, SourceFile, VolumeReader,
};
pub use detect::{
    detect_format, is_dicom_preamble, laterality_from_filename, resolve_laterality, EyeSide,
    FormatFamily, SourceFormat,
};
#[cfg(feature = "dicom")]
pub use dicom::DicomReader;
