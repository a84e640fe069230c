//! DICOM reader built on `dicom-rs`.
//!
//! Only the attributes the decoder chain needs are read: transfer syntax,
//! geometry, sample representation, the display window and the pixel data
//! (native or encapsulated). Decompression stays in [`crate::decode`].

use async_trait::async_trait;
use bytes::Bytes;
use dicom::core::value::Value;
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::DefaultDicomObject;
use tracing::debug;

use crate::error::ReaderError;
use crate::raster::WindowHint;

use super::container::{Extraction, PixelData, RawContainer, SampleLayout, SourceFile, VolumeReader};
use super::detect::{is_dicom_preamble, SourceFormat};

const PREAMBLE_LEN: usize = 128;

/// Reads DICOM Part 10 files into a [`RawContainer`].
#[derive(Debug, Clone, Default)]
pub struct DicomReader;

impl DicomReader {
    pub fn new() -> Self {
        Self
    }

    /// Parse a DICOM file held in memory.
    pub fn parse(bytes: &[u8]) -> Result<RawContainer, ReaderError> {
        // `from_reader` expects the stream to start at the magic code
        let body = if is_dicom_preamble(bytes) {
            &bytes[PREAMBLE_LEN..]
        } else {
            bytes
        };

        let object = dicom::object::from_reader(body)
            .map_err(|e| ReaderError::Malformed(e.to_string()))?;

        let transfer_syntax = object
            .meta()
            .transfer_syntax()
            .trim_end_matches('\0')
            .to_string();

        let layout = SampleLayout {
            frames: optional_int(&object, tags::NUMBER_OF_FRAMES).unwrap_or(1).max(1),
            rows: required_int(&object, tags::ROWS, "Rows")?,
            columns: required_int(&object, tags::COLUMNS, "Columns")?,
            samples_per_pixel: optional_int(&object, tags::SAMPLES_PER_PIXEL).unwrap_or(1),
            bits_allocated: required_int(&object, tags::BITS_ALLOCATED, "BitsAllocated")? as u16,
            signed: optional_int(&object, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1,
        };

        let window = WindowHint::from_values(
            optional_floats(&object, tags::WINDOW_CENTER).as_deref(),
            optional_floats(&object, tags::WINDOW_WIDTH).as_deref(),
        );

        let pixel_data = read_pixel_data(&object)?;

        debug!(
            transfer_syntax = %transfer_syntax,
            frames = layout.frames,
            rows = layout.rows,
            columns = layout.columns,
            bits = layout.bits_allocated,
            encapsulated = pixel_data.is_encapsulated(),
            "Parsed DICOM container"
        );

        Ok(RawContainer {
            transfer_syntax,
            layout,
            pixel_data,
            window,
        })
    }
}

#[async_trait]
impl VolumeReader for DicomReader {
    fn format(&self) -> SourceFormat {
        SourceFormat::Dicom
    }

    async fn read(&self, source: &SourceFile) -> Result<Extraction, ReaderError> {
        let bytes = source.bytes.clone();
        let container = tokio::task::spawn_blocking(move || Self::parse(&bytes))
            .await
            .map_err(|e| ReaderError::Io(e.to_string()))??;
        Ok(Extraction::Container(container))
    }
}

fn optional_int(object: &DefaultDicomObject, tag: Tag) -> Option<usize> {
    object.element(tag).ok()?.to_int::<u32>().ok().map(|v| v as usize)
}

fn required_int(
    object: &DefaultDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<usize, ReaderError> {
    optional_int(object, tag).ok_or(ReaderError::MissingAttribute(name))
}

fn optional_floats(object: &DefaultDicomObject, tag: Tag) -> Option<Vec<f64>> {
    object.element(tag).ok()?.to_multi_float64().ok()
}

fn read_pixel_data(object: &DefaultDicomObject) -> Result<PixelData, ReaderError> {
    let element = object
        .element(tags::PIXEL_DATA)
        .map_err(|_| ReaderError::MissingAttribute("PixelData"))?;

    match element.value() {
        Value::Primitive(value) => Ok(PixelData::Native(Bytes::from(value.to_bytes().into_owned()))),
        Value::PixelSequence(sequence) => Ok(PixelData::Encapsulated(
            sequence
                .fragments()
                .iter()
                .map(|fragment| Bytes::from(fragment.clone()))
                .collect(),
        )),
        Value::Sequence(_) => Err(ReaderError::Malformed(
            "PixelData holds a sequence of items".to_string(),
        )),
    }
}
