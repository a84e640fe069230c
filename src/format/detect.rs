//! Source-format detection and eye laterality.
//!
//! Formats are identified from the file name extension, with a DICOM preamble
//! sniff for extensionless files. Each format belongs to a processing family
//! and owns a partition of the persistent frame cache.

use serde::{Deserialize, Serialize};

// =============================================================================
// SourceFormat
// =============================================================================

/// Container formats the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// DICOM (single frame or multi-frame)
    Dicom,

    /// Topcon FDA volume
    Fda,

    /// Heidelberg E2E dual-eye container
    E2e,

    /// Topcon FDS, recognised but not processed
    Fds,
}

/// How a format is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    /// One volume, integer-indexed frames
    SingleVolume,

    /// Left/right groups of fundus and tomography images
    DualEye,

    /// Acknowledged but not processed
    Unsupported,
}

impl SourceFormat {
    /// Partitions searched by a cache lookup, in order.
    pub const CACHEABLE: [SourceFormat; 3] = [SourceFormat::Dicom, SourceFormat::E2e, SourceFormat::Fda];

    /// Cache partition name.
    pub const fn tag(&self) -> &'static str {
        match self {
            SourceFormat::Dicom => "dicom",
            SourceFormat::Fda => "fda",
            SourceFormat::E2e => "e2e",
            SourceFormat::Fds => "fds",
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            SourceFormat::Dicom => "DICOM",
            SourceFormat::Fda => "Topcon FDA",
            SourceFormat::E2e => "Heidelberg E2E",
            SourceFormat::Fds => "Topcon FDS",
        }
    }

    pub const fn family(&self) -> FormatFamily {
        match self {
            SourceFormat::Dicom | SourceFormat::Fda => FormatFamily::SingleVolume,
            SourceFormat::E2e => FormatFamily::DualEye,
            SourceFormat::Fds => FormatFamily::Unsupported,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "dicom" => Some(SourceFormat::Dicom),
            "fda" => Some(SourceFormat::Fda),
            "e2e" => Some(SourceFormat::E2e),
            "fds" => Some(SourceFormat::Fds),
            _ => None,
        }
    }
}

// =============================================================================
// Format Detection
// =============================================================================

/// Offset of the `DICM` magic after the 128-byte DICOM preamble.
const DICOM_MAGIC_OFFSET: usize = 128;

const DICOM_MAGIC: &[u8] = b"DICM";

/// Check whether bytes start with a DICOM Part 10 preamble.
pub fn is_dicom_preamble(bytes: &[u8]) -> bool {
    bytes.len() >= DICOM_MAGIC_OFFSET + DICOM_MAGIC.len()
        && &bytes[DICOM_MAGIC_OFFSET..DICOM_MAGIC_OFFSET + DICOM_MAGIC.len()] == DICOM_MAGIC
}

/// Detect the source format from a file name and its leading bytes.
///
/// Returns `None` for anything the pipeline does not recognise.
pub fn detect_format(file_name: &str, head: &[u8]) -> Option<SourceFormat> {
    let lower = file_name.to_ascii_lowercase();
    let extension = lower
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.contains('/'));

    match extension {
        Some("dcm") | Some("dicom") => Some(SourceFormat::Dicom),
        Some("fda") => Some(SourceFormat::Fda),
        Some("e2e") => Some(SourceFormat::E2e),
        Some("fds") => Some(SourceFormat::Fds),
        _ if is_dicom_preamble(head) => Some(SourceFormat::Dicom),
        _ => None,
    }
}

// =============================================================================
// Laterality
// =============================================================================

/// Which eye an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EyeSide {
    #[serde(rename = "L")]
    Left,

    #[serde(rename = "R")]
    Right,
}

impl EyeSide {
    pub const fn code(&self) -> &'static str {
        match self {
            EyeSide::Left => "L",
            EyeSide::Right => "R",
        }
    }

    /// Parse `L`/`R` (or `left`/`right`), case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "l" | "left" | "os" => Some(EyeSide::Left),
            "r" | "right" | "od" => Some(EyeSide::Right),
            _ => None,
        }
    }
}

/// Guess laterality from a file name.
///
/// Best effort only: a laterality reported by the container itself always
/// takes precedence.
pub fn laterality_from_filename(file_name: &str) -> EyeSide {
    let lower = file_name.to_ascii_lowercase();

    if lower.ends_with("l.e2e") || lower.contains("_l.") {
        EyeSide::Left
    } else if lower.ends_with("r.e2e") || lower.contains("_r.") {
        EyeSide::Right
    } else if lower.contains('l') {
        EyeSide::Left
    } else if lower.contains('r') {
        EyeSide::Right
    } else {
        EyeSide::Left
    }
}

/// Resolve laterality: the container's own value wins over the file name.
pub fn resolve_laterality(reported: Option<EyeSide>, file_name: &str) -> EyeSide {
    reported.unwrap_or_else(|| laterality_from_filename(file_name))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dicom_header() -> Vec<u8> {
        let mut bytes = vec![0u8; 132];
        bytes[128..132].copy_from_slice(b"DICM");
        bytes
    }

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(detect_format("scan.dcm", &[]), Some(SourceFormat::Dicom));
        assert_eq!(detect_format("SCAN.DICOM", &[]), Some(SourceFormat::Dicom));
        assert_eq!(detect_format("volume.fda", &[]), Some(SourceFormat::Fda));
        assert_eq!(detect_format("patient.E2E", &[]), Some(SourceFormat::E2e));
        assert_eq!(detect_format("volume.fds", &[]), Some(SourceFormat::Fds));
        assert_eq!(detect_format("notes.txt", &[]), None);
    }

    #[test]
    fn test_detect_extensionless_dicom() {
        assert_eq!(detect_format("IM000001", &dicom_header()), Some(SourceFormat::Dicom));
        assert_eq!(detect_format("IM000001", &[0u8; 200]), None);
        assert_eq!(detect_format("dir.v2/IM000001", &dicom_header()), Some(SourceFormat::Dicom));
    }

    #[test]
    fn test_families_and_tags() {
        assert_eq!(SourceFormat::Dicom.family(), FormatFamily::SingleVolume);
        assert_eq!(SourceFormat::Fda.family(), FormatFamily::SingleVolume);
        assert_eq!(SourceFormat::E2e.family(), FormatFamily::DualEye);
        assert_eq!(SourceFormat::Fds.family(), FormatFamily::Unsupported);

        for format in SourceFormat::CACHEABLE {
            assert_eq!(SourceFormat::from_tag(format.tag()), Some(format));
        }
    }

    #[test]
    fn test_laterality_suffix_rules() {
        assert_eq!(laterality_from_filename("patient_OL.E2E"), EyeSide::Left);
        assert_eq!(laterality_from_filename("patient_OR.e2e"), EyeSide::Right);
        assert_eq!(laterality_from_filename("scan_r.e2e"), EyeSide::Right);
        assert_eq!(laterality_from_filename("scan_l.dcm"), EyeSide::Left);
    }

    #[test]
    fn test_laterality_letter_fallback() {
        // 'l' anywhere beats 'r'
        assert_eq!(laterality_from_filename("florida.e2e"), EyeSide::Left);
        assert_eq!(laterality_from_filename("report.e2e"), EyeSide::Right);
        assert_eq!(laterality_from_filename("123.e2e"), EyeSide::Left);
    }

    #[test]
    fn test_reported_laterality_wins() {
        assert_eq!(
            resolve_laterality(Some(EyeSide::Right), "scan_l.e2e"),
            EyeSide::Right
        );
        assert_eq!(resolve_laterality(None, "scan_r.e2e"), EyeSide::Right);
    }

    #[test]
    fn test_eye_side_parse() {
        assert_eq!(EyeSide::parse("L"), Some(EyeSide::Left));
        assert_eq!(EyeSide::parse("right"), Some(EyeSide::Right));
        assert_eq!(EyeSide::parse("x"), None);
        assert_eq!(EyeSide::Left.code(), "L");
    }
}
