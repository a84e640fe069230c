//! Transfer syntax UIDs and their compression labels.

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
pub const JPEG_EXTENDED: &str = "1.2.840.10008.1.2.4.51";
pub const JPEG_LOSSLESS: &str = "1.2.840.10008.1.2.4.57";
pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";
pub const JPEG_LS_LOSSLESS: &str = "1.2.840.10008.1.2.4.80";
pub const JPEG_LS_NEAR_LOSSLESS: &str = "1.2.840.10008.1.2.4.81";
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
pub const JPEG_2000: &str = "1.2.840.10008.1.2.4.91";
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";

/// Broad codec family of a transfer syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFamily {
    Native,
    Jpeg,
    JpegLossless,
    JpegLs,
    Jpeg2000,
    Rle,
    Unknown,
}

const COMPRESSED: [(&str, &str, CompressionFamily); 9] = [
    (JPEG_BASELINE, "JPEG Baseline", CompressionFamily::Jpeg),
    (JPEG_EXTENDED, "JPEG Extended", CompressionFamily::Jpeg),
    (JPEG_LOSSLESS, "JPEG Lossless", CompressionFamily::JpegLossless),
    (JPEG_LOSSLESS_SV1, "JPEG Lossless SV1", CompressionFamily::JpegLossless),
    (JPEG_LS_LOSSLESS, "JPEG-LS Lossless", CompressionFamily::JpegLs),
    (JPEG_LS_NEAR_LOSSLESS, "JPEG-LS Near Lossless", CompressionFamily::JpegLs),
    (JPEG_2000_LOSSLESS, "JPEG 2000 Lossless", CompressionFamily::Jpeg2000),
    (JPEG_2000, "JPEG 2000", CompressionFamily::Jpeg2000),
    (RLE_LOSSLESS, "RLE Lossless", CompressionFamily::Rle),
];

const NATIVE: [&str; 4] = [
    IMPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_LITTLE_ENDIAN,
    DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_BIG_ENDIAN,
];

fn normalize_uid(uid: &str) -> &str {
    // UIDs are NUL-padded to even length on the wire
    uid.trim().trim_end_matches('\0')
}

/// Human-readable label: the compression name, `Uncompressed`, or `Unknown`.
pub fn compression_label(uid: &str) -> &'static str {
    let uid = normalize_uid(uid);
    if let Some((_, label, _)) = COMPRESSED.iter().find(|(known, _, _)| *known == uid) {
        return label;
    }
    if uid.is_empty() || NATIVE.contains(&uid) {
        "Uncompressed"
    } else {
        "Unknown"
    }
}

pub fn compression_family(uid: &str) -> CompressionFamily {
    let uid = normalize_uid(uid);
    if let Some((_, _, family)) = COMPRESSED.iter().find(|(known, _, _)| *known == uid) {
        return *family;
    }
    if uid.is_empty() || NATIVE.contains(&uid) {
        CompressionFamily::Native
    } else {
        CompressionFamily::Unknown
    }
}

/// Whether the UID is one of the known compressed syntaxes.
pub fn is_compressed(uid: &str) -> bool {
    let uid = normalize_uid(uid);
    COMPRESSED.iter().any(|(known, _, _)| *known == uid)
}

pub fn is_big_endian(uid: &str) -> bool {
    normalize_uid(uid) == EXPLICIT_VR_BIG_ENDIAN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(compression_label(JPEG_BASELINE), "JPEG Baseline");
        assert_eq!(compression_label(JPEG_LS_NEAR_LOSSLESS), "JPEG-LS Near Lossless");
        assert_eq!(compression_label(JPEG_2000), "JPEG 2000");
        assert_eq!(compression_label(RLE_LOSSLESS), "RLE Lossless");
        assert_eq!(compression_label(EXPLICIT_VR_LITTLE_ENDIAN), "Uncompressed");
        assert_eq!(compression_label("1.2.3.4"), "Unknown");
    }

    #[test]
    fn test_padded_uid() {
        assert_eq!(compression_label("1.2.840.10008.1.2.4.50\0"), "JPEG Baseline");
        assert!(is_compressed("1.2.840.10008.1.2.5\0"));
    }

    #[test]
    fn test_compressed_and_endianness() {
        assert!(is_compressed(JPEG_2000_LOSSLESS));
        assert!(!is_compressed(IMPLICIT_VR_LITTLE_ENDIAN));
        assert!(!is_compressed("1.2.3.4"));
        assert!(is_big_endian(EXPLICIT_VR_BIG_ENDIAN));
        assert!(!is_big_endian(EXPLICIT_VR_LITTLE_ENDIAN));
    }

    #[test]
    fn test_families() {
        assert_eq!(compression_family(JPEG_EXTENDED), CompressionFamily::Jpeg);
        assert_eq!(compression_family(JPEG_LOSSLESS_SV1), CompressionFamily::JpegLossless);
        assert_eq!(compression_family(""), CompressionFamily::Native);
        assert_eq!(compression_family("9.9"), CompressionFamily::Unknown);
    }
}
