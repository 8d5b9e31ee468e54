//! Heuristic text decoding and image detection for workspace reads.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const IMAGE_TYPES: [(&str, &str); 9] = [
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("svg", "image/svg+xml"),
    ("avif", "image/avif"),
];

/// MIME type for a recognized image extension, case-insensitive.
pub fn image_mime(extension: &str) -> Option<&'static str> {
    let extension = extension.to_ascii_lowercase();
    IMAGE_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Decode bytes to text, returning the detected encoding label.
///
/// Order: BOM (UTF-8, UTF-16LE, UTF-16BE), then strict UTF-8, then Latin-1,
/// which maps every byte and so never fails.
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return (String::from_utf8_lossy(rest).into_owned(), "utf-8");
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return (decode_utf16(rest, u16::from_le_bytes), "utf-16le");
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return (decode_utf16(rest, u16::from_be_bytes), "utf-16be");
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_owned(), "utf-8"),
        Err(_) => (bytes.iter().map(|&b| char::from(b)).collect(), "iso-8859-1"),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_utf8_round_trips() {
        let (text, encoding) = decode_text("héllo".as_bytes());
        assert_eq!(text, "héllo");
        assert_eq!(encoding, "utf-8");
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let (text, encoding) = decode_text(&[0xEF, 0xBB, 0xBF, b'h', b'i']);
        assert_eq!(text, "hi");
        assert_eq!(encoding, "utf-8");
    }

    #[test]
    fn utf16_boms_are_honored() {
        let (text, encoding) = decode_text(&[0xFF, 0xFE, b'o', 0, b'k', 0]);
        assert_eq!((text.as_str(), encoding), ("ok", "utf-16le"));

        let (text, encoding) = decode_text(&[0xFE, 0xFF, 0, b'o', 0, b'k']);
        assert_eq!((text.as_str(), encoding), ("ok", "utf-16be"));
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        let (text, encoding) = decode_text(&[b'c', b'a', b'f', 0xE9]);
        assert_eq!(text, "café");
        assert_eq!(encoding, "iso-8859-1");
    }

    #[test]
    fn image_extensions_are_case_insensitive() {
        assert_eq!(image_mime("PNG"), Some("image/png"));
        assert_eq!(image_mime("jpeg"), Some("image/jpeg"));
        assert_eq!(image_mime("ts"), None);
    }

    #[test]
    fn data_uri_prefixes_mime() {
        assert_eq!(data_uri("image/png", b"abc"), "data:image/png;base64,YWJj");
    }
}
