//! Image transcoder collaborator
//!
//! Turns stored raw bytes into something a renderer can display. The engine
//! treats it as opaque: `decode` once, then `convert` to the requested
//! specification.

use crate::storage::error::StorageResult;
use crate::storage::types::ImageSpecification;
use base64::prelude::{Engine as _, BASE64_STANDARD};

/// Decodes stored payloads and renders them to a specification
pub trait ImageTranscoder: Send + Sync + 'static {
    /// Native decoded image
    type Image;

    /// Decode raw stored bytes
    fn decode(&self, raw: &[u8]) -> StorageResult<Self::Image>;

    /// Render a decoded image to the target specification
    fn convert(&self, image: &Self::Image, spec: &ImageSpecification) -> StorageResult<String>;
}

/// Raw payload tagged with its sniffed MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Guess the MIME type of an encoded image from its magic bytes
pub fn sniff_mime(raw: &[u8]) -> &'static str {
    match raw {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Wraps payloads in `data:` URLs without re-encoding
///
/// Every specification renders the original bytes; resizing belongs to a
/// real image backend plugged in through [`ImageTranscoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DataUrlTranscoder;

impl ImageTranscoder for DataUrlTranscoder {
    type Image = RawImage;

    fn decode(&self, raw: &[u8]) -> StorageResult<RawImage> {
        Ok(RawImage {
            mime: sniff_mime(raw),
            bytes: raw.to_vec(),
        })
    }

    fn convert(&self, image: &RawImage, _spec: &ImageSpecification) -> StorageResult<String> {
        Ok(format!(
            "data:{};base64,{}",
            image.mime,
            BASE64_STANDARD.encode(&image.bytes)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]), "image/png");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"GIF89a"), "image/gif");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_mime(b"BM...."), "image/bmp");
        assert_eq!(sniff_mime(b"hello"), "application/octet-stream");
        assert_eq!(sniff_mime(&[]), "application/octet-stream");
    }

    #[test]
    fn test_data_url() {
        let transcoder = DataUrlTranscoder;
        let image = transcoder.decode(b"GIF89a").unwrap();
        let url = transcoder
            .convert(&image, &ImageSpecification::Thumbnail)
            .unwrap();
        assert_eq!(url, "data:image/gif;base64,R0lGODlh");
    }

    #[test]
    fn test_empty_payload_renders() {
        let transcoder = DataUrlTranscoder;
        let image = transcoder.decode(&[]).unwrap();
        let url = transcoder.convert(&image, &ImageSpecification::Origin).unwrap();
        assert_eq!(url, "data:application/octet-stream;base64,");
    }
}
