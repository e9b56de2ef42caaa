//! OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait so the recognition backend can be swapped
//! without touching the scan pipeline.

pub mod tesseract;

use image::ImageFormat;

/// Unified OCR result returned by every provider.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub text: String,
    pub confidence: Option<f64>,
    pub provider_name: String,
}

/// An uploaded image.
pub struct OcrInput {
    pub filename: String,
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl OcrInput {
    /// Sniff the image format from the bytes. Returns `None` for anything
    /// that is not a recognizable image.
    pub fn from_upload(filename: String, data: Vec<u8>) -> Option<Self> {
        let format = image::guess_format(&data).ok()?;
        Some(Self {
            filename,
            data,
            format,
        })
    }

    pub fn mime_type(&self) -> &'static str {
        match self.format {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Tiff => "image/tiff",
            _ => "application/octet-stream",
        }
    }
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, input: &OcrInput) -> anyhow::Result<OcrResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn test_sniff_known_formats() {
        let png = OcrInput::from_upload("a.png".to_string(), PNG_HEADER.to_vec()).unwrap();
        assert_eq!(png.mime_type(), "image/png");

        let jpeg = OcrInput::from_upload("a.jpg".to_string(), JPEG_HEADER.to_vec()).unwrap();
        assert_eq!(jpeg.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_reject_non_images() {
        assert!(OcrInput::from_upload("notes.txt".to_string(), b"9:00-14:00".to_vec()).is_none());
        assert!(OcrInput::from_upload("empty".to_string(), Vec::new()).is_none());
    }
}
