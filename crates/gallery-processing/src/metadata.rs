//! Header-only image probing

use anyhow::{anyhow, Result};
use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Image metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub size_bytes: u64,
}

impl ImageMetadata {
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Read dimensions and format from the image header without decoding pixels.
pub fn probe(data: &[u8]) -> Result<ImageMetadata> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| anyhow!("unrecognized image format"))?;
    let (width, height) = reader.into_dimensions()?;

    if width == 0 || height == 0 {
        return Err(anyhow!("image has zero size ({}x{})", width, height));
    }

    Ok(ImageMetadata {
        width,
        height,
        format: format_name(format).to_string(),
        size_bytes: data.len() as u64,
    })
}

fn format_name(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_probe_reads_header() {
        let data = png(64, 48);
        let metadata = probe(&data).unwrap();
        assert_eq!((metadata.width, metadata.height), (64, 48));
        assert_eq!(metadata.format, "png");
        assert_eq!(metadata.size_bytes, data.len() as u64);
        assert!((metadata.aspect_ratio() - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_probe_rejects_garbage() {
        assert!(probe(b"definitely not an image").is_err());
        assert!(probe(&[]).is_err());
    }

    #[test]
    fn test_probe_rejects_truncated_header() {
        let data = png(8, 8);
        assert!(probe(&data[..12]).is_err());
    }
}
