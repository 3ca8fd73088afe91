//! Writing rendered images to disk.

use crate::frame::RenderedImage;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const JPEG_QUALITY: u8 = 95;

/// Errors raised while exporting an image.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Pixel buffer does not match a {width}x{height} RGBA image")]
    InvalidImageData { width: u32, height: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Output file format, chosen from the path extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    /// Alpha is dropped.
    Jpeg,
    Bmp,
}

impl ImageFormat {
    /// Pick a format by extension, case-insensitively. Unknown or missing
    /// extensions fall back to PNG.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("jpg" | "jpeg") => Self::Jpeg,
            Some("bmp") => Self::Bmp,
            _ => Self::Png,
        }
    }
}

/// Save an 8-bit RGBA image, picking the encoder from the extension.
pub fn save_image(image: &RenderedImage, path: &Path) -> Result<ImageFormat, ExportError> {
    let rgba = RgbaImage::from_raw(image.width, image.height, image.pixels.clone()).ok_or(
        ExportError::InvalidImageData {
            width: image.width,
            height: image.height,
        },
    )?;

    let format = ImageFormat::from_path(path);
    match format {
        ImageFormat::Jpeg => {
            let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();
            let writer = BufWriter::new(File::create(path)?);
            JpegEncoder::new_with_quality(writer, JPEG_QUALITY).encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
        ImageFormat::Png => rgba.save_with_format(path, image::ImageFormat::Png)?,
        ImageFormat::Bmp => rgba.save_with_format(path, image::ImageFormat::Bmp)?,
    }

    info!(path = %path.display(), ?format, width = image.width, height = image.height, "Image exported");
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RenderedImage {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x * 40) as u8, (y * 40) as u8, 200, 128]);
            }
        }
        RenderedImage {
            width,
            height,
            pixels,
        }
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ImageFormat::from_path(Path::new("out.PNG")), ImageFormat::Png);
        assert_eq!(ImageFormat::from_path(Path::new("out.Jpg")), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_path(Path::new("out.jpeg")), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_path(Path::new("out.bmp")), ImageFormat::Bmp);
        assert_eq!(ImageFormat::from_path(Path::new("out.exr")), ImageFormat::Png);
        assert_eq!(ImageFormat::from_path(Path::new("out")), ImageFormat::Png);
    }

    #[test]
    fn png_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.png");
        let image = gradient(4, 3);
        assert_eq!(save_image(&image, &path).unwrap(), ImageFormat::Png);

        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.dimensions(), (4, 3));
        assert_eq!(loaded.as_raw(), &image.pixels);
    }

    #[test]
    fn jpeg_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.jpg");
        save_image(&gradient(8, 8), &path).unwrap();

        let loaded = image::open(&path).unwrap();
        assert_eq!(loaded.color(), image::ColorType::Rgb8);
        assert_eq!((loaded.width(), loaded.height()), (8, 8));
    }

    #[test]
    fn bmp_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.bmp");
        assert_eq!(save_image(&gradient(2, 2), &path).unwrap(), ImageFormat::Bmp);
        assert!(path.exists());
    }

    #[test]
    fn short_buffer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let image = RenderedImage {
            width: 4,
            height: 4,
            pixels: vec![0; 10],
        };
        assert!(matches!(
            save_image(&image, &dir.path().join("bad.png")),
            Err(ExportError::InvalidImageData { .. })
        ));
    }
}
