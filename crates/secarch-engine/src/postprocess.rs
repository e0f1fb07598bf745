use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use secarch_contracts::AnalysisError;
use tracing::{debug, warn};

/// Composites images that carry transparency onto white and re-encodes them
/// as PNG. Opaque images are returned byte-for-byte.
pub fn flatten(bytes: &[u8]) -> Result<Vec<u8>, AnalysisError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| AnalysisError::InvalidImage(format!("rendered diagram: {err}")))?;
    if !decoded.color().has_alpha() {
        return Ok(bytes.to_vec());
    }

    let rgba = decoded.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(flattened)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|err| AnalysisError::InvalidImage(format!("failed to encode PNG: {err}")))?;
    debug!(
        before = bytes.len(),
        after = out.len(),
        "flattened transparent diagram"
    );
    Ok(out)
}

/// A file that exists only while the guard is alive.
#[derive(Debug)]
pub struct ScopedFile {
    path: PathBuf,
}

impl ScopedFile {
    pub fn create(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self, AnalysisError> {
        let guard = Self { path: path.into() };
        if let Some(parent) = guard.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| guard.io_error(err))?;
            }
        }
        fs::write(&guard.path, bytes).map_err(|err| guard.io_error(err))?;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: std::io::Error) -> AnalysisError {
        AnalysisError::Transport(format!(
            "failed to write diagram file {}: {err}",
            self.path.display()
        ))
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "failed to remove diagram file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{png_indexed, png_rgb, png_rgba_half_transparent};

    #[test]
    fn transparent_pixels_become_white() -> anyhow::Result<()> {
        let flattened = flatten(&png_rgba_half_transparent())?;
        let decoded = image::load_from_memory(&flattened)?;
        assert!(!decoded.color().has_alpha());
        let rgb = decoded.to_rgb8();
        // left column fully transparent, right column opaque red
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 0, 0]));
        Ok(())
    }

    #[test]
    fn half_alpha_blends_toward_white() -> anyhow::Result<()> {
        let mut rgba = image::RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, image::Rgba([0, 0, 0, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(rgba).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        let rgb = image::load_from_memory(&flatten(&bytes)?)?.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([127, 127, 127]));
        Ok(())
    }

    #[test]
    fn opaque_images_pass_through_unchanged() -> anyhow::Result<()> {
        let original = png_rgb(3, 2);
        assert_eq!(flatten(&original)?, original);
        Ok(())
    }

    #[test]
    fn palette_transparency_is_flattened() -> anyhow::Result<()> {
        let flattened = flatten(&png_indexed(Some(&[0, 255])))?;
        let decoded = image::load_from_memory(&flattened)?;
        assert!(!decoded.color().has_alpha());
        let rgb = decoded.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 0, 0]));
        Ok(())
    }

    #[test]
    fn palette_without_transparency_passes_through() -> anyhow::Result<()> {
        let original = png_indexed(None);
        assert_eq!(flatten(&original)?, original);
        Ok(())
    }

    #[test]
    fn garbage_is_an_invalid_image() {
        let err = flatten(b"<html>not found</html>").unwrap_err();
        assert_eq!(err.kind(), "invalid_image");
    }

    #[test]
    fn scoped_file_is_removed_on_drop() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("diagram.png");
        {
            let file = ScopedFile::create(&path, b"png")?;
            assert_eq!(fs::read(file.path())?, b"png");
        }
        assert!(!path.exists());
        Ok(())
    }
}
