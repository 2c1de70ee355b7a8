use crate::assets::LoadError;
use crate::core::gfx::PixelData;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use log::warn;
use std::path::{Path, PathBuf};

/// Decodes `path`, trusting the extension first and sniffing the content when
/// the extension lies.
pub fn open_image_fallback(path: &Path) -> image::ImageResult<DynamicImage> {
    let hint = ImageFormat::from_path(path).ok();
    if let Some(fmt) = hint {
        let mut reader = ImageReader::open(path).map_err(ImageError::IoError)?;
        reader.set_format(fmt);
        if let Ok(img) = reader.decode() {
            return Ok(img);
        }
    }

    let guessed = ImageReader::open(path)
        .map_err(ImageError::IoError)?
        .with_guessed_format()?;
    if let (Some(hint_fmt), Some(real_fmt)) = (hint, guessed.format())
        && hint_fmt != real_fmt
    {
        warn!(
            "Graphic file '{}' is really {:?}",
            path.to_string_lossy(),
            real_fmt
        );
    }
    guessed.decode()
}

#[inline(always)]
pub fn resolve_asset_path(base_dir: &Path, key: &str) -> PathBuf {
    base_dir.join(key)
}

/// Loads `path` into CPU pixels. Images with an alpha channel stay RGBA,
/// everything else is stored as RGB.
pub fn decode_pixels(key: &str, path: &Path) -> Result<PixelData, LoadError> {
    if !path.is_file() {
        return Err(LoadError::NotFound {
            key: key.to_string(),
            path: path.to_path_buf(),
        });
    }
    let img = open_image_fallback(path).map_err(|err| match err {
        ImageError::IoError(source) => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
        source => LoadError::Decode {
            path: path.to_path_buf(),
            source,
        },
    })?;
    Ok(if img.color().has_alpha() {
        PixelData::from_rgba(img.to_rgba8())
    } else {
        PixelData::from_rgb(img.to_rgb8())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gfx::PixelFormat;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn decodes_rgba_and_rgb_sources() {
        let dir = tempfile::tempdir().unwrap();
        let rgba_path = dir.path().join("a.png");
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]))
            .save(&rgba_path)
            .unwrap();
        let rgb_path = dir.path().join("b.png");
        RgbImage::from_pixel(2, 2, Rgb([9, 8, 7])).save(&rgb_path).unwrap();

        let rgba = decode_pixels("a.png", &rgba_path).unwrap();
        assert_eq!((rgba.width(), rgba.height()), (3, 2));
        assert_eq!(rgba.format(), PixelFormat::Rgba8);
        assert_eq!(&rgba.bytes()[..4], &[1, 2, 3, 4]);

        let rgb = decode_pixels("b.png", &rgb_path).unwrap();
        assert_eq!(rgb.format(), PixelFormat::Rgb8);
        assert_eq!(rgb.bytes().len(), 12);
    }

    #[test]
    fn mislabelled_extension_is_sniffed() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("real.png");
        RgbaImage::from_pixel(1, 1, Rgba([5, 5, 5, 255]))
            .save(&png)
            .unwrap();
        let liar = dir.path().join("liar.jpg");
        std::fs::rename(&png, &liar).unwrap();
        let px = decode_pixels("liar.jpg", &liar).unwrap();
        assert_eq!((px.width(), px.height()), (1, 1));
    }

    #[test]
    fn missing_and_corrupt_files_are_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(
            decode_pixels("missing.png", &missing),
            Err(LoadError::NotFound { .. })
        ));

        let corrupt = dir.path().join("corrupt.png");
        std::fs::write(&corrupt, b"definitely not a png").unwrap();
        let err = decode_pixels("corrupt.png", &corrupt).unwrap_err();
        assert!(
            matches!(err, LoadError::Decode { .. }),
            "expected decode error, got {err:?}"
        );
    }
}
