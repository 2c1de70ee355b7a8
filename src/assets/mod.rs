//! Texture cache: surfaces keyed by asset path, owned by [`SurfaceManager`],
//! and able to survive a graphics context rebuild through grab/restore.

pub mod error;
pub mod handle_table;
pub mod loader;
pub mod manager;
pub mod snapshot;
pub mod surface;

pub use error::{ConsistencyError, LoadError};
pub use handle_table::HandleTable;
pub use manager::{BatchProgress, SurfaceEvent, SurfaceManager};
pub use snapshot::{SavedPixels, SavedSurface};
pub use surface::{Residency, Surface, SurfaceId};

use crate::core::gfx::{PixelData, PixelFormat, SamplerDesc, SamplerFilter, SamplerWrap};
use image::RgbaImage;
use std::path::Path;

/// Key of the built-in substitute returned by soft-failing loads.
pub const PLACEHOLDER_KEY: &str = "__placeholder";

// --- Keys ---

/// Normalizes a path into a cache key: relative to `base_dir`, forward
/// slashes, `.` and empty components dropped, `..` folded into its parent.
/// Keys never start with `/` and never climb above the base directory.
pub fn canonical_texture_key<P: AsRef<Path>>(base_dir: &Path, p: P) -> String {
    let p = p.as_ref();
    let rel = p.strip_prefix(base_dir).unwrap_or(p);
    let raw = rel.to_string_lossy().replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

// --- Texture Hints ---

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextureHints {
    pub mipmaps: Option<bool>,
    pub grayscale: bool,
    pub alphamap: bool,
    pub sampler_filter: Option<SamplerFilter>,
    pub sampler_wrap: Option<SamplerWrap>,
}

/// Reads loader hints from the parenthesized groups of an asset's file name,
/// e.g. `"tiles/grass (nearest repeat).png"`. Directory names and bare words
/// elsewhere in the name are never hints.
pub fn parse_texture_hints(key: &str) -> TextureHints {
    let mut hints = TextureHints::default();
    let name = key.rsplit('/').next().unwrap_or(key);
    let stem = name.rfind('.').map_or(name, |dot| &name[..dot]);

    let mut rest = stem;
    while let Some(open) = rest.find('(') {
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        for token in rest[open + 1..open + close].split_whitespace() {
            match token.to_ascii_lowercase().as_str() {
                "mipmaps" => hints.mipmaps = Some(true),
                "nomipmaps" => hints.mipmaps = Some(false),
                "grayscale" => hints.grayscale = true,
                "alphamap" => hints.alphamap = true,
                "nearest" | "point" => hints.sampler_filter = Some(SamplerFilter::Nearest),
                "linear" => hints.sampler_filter = Some(SamplerFilter::Linear),
                "wrap" | "repeat" => hints.sampler_wrap = Some(SamplerWrap::Repeat),
                "clamp" => hints.sampler_wrap = Some(SamplerWrap::Clamp),
                _ => {}
            }
        }
        rest = &rest[open + close + 1..];
    }
    hints
}

impl TextureHints {
    #[inline(always)]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Sampler for a load, with unhinted fields taken from `base`.
    pub fn sampler_desc(&self, base: SamplerDesc) -> SamplerDesc {
        let mut desc = base;
        if let Some(filter) = self.sampler_filter {
            desc.min_filter = filter;
            desc.mag_filter = filter;
        }
        if let Some(wrap) = self.sampler_wrap {
            desc.wrap_s = wrap;
            desc.wrap_t = wrap;
        }
        if let Some(mipmaps) = self.mipmaps {
            desc.mipmaps = mipmaps;
        }
        desc
    }
}

/// Applies the pixel-altering hints. Alpha maps always come out as RGBA.
pub fn apply_texture_hints(pixels: PixelData, hints: &TextureHints) -> PixelData {
    if !(hints.grayscale || hints.alphamap) {
        return pixels;
    }
    #[inline(always)]
    fn luma(r: u8, g: u8, b: u8) -> u8 {
        ((u16::from(r) * 30 + u16::from(g) * 59 + u16::from(b) * 11) / 100) as u8
    }

    if pixels.format() == PixelFormat::Rgb8 && !hints.alphamap {
        let (w, h) = (pixels.width(), pixels.height());
        let mut bytes = pixels.into_bytes();
        for px in bytes.chunks_exact_mut(3) {
            let l = luma(px[0], px[1], px[2]);
            px.copy_from_slice(&[l, l, l]);
        }
        return PixelData::from_rgb(
            image::RgbImage::from_raw(w, h, bytes).unwrap_or_else(|| image::RgbImage::new(w, h)),
        );
    }

    let mut image = pixels.to_rgba_image();
    for pixel in image.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let l = luma(r, g, b);
        pixel.0 = if hints.alphamap {
            [255, 255, 255, l]
        } else {
            [l, l, l, a]
        };
    }
    PixelData::from_rgba(image)
}

// --- Sprite Sheets ---

#[inline(always)]
fn parse_ascii_digits(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() {
        return None;
    }
    bytes.iter().try_fold(0u32, |acc, &b| {
        b.is_ascii_digit()
            .then(|| acc.checked_mul(10)?.checked_add(u32::from(b - b'0')))
            .flatten()
    })
}

/// Grid size of a sheet from its name (`"font 16x6.png"` gives `(16, 6)`);
/// the last `NxM` token wins, `(1, 1)` when there is none.
pub fn parse_sprite_sheet_dims(name: &str) -> (u32, u32) {
    let bytes = name.as_bytes();
    let mut dims = None;
    let mut i = 1usize;
    while i < bytes.len() {
        if !(bytes[i] == b'x' || bytes[i] == b'X') || !bytes[i - 1].is_ascii_digit() {
            i += 1;
            continue;
        }
        let left = bytes[..i]
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map_or(0, |p| p + 1);
        let right = bytes[i + 1..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |p| i + 1 + p);
        if let (Some(w), Some(h)) = (
            parse_ascii_digits(&bytes[left..i]),
            parse_ascii_digits(&bytes[i + 1..right]),
        ) && w > 0
            && h > 0
        {
            dims = Some((w, h));
        }
        i = right.max(i + 1);
    }
    dims.unwrap_or((1, 1))
}

// --- Placeholder ---

/// Magenta/grey checker used wherever a missing asset is tolerated.
pub fn placeholder_pixels() -> PixelData {
    let data = vec![
        255, 0, 255, 255, 128, 128, 128, 255, 128, 128, 128, 255, 255, 0, 255, 255,
    ];
    RgbaImage::from_raw(2, 2, data)
        .map(PixelData::from_rgba)
        .unwrap_or_else(|| PixelData::from_rgba(RgbaImage::new(2, 2)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn keys_are_relative_with_forward_slashes() {
        let base = PathBuf::from("data/pixmaps");
        assert_eq!(
            canonical_texture_key(&base, base.join("menu").join("start.png")),
            "menu/start.png"
        );
        assert_eq!(
            canonical_texture_key(&base, "menu\\items\\.\\start.png"),
            "menu/items/start.png"
        );
        assert_eq!(canonical_texture_key(&base, "./a//b.png"), "a/b.png");
    }

    #[test]
    fn keys_fold_parent_segments_and_stay_under_base() {
        let base = PathBuf::from("data/pixmaps");
        assert_eq!(canonical_texture_key(&base, "menu/../a.png"), "a.png");
        assert_eq!(canonical_texture_key(&base, "menu/./x/../b.png"), "menu/b.png");
        assert_eq!(canonical_texture_key(&base, "../../etc/a.png"), "etc/a.png");
        assert_eq!(canonical_texture_key(&base, "/abs/x.png"), "abs/x.png");
        assert!(!canonical_texture_key(&base, "/../x.png").starts_with('/'));
    }

    #[test]
    fn hints_drive_sampler_state() {
        let hints = parse_texture_hints("tiles/grass (Nearest Repeat).png");
        let desc = hints.sampler_desc(SamplerDesc::default());
        assert_eq!(desc.min_filter, SamplerFilter::Nearest);
        assert_eq!(desc.mag_filter, SamplerFilter::Nearest);
        assert_eq!(desc.wrap_s, SamplerWrap::Repeat);
        assert_eq!(desc.wrap_t, SamplerWrap::Repeat);
        assert!(!desc.mipmaps);

        let plain = parse_texture_hints("menu/start.png");
        assert!(plain.is_default(), "no hints expected, got {plain:?}");
        assert_eq!(
            plain.sampler_desc(SamplerDesc::default()),
            SamplerDesc::default()
        );
        assert_eq!(
            parse_texture_hints("bg (nomipmaps).png").mipmaps,
            Some(false)
        );
    }

    #[test]
    fn hint_words_outside_parentheses_are_ignored() {
        for key in [
            "menu/checkpoint.png",
            "grayscale_pack/red.png",
            "linear (v2)/clamp.png",
            "wrapper (nearest/x.png",
            "overlay (pointy).png",
        ] {
            let hints = parse_texture_hints(key);
            assert!(hints.is_default(), "'{key}' should carry no hints, got {hints:?}");
        }
        let two_groups = parse_texture_hints("ui/frame (grayscale) (clamp Point).png");
        assert!(two_groups.grayscale);
        assert_eq!(two_groups.sampler_wrap, Some(SamplerWrap::Clamp));
        assert_eq!(two_groups.sampler_filter, Some(SamplerFilter::Nearest));
    }

    #[test]
    fn alphamap_turns_luma_into_alpha() {
        let px = PixelData::new(1, 1, PixelFormat::Rgb8, vec![100, 100, 100]).unwrap();
        let hints = TextureHints {
            alphamap: true,
            ..TextureHints::default()
        };
        let out = apply_texture_hints(px, &hints);
        assert_eq!(out.format(), PixelFormat::Rgba8);
        assert_eq!(out.bytes(), &[255, 255, 255, 100]);
    }

    #[test]
    fn sheet_dims_come_from_name() {
        assert_eq!(parse_sprite_sheet_dims("fonts/default_bold 16x6.png"), (16, 6));
        assert_eq!(parse_sprite_sheet_dims("a 2x2 then 8x4.png"), (8, 4));
        assert_eq!(parse_sprite_sheet_dims("box.png"), (1, 1));
        assert_eq!(parse_sprite_sheet_dims("0x4.png"), (1, 1));
    }

    #[test]
    fn placeholder_is_a_two_by_two_checker() {
        let px = placeholder_pixels();
        assert_eq!((px.width(), px.height()), (2, 2));
        assert_eq!(&px.bytes()[..4], &[255, 0, 255, 255]);
    }
}
