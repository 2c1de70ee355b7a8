use crate::assets::{
    Surface, SurfaceId, TextureHints, apply_texture_hints, loader, parse_texture_hints,
};
use crate::core::gfx::{Backend, GfxError, GpuTexture, PixelData, PixelFormat, SamplerDesc};
use log::warn;
use std::{borrow::Cow, path::PathBuf};

/// Where a snapshot gets its pixels back from.
#[derive(Debug)]
pub enum SavedPixels {
    /// Read back from the backend before the texture was released.
    Memory(PixelData),
    /// Decoded again from the surface's source file at restore time.
    File(PathBuf),
}

/// Software copy of one surface, alive only between a grab and its restore.
#[derive(Debug)]
pub struct SavedSurface {
    base: SurfaceId,
    pixels: SavedPixels,
    width: u32,
    height: u32,
    format: PixelFormat,
    sampler: SamplerDesc,
    hints: TextureHints,
}

impl SavedSurface {
    /// Captures `surface` without touching it. `from_file` selects the reload
    /// path for surfaces that have a source file; the rest are read back.
    pub(crate) fn capture(
        backend: &mut Backend,
        base: SurfaceId,
        surface: &Surface,
        texture: GpuTexture,
        from_file: bool,
    ) -> Result<Self, GfxError> {
        let pixels = match surface.source() {
            Some(path) if from_file => SavedPixels::File(path.to_path_buf()),
            source => match backend.read_texture(
                texture,
                surface.width(),
                surface.height(),
                surface.format(),
            ) {
                Ok(pixels) => SavedPixels::Memory(pixels),
                Err(e) => match source {
                    Some(path) => {
                        warn!(
                            "Readback of texture {} failed ({e}); will reload '{}' from disk.",
                            texture.get(),
                            path.display()
                        );
                        SavedPixels::File(path.to_path_buf())
                    }
                    None => return Err(e),
                },
            },
        };
        Ok(Self {
            base,
            pixels,
            width: surface.width(),
            height: surface.height(),
            format: surface.format(),
            sampler: surface.sampler(),
            hints: surface.key().map(parse_texture_hints).unwrap_or_default(),
        })
    }

    #[inline(always)]
    pub const fn base(&self) -> SurfaceId {
        self.base
    }

    #[inline(always)]
    pub const fn pixels(&self) -> &SavedPixels {
        &self.pixels
    }

    #[inline(always)]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[inline(always)]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[inline(always)]
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline(always)]
    pub const fn sampler(&self) -> SamplerDesc {
        self.sampler
    }

    /// Bytes held in memory by this snapshot.
    pub fn memory_size(&self) -> usize {
        match &self.pixels {
            SavedPixels::Memory(px) => px.bytes().len(),
            SavedPixels::File(_) => 0,
        }
    }

    /// Pixels to upload on restore. A file that no longer decodes yields `None`
    /// after logging; the caller substitutes the placeholder.
    pub(crate) fn load_pixels(&self) -> Option<Cow<'_, PixelData>> {
        match &self.pixels {
            SavedPixels::Memory(px) => Some(Cow::Borrowed(px)),
            SavedPixels::File(path) => {
                let key = path.to_string_lossy();
                match loader::decode_pixels(&key, path) {
                    Ok(px) => {
                        let px = apply_texture_hints(px, &self.hints);
                        if (px.width(), px.height(), px.format())
                            != (self.width, self.height, self.format)
                        {
                            warn!(
                                "'{}' changed on disk since grab ({}x{} {:?} -> {}x{} {:?}).",
                                path.display(),
                                self.width,
                                self.height,
                                self.format,
                                px.width(),
                                px.height(),
                                px.format()
                            );
                        }
                        Some(Cow::Owned(px))
                    }
                    Err(e) => {
                        warn!("Failed to reload '{}' on restore: {e}", path.display());
                        None
                    }
                }
            }
        }
    }
}
