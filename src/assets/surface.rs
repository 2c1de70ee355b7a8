use crate::core::gfx::{GpuTexture, PixelFormat, SamplerDesc};
use slotmap::new_key_type;
use std::path::{Path, PathBuf};

new_key_type! {
    /// Generation-tagged id of a cached surface. An id that outlives its
    /// surface never resolves, even after the slot is reused.
    pub struct SurfaceId;
}

/// Where a surface's pixels currently live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Backed by a live texture on the backend.
    Resident,
    /// Texture released; pixels held by a pending snapshot.
    Grabbed,
    /// Texture released without a snapshot; must be reloaded from its source.
    Evicted,
}

impl Residency {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resident => "resident",
            Self::Grabbed => "grabbed",
            Self::Evicted => "evicted",
        }
    }
}

/// One decoded image backed by a backend texture.
#[derive(Debug)]
pub struct Surface {
    key: Option<String>,
    source: Option<PathBuf>,
    pub(crate) texture: Option<GpuTexture>,
    width: u32,
    height: u32,
    format: PixelFormat,
    sampler: SamplerDesc,
    pub(crate) residency: Residency,
}

impl Surface {
    pub const fn new(
        texture: GpuTexture,
        width: u32,
        height: u32,
        format: PixelFormat,
        sampler: SamplerDesc,
    ) -> Self {
        Self {
            key: None,
            source: None,
            texture: Some(texture),
            width,
            height,
            format,
            sampler,
            residency: Residency::Resident,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    #[inline(always)]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    #[inline(always)]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Current backend texture; `None` while grabbed or evicted.
    #[inline(always)]
    pub const fn texture(&self) -> Option<GpuTexture> {
        self.texture
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

    #[inline(always)]
    pub const fn residency(&self) -> Residency {
        self.residency
    }

    #[inline(always)]
    pub fn is_resident(&self) -> bool {
        self.residency == Residency::Resident
    }

    /// Surrenders the backend texture. The caller becomes responsible for deleting it.
    pub fn into_texture(self) -> Option<GpuTexture> {
        self.texture
    }

    pub(crate) fn set_dimensions(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.width = width;
        self.height = height;
        self.format = format;
    }
}
