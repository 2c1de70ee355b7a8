mod backends;

use crate::core::gfx::backends::{opengl, software};
use image::{RgbImage, RgbaImage};
use std::{fmt, num::NonZeroU32, str::FromStr};
use thiserror::Error;

// --- Public Data Contract ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Rgb8,
}

impl PixelFormat {
    #[inline(always)]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgb8 => 3,
        }
    }
}

/// Tightly packed, row-major pixel storage in CPU memory.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelData {
    width: u32,
    height: u32,
    format: PixelFormat,
    bytes: Vec<u8>,
}

impl PixelData {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        bytes: Vec<u8>,
    ) -> Result<Self, GfxError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if bytes.len() != expected {
            return Err(GfxError::BadPixelBuffer {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            bytes,
        })
    }

    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            bytes: image.into_raw(),
        }
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgb8,
            bytes: image.into_raw(),
        }
    }

    /// Expands to RGBA8 regardless of the stored format.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let rgba = match self.format {
            PixelFormat::Rgba8 => self.bytes.clone(),
            PixelFormat::Rgb8 => self
                .bytes
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect(),
        };
        RgbaImage::from_raw(self.width, self.height, rgba)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
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
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for PixelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerFilter {
    Linear,
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerWrap {
    Clamp,
    Repeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub min_filter: SamplerFilter,
    pub mag_filter: SamplerFilter,
    pub wrap_s: SamplerWrap,
    pub wrap_t: SamplerWrap,
    pub mipmaps: bool,
}

impl SamplerDesc {
    #[inline(always)]
    pub const fn uniform(filter: SamplerFilter, wrap: SamplerWrap) -> Self {
        Self {
            min_filter: filter,
            mag_filter: filter,
            wrap_s: wrap,
            wrap_t: wrap,
            mipmaps: false,
        }
    }
}

impl Default for SamplerDesc {
    #[inline(always)]
    fn default() -> Self {
        Self::uniform(SamplerFilter::Linear, SamplerWrap::Clamp)
    }
}

/// Opaque name of a texture living on the active backend. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuTexture(NonZeroU32);

impl GpuTexture {
    #[inline(always)]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline(always)]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

#[derive(Debug, Error)]
pub enum GfxError {
    #[error("unknown texture handle {0}")]
    UnknownTexture(u32),
    #[error("invalid pixel buffer: expected {expected} bytes, got {actual}")]
    BadPixelBuffer { expected: usize, actual: usize },
    #[error("{0}")]
    Backend(String),
}

// --- Public API Facade ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    OpenGL,
    Software,
}

// An internal enum to hold the state for the active rendering backend.
enum BackendImpl {
    OpenGL(opengl::State),
    Software(software::State),
}

/// A public, opaque wrapper around the active rendering backend.
/// This hides backend-specific texture plumbing from the cache.
pub struct Backend(BackendImpl);

impl Backend {
    /// Headless CPU backend. Texture names are unique for the life of the process.
    pub fn software() -> Self {
        Self(BackendImpl::Software(software::init()))
    }

    /// Wraps a GL context that the host made current on this thread.
    pub fn opengl(gl: glow::Context) -> Self {
        Self(BackendImpl::OpenGL(opengl::init(gl)))
    }

    pub const fn backend_type(&self) -> BackendType {
        match &self.0 {
            BackendImpl::OpenGL(_) => BackendType::OpenGL,
            BackendImpl::Software(_) => BackendType::Software,
        }
    }

    pub fn create_texture(
        &mut self,
        pixels: &PixelData,
        sampler: SamplerDesc,
    ) -> Result<GpuTexture, GfxError> {
        match &mut self.0 {
            BackendImpl::OpenGL(state) => opengl::create_texture(state, pixels, sampler),
            BackendImpl::Software(state) => software::create_texture(state, pixels, sampler),
        }
    }

    /// Reads level 0 of `texture` back into CPU memory.
    pub fn read_texture(
        &mut self,
        texture: GpuTexture,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<PixelData, GfxError> {
        match &mut self.0 {
            BackendImpl::OpenGL(state) => {
                opengl::read_texture(state, texture, width, height, format)
            }
            BackendImpl::Software(state) => {
                software::read_texture(state, texture, width, height, format)
            }
        }
    }

    pub fn delete_texture(&mut self, texture: GpuTexture) {
        match &mut self.0 {
            BackendImpl::OpenGL(state) => opengl::delete_texture(state, texture),
            BackendImpl::Software(state) => software::delete_texture(state, texture),
        }
    }

    /// Sampler settings the backend holds for `texture`, if it is live.
    pub fn texture_sampler(&self, texture: GpuTexture) -> Option<SamplerDesc> {
        match &self.0 {
            BackendImpl::OpenGL(state) => opengl::texture_sampler(state, texture),
            BackendImpl::Software(state) => software::texture_sampler(state, texture),
        }
    }

    /// Makes the software backend fail every upload after the next
    /// `creates_before_failure` ones, and optionally every readback.
    #[cfg(test)]
    pub(crate) fn set_software_faults(
        &mut self,
        creates_before_failure: Option<usize>,
        fail_reads: bool,
    ) {
        if let BackendImpl::Software(state) = &mut self.0 {
            state.faults = software::Faults {
                creates_before_failure,
                fail_reads,
            };
        }
    }

    pub fn is_texture(&self, texture: GpuTexture) -> bool {
        match &self.0 {
            BackendImpl::OpenGL(state) => opengl::is_texture(state, texture),
            BackendImpl::Software(state) => software::is_texture(state, texture),
        }
    }

    pub fn live_texture_count(&self) -> usize {
        match &self.0 {
            BackendImpl::OpenGL(state) => opengl::live_texture_count(state),
            BackendImpl::Software(state) => software::live_texture_count(state),
        }
    }

    pub fn wait_for_idle(&mut self) {
        match &mut self.0 {
            BackendImpl::OpenGL(state) => opengl::finish(state),
            BackendImpl::Software(_) => {
                // CPU backend is synchronous; nothing to wait for.
            }
        }
    }

    pub fn cleanup(&mut self) {
        match &mut self.0 {
            BackendImpl::OpenGL(state) => opengl::cleanup(state),
            BackendImpl::Software(state) => software::cleanup(state),
        }
    }
}

// -- Boilerplate impls --
impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenGL => write!(f, "OpenGL"),
            Self::Software => write!(f, "Software"),
        }
    }
}

impl FromStr for BackendType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "opengl" | "gl" => Ok(Self::OpenGL),
            "software" | "cpu" => Ok(Self::Software),
            _ => Err(format!("'{s}' is not a valid video renderer")),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("type", &self.backend_type())
            .field("live_textures", &self.live_texture_count())
            .finish()
    }
}
