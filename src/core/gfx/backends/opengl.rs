use crate::core::gfx::{
    GfxError, GpuTexture, PixelData, PixelFormat, SamplerDesc, SamplerFilter, SamplerWrap,
};
use glow::{HasContext, PixelPackData, PixelUnpackData};
use log::{info, warn};

pub struct State {
    pub gl: glow::Context,
    live_textures: usize,
}

pub fn init(gl: glow::Context) -> State {
    info!("Using host-provided OpenGL context for textures.");
    State {
        gl,
        live_textures: 0,
    }
}

#[inline(always)]
const fn native(texture: GpuTexture) -> glow::Texture {
    glow::NativeTexture(texture.0)
}

#[inline(always)]
const fn gl_format(format: PixelFormat) -> (u32, u32) {
    match format {
        PixelFormat::Rgba8 => (glow::RGBA8, glow::RGBA),
        PixelFormat::Rgb8 => (glow::RGB8, glow::RGB),
    }
}

#[inline(always)]
const fn gl_wrap(wrap: SamplerWrap) -> u32 {
    match wrap {
        SamplerWrap::Clamp => glow::CLAMP_TO_EDGE,
        SamplerWrap::Repeat => glow::REPEAT,
    }
}

#[inline(always)]
const fn gl_min_filter(filter: SamplerFilter, mipmaps: bool) -> u32 {
    match (filter, mipmaps) {
        (SamplerFilter::Linear, false) => glow::LINEAR,
        (SamplerFilter::Nearest, false) => glow::NEAREST,
        (SamplerFilter::Linear, true) => glow::LINEAR_MIPMAP_LINEAR,
        (SamplerFilter::Nearest, true) => glow::NEAREST_MIPMAP_NEAREST,
    }
}

#[inline(always)]
const fn gl_mag_filter(filter: SamplerFilter) -> u32 {
    match filter {
        SamplerFilter::Linear => glow::LINEAR,
        SamplerFilter::Nearest => glow::NEAREST,
    }
}

pub fn create_texture(
    state: &mut State,
    pixels: &PixelData,
    sampler: SamplerDesc,
) -> Result<GpuTexture, GfxError> {
    let gl = &state.gl;
    let (internal, format) = gl_format(pixels.format());
    let texture = unsafe {
        let t = gl.create_texture().map_err(GfxError::Backend)?;
        gl.bind_texture(glow::TEXTURE_2D, Some(t));

        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.pixel_store_i32(glow::UNPACK_ROW_LENGTH, 0);
        gl.pixel_store_i32(glow::UNPACK_SKIP_ROWS, 0);
        gl.pixel_store_i32(glow::UNPACK_SKIP_PIXELS, 0);

        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_S,
            gl_wrap(sampler.wrap_s) as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_T,
            gl_wrap(sampler.wrap_t) as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MIN_FILTER,
            gl_min_filter(sampler.min_filter, sampler.mipmaps) as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MAG_FILTER,
            gl_mag_filter(sampler.mag_filter) as i32,
        );
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_BASE_LEVEL, 0);

        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            internal as i32,
            pixels.width() as i32,
            pixels.height() as i32,
            0,
            format,
            glow::UNSIGNED_BYTE,
            PixelUnpackData::Slice(Some(pixels.bytes())),
        );

        if sampler.mipmaps {
            gl.generate_mipmap(glow::TEXTURE_2D);
        } else {
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAX_LEVEL, 0);
        }

        gl.bind_texture(glow::TEXTURE_2D, None);
        t
    };
    state.live_textures += 1;
    Ok(GpuTexture(texture.0))
}

pub fn read_texture(
    state: &mut State,
    texture: GpuTexture,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<PixelData, GfxError> {
    if !is_texture(state, texture) {
        return Err(GfxError::UnknownTexture(texture.get()));
    }
    let gl = &state.gl;
    let (_, gl_fmt) = gl_format(format);
    let mut bytes = vec![0u8; width as usize * height as usize * format.bytes_per_pixel()];
    unsafe {
        gl.bind_texture(glow::TEXTURE_2D, Some(native(texture)));
        gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
        gl.get_tex_image(
            glow::TEXTURE_2D,
            0,
            gl_fmt,
            glow::UNSIGNED_BYTE,
            PixelPackData::Slice(Some(&mut bytes[..])),
        );
        gl.bind_texture(glow::TEXTURE_2D, None);
        let err = gl.get_error();
        if err != glow::NO_ERROR {
            return Err(GfxError::Backend(format!(
                "glGetTexImage failed for texture {} (0x{err:04x})",
                texture.get()
            )));
        }
    }
    PixelData::new(width, height, format, bytes)
}

pub fn delete_texture(state: &mut State, texture: GpuTexture) {
    if !is_texture(state, texture) {
        warn!("OpenGL: delete of unknown texture {}", texture.get());
        return;
    }
    unsafe {
        state.gl.delete_texture(native(texture));
    }
    state.live_textures = state.live_textures.saturating_sub(1);
}

/// Sampler state currently set on `texture`, read back from the driver.
pub fn texture_sampler(state: &State, texture: GpuTexture) -> Option<SamplerDesc> {
    if !is_texture(state, texture) {
        return None;
    }
    let gl = &state.gl;
    let (wrap_s, wrap_t, min, mag) = unsafe {
        gl.bind_texture(glow::TEXTURE_2D, Some(native(texture)));
        let params = (
            gl.get_tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S) as u32,
            gl.get_tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T) as u32,
            gl.get_tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER) as u32,
            gl.get_tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER) as u32,
        );
        gl.bind_texture(glow::TEXTURE_2D, None);
        params
    };
    let wrap = |v| {
        if v == glow::REPEAT {
            SamplerWrap::Repeat
        } else {
            SamplerWrap::Clamp
        }
    };
    let filter = |v| match v {
        glow::NEAREST | glow::NEAREST_MIPMAP_NEAREST | glow::NEAREST_MIPMAP_LINEAR => {
            SamplerFilter::Nearest
        }
        _ => SamplerFilter::Linear,
    };
    Some(SamplerDesc {
        min_filter: filter(min),
        mag_filter: filter(mag),
        wrap_s: wrap(wrap_s),
        wrap_t: wrap(wrap_t),
        mipmaps: !matches!(min, glow::NEAREST | glow::LINEAR),
    })
}

pub fn is_texture(state: &State, texture: GpuTexture) -> bool {
    unsafe { state.gl.is_texture(native(texture)) }
}

pub const fn live_texture_count(state: &State) -> usize {
    state.live_textures
}

pub fn finish(state: &mut State) {
    unsafe {
        state.gl.finish();
    }
}

pub fn cleanup(state: &mut State) {
    info!("Cleaning up OpenGL texture state...");
    finish(state);
    if state.live_textures > 0 {
        warn!(
            "OpenGL: {} textures still alive at cleanup",
            state.live_textures
        );
    }
}
