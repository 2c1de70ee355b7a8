use crate::core::gfx::{GfxError, GpuTexture, PixelData, PixelFormat, SamplerDesc};
use log::{info, trace};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};

// Shared by every software backend so a rebuilt backend never hands out a stale name.
static NEXT_TEXTURE_NAME: AtomicU32 = AtomicU32::new(1);

pub struct Texture {
    pub pixels: PixelData,
    pub sampler: SamplerDesc,
}

/// Scripted failures for exercising recovery paths in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct Faults {
    // Uploads that still succeed before every further upload fails.
    pub creates_before_failure: Option<usize>,
    pub fail_reads: bool,
}

pub struct State {
    textures: FxHashMap<u32, Texture>,
    #[cfg(test)]
    pub faults: Faults,
}

pub fn init() -> State {
    info!("Initializing software texture backend...");
    State {
        textures: FxHashMap::default(),
        #[cfg(test)]
        faults: Faults::default(),
    }
}

pub fn create_texture(
    state: &mut State,
    pixels: &PixelData,
    sampler: SamplerDesc,
) -> Result<GpuTexture, GfxError> {
    #[cfg(test)]
    if let Some(left) = state.faults.creates_before_failure.as_mut() {
        if *left == 0 {
            return Err(GfxError::Backend("software: out of texture memory".to_string()));
        }
        *left -= 1;
    }
    let name = NEXT_TEXTURE_NAME.fetch_add(1, Ordering::Relaxed);
    let handle = GpuTexture::from_raw(name)
        .ok_or_else(|| GfxError::Backend("software texture names exhausted".to_string()))?;
    state.textures.insert(
        name,
        Texture {
            pixels: pixels.clone(),
            sampler,
        },
    );
    trace!(
        "software: created texture {name} ({}x{} {:?})",
        pixels.width(),
        pixels.height(),
        pixels.format()
    );
    Ok(handle)
}

pub fn read_texture(
    state: &mut State,
    texture: GpuTexture,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<PixelData, GfxError> {
    #[cfg(test)]
    if state.faults.fail_reads {
        return Err(GfxError::Backend(format!(
            "software: readback of texture {} failed",
            texture.get()
        )));
    }
    let tex = state
        .textures
        .get(&texture.get())
        .ok_or(GfxError::UnknownTexture(texture.get()))?;
    let px = &tex.pixels;
    if px.width() != width || px.height() != height || px.format() != format {
        return Err(GfxError::Backend(format!(
            "readback of texture {} as {width}x{height} {format:?} does not match stored {}x{} {:?}",
            texture.get(),
            px.width(),
            px.height(),
            px.format()
        )));
    }
    Ok(px.clone())
}

pub fn delete_texture(state: &mut State, texture: GpuTexture) {
    if state.textures.remove(&texture.get()).is_some() {
        trace!("software: deleted texture {}", texture.get());
    }
}

pub fn texture_sampler(state: &State, texture: GpuTexture) -> Option<SamplerDesc> {
    state.textures.get(&texture.get()).map(|tex| tex.sampler)
}

pub fn is_texture(state: &State, texture: GpuTexture) -> bool {
    state.textures.contains_key(&texture.get())
}

pub fn live_texture_count(state: &State) -> usize {
    state.textures.len()
}

pub fn cleanup(state: &mut State) {
    info!(
        "Software texture backend cleanup ({} textures released).",
        state.textures.len()
    );
    state.textures.clear();
}
