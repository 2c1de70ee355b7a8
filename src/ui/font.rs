//! Bitmap text rendered into cache-owned surfaces.
//!
//! A font is a single glyph sheet: ASCII starting at space, laid out on a
//! grid whose size comes from the file name (`"fonts/default 16x6.png"`).
//! Every `render_text` result is an unkeyed surface in the [`SurfaceManager`],
//! so it is grabbed and restored with everything else. The font manager only
//! remembers which ids it produced; deletions made anywhere in the cache reach
//! it through a subscription and are applied on the next [`FontManager::sync`].

use crate::assets::{Surface, SurfaceEvent, SurfaceId, SurfaceManager, parse_sprite_sheet_dims};
use crate::core::gfx::{Backend, GfxError, PixelData, SamplerDesc, SamplerFilter, SamplerWrap};
use image::{RgbaImage, imageops};
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use std::sync::mpsc::{self, TryRecvError};

const FIRST_GLYPH: u32 = b' ' as u32;
const FALLBACK_GLYPH: char = '?';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FontSize {
    Normal,
    Small,
    VerySmall,
}

/// Pixel height of one text line for each [`FontSize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FontSizes {
    pub normal: u32,
    pub small: u32,
    pub very_small: u32,
}

impl Default for FontSizes {
    fn default() -> Self {
        Self {
            normal: 18,
            small: 11,
            very_small: 9,
        }
    }
}

impl FontSizes {
    #[inline(always)]
    pub const fn pixels(&self, size: FontSize) -> u32 {
        match size {
            FontSize::Normal => self.normal,
            FontSize::Small => self.small,
            FontSize::VerySmall => self.very_small,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TextRequest {
    size: FontSize,
    text: String,
    color: [u8; 4],
}

#[derive(Debug)]
struct Rendered {
    request: TextRequest,
    persistent: bool,
}

struct GlyphSheet {
    image: RgbaImage,
    cols: u32,
    rows: u32,
    cell_w: u32,
    cell_h: u32,
}

impl GlyphSheet {
    fn new(image: RgbaImage, cols: u32, rows: u32) -> Option<Self> {
        let cell_w = image.width() / cols;
        let cell_h = image.height() / rows;
        (cell_w > 0 && cell_h > 0).then_some(Self {
            image,
            cols,
            rows,
            cell_w,
            cell_h,
        })
    }

    fn cell_of(&self, ch: char) -> Option<(u32, u32)> {
        let idx = u32::from(ch).checked_sub(FIRST_GLYPH)?;
        (idx < self.cols * self.rows).then(|| {
            (
                (idx % self.cols) * self.cell_w,
                (idx / self.cols) * self.cell_h,
            )
        })
    }

    /// Lays out `text` at the sheet's native cell size, one row per line.
    fn compose(&self, text: &str) -> RgbaImage {
        let lines: Vec<&str> = text.split('\n').collect();
        let columns = lines
            .iter()
            .map(|line| line.chars().count() as u32)
            .max()
            .unwrap_or(0)
            .max(1);
        let mut out = RgbaImage::new(columns * self.cell_w, lines.len() as u32 * self.cell_h);
        let fallback = self.cell_of(FALLBACK_GLYPH);
        for (row, line) in lines.iter().enumerate() {
            for (col, ch) in line.chars().enumerate() {
                let Some((sx, sy)) = self.cell_of(ch).or(fallback) else {
                    continue;
                };
                let cell =
                    imageops::crop_imm(&self.image, sx, sy, self.cell_w, self.cell_h).to_image();
                imageops::replace(
                    &mut out,
                    &cell,
                    i64::from(col as u32 * self.cell_w),
                    i64::from(row as u32 * self.cell_h),
                );
            }
        }
        out
    }
}

fn tint(image: &mut RgbaImage, color: [u8; 4]) {
    #[inline(always)]
    fn mul(a: u8, b: u8) -> u8 {
        ((u16::from(a) * u16::from(b) + 127) / 255) as u8
    }
    for px in image.pixels_mut() {
        for (c, t) in px.0.iter_mut().zip(color) {
            *c = mul(*c, t);
        }
    }
}

enum SheetState {
    Unloaded,
    Ready(GlyphSheet),
    Missing,
}

/// Renders and tracks text surfaces.
pub struct FontManager {
    sheet_key: String,
    sizes: FontSizes,
    sheet: SheetState,
    by_request: FxHashMap<TextRequest, SurfaceId>,
    live: FxHashMap<SurfaceId, Rendered>,
    events: mpsc::Receiver<SurfaceEvent>,
}

impl FontManager {
    /// Subscribes to `surfaces`; the glyph sheet is loaded on the first render.
    pub fn new(surfaces: &mut SurfaceManager, sheet_key: impl Into<String>, sizes: FontSizes) -> Self {
        Self {
            sheet_key: sheet_key.into(),
            sizes,
            sheet: SheetState::Unloaded,
            by_request: FxHashMap::default(),
            live: FxHashMap::default(),
            events: surfaces.subscribe(),
        }
    }

    #[inline(always)]
    pub const fn sizes(&self) -> FontSizes {
        self.sizes
    }

    /// Number of tracked text surfaces as of the last [`Self::sync`].
    #[inline(always)]
    pub fn active_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_tracked(&self, id: SurfaceId) -> bool {
        self.live.contains_key(&id)
    }

    /// Applies deletions reported by the surface manager.
    pub fn sync(&mut self) -> usize {
        let mut dropped = 0usize;
        loop {
            match self.events.try_recv() {
                Ok(SurfaceEvent::Deleted { id, .. }) => {
                    if let Some(rendered) = self.live.remove(&id) {
                        self.by_request.remove(&rendered.request);
                        dropped += 1;
                    }
                }
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if dropped > 0 {
            trace!("Font tracker dropped {dropped} deleted text surfaces.");
        }
        dropped
    }

    fn ensure_sheet(&mut self, backend: &mut Backend, surfaces: &mut SurfaceManager) -> Option<&GlyphSheet> {
        if matches!(self.sheet, SheetState::Unloaded) {
            self.sheet = match load_sheet(backend, surfaces, &self.sheet_key) {
                Some(sheet) => SheetState::Ready(sheet),
                None => SheetState::Missing,
            };
        }
        match &self.sheet {
            SheetState::Ready(sheet) => Some(sheet),
            _ => None,
        }
    }

    /// Renders `text` and returns the surface holding it. Identical requests
    /// share one surface; a missing glyph sheet yields the placeholder.
    pub fn render_text(
        &mut self,
        backend: &mut Backend,
        surfaces: &mut SurfaceManager,
        size: FontSize,
        text: &str,
        color: [u8; 4],
        persistent: bool,
    ) -> Result<SurfaceId, GfxError> {
        self.sync();
        let request = TextRequest {
            size,
            text: text.to_string(),
            color,
        };
        if let Some(&id) = self.by_request.get(&request)
            && surfaces.contains(id)
        {
            if persistent && let Some(rendered) = self.live.get_mut(&id) {
                rendered.persistent = true;
            }
            return Ok(id);
        }

        let target_h = self.sizes.pixels(size).max(1);
        let Some(sheet) = self.ensure_sheet(backend, surfaces) else {
            return surfaces.placeholder(backend);
        };
        let composed = sheet.compose(text);
        let lines = composed.height() / sheet.cell_h;
        let height = target_h * lines.max(1);
        let width = ((u64::from(composed.width()) * u64::from(height))
            / u64::from(composed.height().max(1)))
        .max(1) as u32;
        let mut image = imageops::resize(&composed, width, height, imageops::FilterType::Nearest);
        tint(&mut image, color);

        let pixels = PixelData::from_rgba(image);
        let sampler = SamplerDesc::uniform(SamplerFilter::Linear, SamplerWrap::Clamp);
        let texture = backend.create_texture(&pixels, sampler)?;
        let id = surfaces.add(Surface::new(
            texture,
            pixels.width(),
            pixels.height(),
            pixels.format(),
            sampler,
        ));
        debug!("Rendered text {text:?} at {size:?} into {width}x{height} surface {id:?}");
        self.by_request.insert(request.clone(), id);
        self.live.insert(id, Rendered { request, persistent });
        Ok(id)
    }

    /// Deletes a text surface produced by this manager. Other ids are ignored.
    pub fn delete_text(
        &mut self,
        backend: &mut Backend,
        surfaces: &mut SurfaceManager,
        id: SurfaceId,
    ) -> bool {
        self.sync();
        if !self.live.contains_key(&id) {
            return false;
        }
        let deleted = surfaces.delete_one(backend, id);
        self.sync();
        deleted
    }

    /// Drops every non-persistent render; they are rendered again on request.
    pub fn evict_transient(&mut self, backend: &mut Backend, surfaces: &mut SurfaceManager) -> usize {
        self.sync();
        let transient: Vec<SurfaceId> = self
            .live
            .iter()
            .filter(|(_, r)| !r.persistent)
            .map(|(&id, _)| id)
            .collect();
        let count = transient
            .into_iter()
            .filter(|&id| surfaces.delete_one(backend, id))
            .count();
        self.sync();
        if count > 0 {
            debug!("Evicted {count} transient text surfaces.");
        }
        count
    }

    /// Deletes every tracked text surface, persistent ones included.
    pub fn clear(&mut self, backend: &mut Backend, surfaces: &mut SurfaceManager) -> usize {
        self.sync();
        let ids: Vec<SurfaceId> = self.live.keys().copied().collect();
        let count = ids
            .into_iter()
            .filter(|&id| surfaces.delete_one(backend, id))
            .count();
        self.sync();
        count
    }
}

fn load_sheet(backend: &mut Backend, surfaces: &mut SurfaceManager, key: &str) -> Option<GlyphSheet> {
    let id = match surfaces.get_or_load(backend, key) {
        Ok(id) => id,
        Err(e) => {
            warn!("Font sheet unavailable ({e}); text renders as placeholder.");
            return None;
        }
    };
    let pixels = match surfaces.read_pixels(backend, id) {
        Ok(px) => px,
        Err(e) => {
            warn!("Failed to read font sheet '{key}': {e}");
            return None;
        }
    };
    let (cols, rows) = parse_sprite_sheet_dims(key);
    let sheet = GlyphSheet::new(pixels.to_rgba_image(), cols, rows);
    match &sheet {
        Some(s) => debug!(
            "Font sheet '{key}' loaded: {cols}x{rows} cells of {}x{}",
            s.cell_w, s.cell_h
        ),
        None => warn!("Font sheet '{key}' is smaller than its {cols}x{rows} grid."),
    }
    sheet
}

impl std::fmt::Debug for FontManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontManager")
            .field("sheet_key", &self.sheet_key)
            .field("sizes", &self.sizes)
            .field("active", &self.live.len())
            .finish()
    }
}
