use crate::assets::{
    ConsistencyError, HandleTable, LoadError, PLACEHOLDER_KEY, Residency, SavedSurface, Surface,
    SurfaceId, apply_texture_hints, canonical_texture_key, loader, parse_texture_hints,
    placeholder_pixels,
};
use crate::core::gfx::{
    Backend, GfxError, GpuTexture, PixelData, PixelFormat, SamplerDesc, SamplerFilter,
    SamplerWrap,
};
use log::{debug, error, info, trace, warn};
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    sync::mpsc,
    time::Instant,
};

const DEFAULT_BATCH_SIZE: usize = 16;

/// Progress of a bulk grab or restore, reported once per batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    pub done: usize,
    pub total: usize,
}

/// Notifications delivered to every [`SurfaceManager::subscribe`] receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Deleted {
        id: SurfaceId,
        key: Option<String>,
    },
    Grabbed {
        count: usize,
    },
    Restored {
        count: usize,
    },
}

#[derive(Clone, Copy, Debug)]
struct GrabState {
    // Snapshots that restore must consume; deletions in the window decrement it.
    expected: usize,
    keys_dropped: bool,
}

#[cold]
#[track_caller]
fn fail_fast(err: ConsistencyError) -> ! {
    error!("Texture cache consistency violation: {err}");
    panic!("texture cache consistency violation: {err}");
}

#[inline(always)]
fn report(progress: &mut Option<&mut dyn FnMut(BatchProgress)>, done: usize, total: usize) {
    if let Some(cb) = progress.as_mut() {
        cb(BatchProgress { done, total });
    }
}

/// Owns every cached surface and its backend texture.
///
/// Collaborators keep [`SurfaceId`]s; all deletion goes through the manager.
/// `grab` and `restore` bracket a graphics context rebuild: ids, dimensions,
/// format and sampler survive unchanged, only the backend texture is replaced.
pub struct SurfaceManager {
    base_dir: PathBuf,
    default_sampler: SamplerDesc,
    batch_size: usize,
    surfaces: HandleTable<SurfaceId, Surface>,
    saved: Vec<SavedSurface>,
    grab: Option<GrabState>,
    subscribers: Vec<mpsc::Sender<SurfaceEvent>>,
}

impl SurfaceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            default_sampler: SamplerDesc::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            surfaces: HandleTable::new(),
            saved: Vec::new(),
            grab: None,
            subscribers: Vec::new(),
        }
    }

    pub fn with_default_sampler(mut self, filter: SamplerFilter, wrap: SamplerWrap) -> Self {
        self.default_sampler = SamplerDesc::uniform(filter, wrap);
        self
    }

    /// Number of surfaces between progress reports during grab and restore.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn canonical_key(&self, key: &str) -> String {
        canonical_texture_key(&self.base_dir, key)
    }

    // --- Subscriptions ---

    pub fn subscribe(&mut self) -> mpsc::Receiver<SurfaceEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: SurfaceEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // --- Lookup ---

    pub fn lookup_by_key(&self, key: &str) -> Option<SurfaceId> {
        self.surfaces.lookup_by_key(&self.canonical_key(key))
    }

    #[inline(always)]
    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(id)
    }

    #[inline(always)]
    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SurfaceId, &Surface)> {
        self.surfaces.iter()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    #[inline(always)]
    pub const fn is_grabbed(&self) -> bool {
        self.grab.is_some()
    }

    pub fn pending_snapshots(&self) -> &[SavedSurface] {
        &self.saved
    }

    // --- Loading ---

    /// Returns the cached surface for `key`, loading it from the asset
    /// directory on first use.
    pub fn get_or_load(
        &mut self,
        backend: &mut Backend,
        key: &str,
    ) -> Result<SurfaceId, LoadError> {
        let key = self.canonical_key(key);
        if let Some(id) = self.surfaces.lookup_by_key(&key) {
            return Ok(id);
        }
        if self.grab.is_some() {
            warn!("Loading '{key}' while textures are grabbed; it is not part of the pending restore.");
        }

        let path = loader::resolve_asset_path(&self.base_dir, &key);
        let hints = parse_texture_hints(&key);
        let pixels = apply_texture_hints(loader::decode_pixels(&key, &path)?, &hints);
        let sampler = hints.sampler_desc(self.default_sampler);
        let texture = backend.create_texture(&pixels, sampler)?;
        let surface = Surface::new(
            texture,
            pixels.width(),
            pixels.height(),
            pixels.format(),
            sampler,
        )
        .with_key(key.clone())
        .with_source(path);
        debug!(
            "Loaded texture '{key}' ({}x{} {:?}) as {}",
            pixels.width(),
            pixels.height(),
            pixels.format(),
            texture.get()
        );
        Ok(self.surfaces.insert(Some(key), surface))
    }

    /// Soft-fail variant of [`Self::get_or_load`]: a missing or broken asset
    /// yields the shared placeholder surface. Only backend failures propagate.
    pub fn get_or_placeholder(
        &mut self,
        backend: &mut Backend,
        key: &str,
    ) -> Result<SurfaceId, GfxError> {
        match self.get_or_load(backend, key) {
            Ok(id) => Ok(id),
            Err(LoadError::Gfx(e)) => Err(e),
            Err(e) => {
                warn!("{e}. Using placeholder.");
                self.placeholder(backend)
            }
        }
    }

    /// The built-in placeholder surface, created on first use.
    pub fn placeholder(&mut self, backend: &mut Backend) -> Result<SurfaceId, GfxError> {
        if let Some(id) = self.surfaces.lookup_by_key(PLACEHOLDER_KEY) {
            return Ok(id);
        }
        let pixels = placeholder_pixels();
        let sampler = SamplerDesc::uniform(SamplerFilter::Nearest, SamplerWrap::Repeat);
        let texture = backend.create_texture(&pixels, sampler)?;
        let surface = Surface::new(
            texture,
            pixels.width(),
            pixels.height(),
            pixels.format(),
            sampler,
        )
        .with_key(PLACEHOLDER_KEY);
        Ok(self
            .surfaces
            .insert(Some(PLACEHOLDER_KEY.to_string()), surface))
    }

    /// Loads `key` if needed and returns a new, unkeyed surface holding an
    /// independent texture with the same pixels and sampler settings.
    pub fn get_copy(&mut self, backend: &mut Backend, key: &str) -> Result<SurfaceId, LoadError> {
        let source = self.get_or_load(backend, key)?;
        self.copy_surface(backend, source)
    }

    pub fn copy_surface(
        &mut self,
        backend: &mut Backend,
        source: SurfaceId,
    ) -> Result<SurfaceId, LoadError> {
        let pixels = self.read_pixels(backend, source)?;
        let sampler = self
            .surfaces
            .get(source)
            .map_or(self.default_sampler, Surface::sampler);
        let texture = backend.create_texture(&pixels, sampler)?;
        let copy = Surface::new(
            texture,
            pixels.width(),
            pixels.height(),
            pixels.format(),
            sampler,
        );
        trace!("Copied surface {source:?} into texture {}", texture.get());
        Ok(self.surfaces.insert(None, copy))
    }

    /// Current pixels of a surface, from the backend, its pending snapshot, or
    /// its source file depending on residency.
    pub fn read_pixels(
        &self,
        backend: &mut Backend,
        id: SurfaceId,
    ) -> Result<PixelData, LoadError> {
        let surface = self
            .surfaces
            .get(id)
            .ok_or_else(|| LoadError::UnknownSurface(format!("{id:?}")))?;
        match (surface.residency(), surface.texture()) {
            (Residency::Resident, Some(texture)) => Ok(backend.read_texture(
                texture,
                surface.width(),
                surface.height(),
                surface.format(),
            )?),
            (Residency::Grabbed, _) => {
                let Some(snap) = self.saved.iter().find(|snap| snap.base() == id) else {
                    fail_fast(ConsistencyError::MissingSnapshot(format!("{id:?}")));
                };
                Ok(snap
                    .load_pixels()
                    .map_or_else(placeholder_pixels, Cow::into_owned))
            }
            (Residency::Evicted, _) => reload_source(surface),
            (Residency::Resident, None) => fail_fast(ConsistencyError::IllegalTransition {
                id: format!("{id:?}"),
                op: "readback",
                state: "resident without a texture",
                required: "resident",
            }),
        }
    }

    /// Replaces the pixels of a resident surface, e.g. to colorize a copy.
    pub fn update_pixels(
        &mut self,
        backend: &mut Backend,
        id: SurfaceId,
        pixels: &PixelData,
    ) -> Result<(), LoadError> {
        let surface = self
            .surfaces
            .get_mut(id)
            .ok_or_else(|| LoadError::UnknownSurface(format!("{id:?}")))?;
        if !surface.is_resident() {
            fail_fast(ConsistencyError::IllegalTransition {
                id: format!("{id:?}"),
                op: "pixel update",
                state: surface.residency().as_str(),
                required: "resident",
            });
        }
        let texture = backend.create_texture(pixels, surface.sampler())?;
        if let Some(old) = surface.texture.replace(texture) {
            backend.delete_texture(old);
        }
        surface.set_dimensions(pixels.width(), pixels.height(), pixels.format());
        Ok(())
    }

    /// Inserts an externally built surface, indexing its key if it has one.
    pub fn add(&mut self, surface: Surface) -> SurfaceId {
        if surface.residency() == Residency::Grabbed {
            fail_fast(ConsistencyError::IllegalTransition {
                id: surface.key().unwrap_or("<unkeyed>").to_string(),
                op: "add",
                state: "grabbed",
                required: "resident or evicted",
            });
        }
        let key = surface.key().map(|k| self.canonical_key(k));
        let surface = match key.as_deref() {
            Some(k) => {
                if let Some(existing) = self.surfaces.lookup_by_key(k) {
                    warn!("Surface key '{k}' re-registered; {existing:?} is no longer reachable by key.");
                }
                surface.with_key(k)
            }
            None => surface,
        };
        self.surfaces.insert(key, surface)
    }

    // --- Deletion ---

    fn remove_entry(&mut self, id: SurfaceId) -> Option<Surface> {
        let mut surface = self.surfaces.remove(id)?;
        if surface.residency() == Residency::Grabbed {
            let Some(pos) = self.saved.iter().position(|snap| snap.base() == id) else {
                fail_fast(ConsistencyError::MissingSnapshot(format!("{id:?}")));
            };
            self.saved.remove(pos);
            if let Some(grab) = self.grab.as_mut() {
                grab.expected -= 1;
            }
            surface.residency = Residency::Evicted;
        }
        self.notify(SurfaceEvent::Deleted {
            id,
            key: surface.key().map(str::to_owned),
        });
        Some(surface)
    }

    /// Removes a surface and destroys its texture. Unknown or stale ids return
    /// `false` without side effects.
    pub fn delete_one(&mut self, backend: &mut Backend, id: SurfaceId) -> bool {
        let Some(surface) = self.remove_entry(id) else {
            return false;
        };
        if let Some(texture) = surface.texture() {
            backend.delete_texture(texture);
        }
        trace!("Deleted surface {id:?} ({:?})", surface.key());
        true
    }

    pub fn delete_by_key(&mut self, backend: &mut Backend, key: &str) -> bool {
        match self.lookup_by_key(key) {
            Some(id) => self.delete_one(backend, id),
            None => false,
        }
    }

    /// Removes a surface from the cache but keeps its texture alive; the
    /// caller owns both afterwards. A grabbed surface has no texture to hand
    /// over, so taking one before its restore is a consistency violation.
    pub fn take(&mut self, id: SurfaceId) -> Option<Surface> {
        if let Some(surface) = self.surfaces.get(id)
            && surface.residency() == Residency::Grabbed
        {
            fail_fast(ConsistencyError::IllegalTransition {
                id: format!("{id:?}"),
                op: "take",
                state: "grabbed",
                required: "resident or evicted",
            });
        }
        self.remove_entry(id)
    }

    /// Tears down every surface. Pending snapshots are discarded.
    pub fn delete_all(&mut self, backend: &mut Backend) -> usize {
        backend.wait_for_idle();
        if self.grab.take().is_some() {
            info!(
                "Discarding {} pending texture snapshots on teardown.",
                self.saved.len()
            );
        }
        self.saved.clear();
        let drained: Vec<(SurfaceId, Surface)> = self.surfaces.drain().collect();
        let count = drained.len();
        for (id, surface) in drained {
            if let Some(texture) = surface.texture() {
                backend.delete_texture(texture);
            }
            self.notify(SurfaceEvent::Deleted {
                id,
                key: surface.key().map(str::to_owned),
            });
        }
        info!("Deleted all {count} surfaces.");
        count
    }

    // --- Context Rebuild ---

    /// Moves every resident texture into software memory and releases it on
    /// the backend. With `keep_keys == false` the key index is dropped and
    /// file-backed surfaces are reloaded from disk on restore instead of being
    /// read back.
    pub fn grab(&mut self, backend: &mut Backend, keep_keys: bool) -> Result<usize, GfxError> {
        self.grab_impl(backend, keep_keys, None)
    }

    pub fn grab_with_progress(
        &mut self,
        backend: &mut Backend,
        keep_keys: bool,
        progress: &mut dyn FnMut(BatchProgress),
    ) -> Result<usize, GfxError> {
        self.grab_impl(backend, keep_keys, Some(progress))
    }

    fn grab_impl(
        &mut self,
        backend: &mut Backend,
        keep_keys: bool,
        mut progress: Option<&mut dyn FnMut(BatchProgress)>,
    ) -> Result<usize, GfxError> {
        if self.grab.is_some() {
            fail_fast(ConsistencyError::DoubleGrab {
                pending: self.saved.len(),
            });
        }
        let started = Instant::now();
        backend.wait_for_idle();

        let resident: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|(_, s)| s.is_resident())
            .map(|(id, _)| id)
            .collect();
        let total = resident.len();

        // Capture everything before releasing anything so a failed readback
        // leaves the cache untouched.
        let mut saved = Vec::with_capacity(total);
        for (n, &id) in resident.iter().enumerate() {
            let Some(surface) = self.surfaces.get(id) else {
                fail_fast(ConsistencyError::MissingSnapshotBase(format!("{id:?}")));
            };
            let Some(texture) = surface.texture() else {
                fail_fast(ConsistencyError::IllegalTransition {
                    id: format!("{id:?}"),
                    op: "grab",
                    state: "resident without a texture",
                    required: "resident",
                });
            };
            saved.push(SavedSurface::capture(
                backend, id, surface, texture, !keep_keys,
            )?);
            if (n + 1) % self.batch_size == 0 || n + 1 == total {
                report(&mut progress, n + 1, total);
            }
        }

        for snap in &saved {
            if let Some(surface) = self.surfaces.get_mut(snap.base()) {
                if let Some(texture) = surface.texture.take() {
                    backend.delete_texture(texture);
                }
                surface.residency = Residency::Grabbed;
            }
        }
        if !keep_keys {
            self.surfaces.clear_keys();
        }

        let bytes: usize = saved.iter().map(SavedSurface::memory_size).sum();
        let from_file = saved.iter().filter(|s| s.memory_size() == 0).count();
        self.saved = saved;
        self.grab = Some(GrabState {
            expected: total,
            keys_dropped: !keep_keys,
        });
        info!(
            "Grabbed {total} textures ({:.1} KiB in memory, {from_file} to reload from file) in {:.2}ms.",
            bytes as f64 / 1024.0,
            started.elapsed().as_secs_f64() * 1000.0
        );
        self.notify(SurfaceEvent::Grabbed { count: total });
        Ok(total)
    }

    /// Re-uploads every pending snapshot into its original surface.
    ///
    /// Uploads happen before any surface is touched; if one fails, the
    /// textures created so far are released and all snapshots stay pending so
    /// the restore can be retried.
    pub fn restore(&mut self, backend: &mut Backend) -> Result<usize, GfxError> {
        self.restore_impl(backend, None)
    }

    pub fn restore_with_progress(
        &mut self,
        backend: &mut Backend,
        progress: &mut dyn FnMut(BatchProgress),
    ) -> Result<usize, GfxError> {
        self.restore_impl(backend, Some(progress))
    }

    fn restore_impl(
        &mut self,
        backend: &mut Backend,
        mut progress: Option<&mut dyn FnMut(BatchProgress)>,
    ) -> Result<usize, GfxError> {
        let Some(grab) = self.grab else {
            fail_fast(ConsistencyError::RestoreWithoutGrab);
        };
        let started = Instant::now();
        let total = self.saved.len();
        if total != grab.expected {
            fail_fast(ConsistencyError::CountMismatch {
                expected: grab.expected,
                restored: total,
            });
        }

        let mut uploaded: Vec<(GpuTexture, u32, u32, PixelFormat)> = Vec::with_capacity(total);
        for (n, snap) in self.saved.iter().enumerate() {
            if !self.surfaces.contains(snap.base()) {
                fail_fast(ConsistencyError::MissingSnapshotBase(format!(
                    "{:?}",
                    snap.base()
                )));
            }
            let pixels = snap
                .load_pixels()
                .unwrap_or_else(|| Cow::Owned(placeholder_pixels()));
            match backend.create_texture(&pixels, snap.sampler()) {
                Ok(texture) => {
                    uploaded.push((texture, pixels.width(), pixels.height(), pixels.format()));
                }
                Err(e) => {
                    for (texture, ..) in uploaded {
                        backend.delete_texture(texture);
                    }
                    warn!(
                        "Texture restore failed at {n} of {total}: {e}. Snapshots kept for retry."
                    );
                    return Err(e);
                }
            }
            if (n + 1) % self.batch_size == 0 || n + 1 == total {
                report(&mut progress, n + 1, total);
            }
        }

        let saved = std::mem::take(&mut self.saved);
        let mut restored = 0usize;
        for (snap, (texture, width, height, format)) in saved.into_iter().zip(uploaded) {
            let id = snap.base();
            let Some(surface) = self.surfaces.get_mut(id) else {
                fail_fast(ConsistencyError::MissingSnapshotBase(format!("{id:?}")));
            };
            if surface.residency() != Residency::Grabbed {
                fail_fast(ConsistencyError::IllegalTransition {
                    id: format!("{id:?}"),
                    op: "restore",
                    state: surface.residency().as_str(),
                    required: "grabbed",
                });
            }
            surface.texture = Some(texture);
            surface.set_dimensions(width, height, format);
            surface.residency = Residency::Resident;
            if grab.keys_dropped
                && self.surfaces.key_of(id).is_some()
                && !self.surfaces.register_key(id)
            {
                warn!(
                    "Key '{}' was reloaded while grabbed; restored surface {id:?} stays unkeyed.",
                    self.surfaces.key_of(id).unwrap_or_default()
                );
            }
            restored += 1;
        }
        self.grab = None;

        if restored != grab.expected {
            fail_fast(ConsistencyError::CountMismatch {
                expected: grab.expected,
                restored,
            });
        }
        info!(
            "Restored {restored} textures in {:.2}ms.",
            started.elapsed().as_secs_f64() * 1000.0
        );
        self.notify(SurfaceEvent::Restored { count: restored });
        Ok(restored)
    }

    /// Releases every resident texture without keeping the pixels. The
    /// surfaces stay cached as evicted until [`Self::reload_evicted`].
    pub fn delete_hardware_only(&mut self, backend: &mut Backend) -> usize {
        if self.grab.is_some() {
            fail_fast(ConsistencyError::EvictDuringGrab);
        }
        backend.wait_for_idle();
        let ids = self.surfaces.ids();
        let mut count = 0usize;
        for id in ids {
            let Some(surface) = self.surfaces.get_mut(id) else {
                continue;
            };
            if !surface.is_resident() {
                continue;
            }
            if let Some(texture) = surface.texture.take() {
                backend.delete_texture(texture);
            }
            surface.residency = Residency::Evicted;
            count += 1;
        }
        info!("Deleted {count} hardware textures without saving them.");
        count
    }

    /// Brings evicted surfaces back from their source files. Surfaces without
    /// a readable source get the placeholder pixels.
    pub fn reload_evicted(&mut self, backend: &mut Backend) -> Result<usize, LoadError> {
        let started = Instant::now();
        let ids = self.surfaces.ids();
        let mut count = 0usize;
        for id in ids {
            let Some(surface) = self.surfaces.get_mut(id) else {
                continue;
            };
            if surface.residency() != Residency::Evicted {
                continue;
            }
            let pixels = match reload_source(surface) {
                Ok(px) => px,
                Err(e) => {
                    warn!("{e}. Reloading {id:?} as placeholder.");
                    placeholder_pixels()
                }
            };
            let texture = backend.create_texture(&pixels, surface.sampler())?;
            surface.texture = Some(texture);
            surface.set_dimensions(pixels.width(), pixels.height(), pixels.format());
            surface.residency = Residency::Resident;
            count += 1;
        }
        info!(
            "Reloaded {count} evicted textures from disk in {:.2}ms.",
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(count)
    }
}

fn reload_source(surface: &Surface) -> Result<PixelData, LoadError> {
    let key = surface.key().unwrap_or("<unkeyed>");
    let Some(path) = surface.source() else {
        return Err(LoadError::NotFound {
            key: key.to_string(),
            path: PathBuf::new(),
        });
    };
    let hints = parse_texture_hints(key);
    Ok(apply_texture_hints(loader::decode_pixels(key, path)?, &hints))
}

impl Drop for SurfaceManager {
    fn drop(&mut self) {
        if !self.saved.is_empty() {
            warn!(
                "Texture cache dropped with {} unrestored snapshots.",
                self.saved.len()
            );
        }
    }
}

impl std::fmt::Debug for SurfaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceManager")
            .field("base_dir", &self.base_dir)
            .field("surfaces", &self.surfaces.len())
            .field("keyed", &self.surfaces.indexed_len())
            .field("pending_snapshots", &self.saved.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn fixture() -> (TempDir, SurfaceManager, Backend) {
        let dir = tempfile::tempdir().unwrap();
        let mut a = RgbaImage::new(2, 2);
        for (i, px) in a.pixels_mut().enumerate() {
            *px = Rgba([i as u8 * 40, 10, 200, 255 - i as u8]);
        }
        a.save(dir.path().join("a.png")).unwrap();
        RgbImage::from_pixel(3, 1, Rgb([7, 8, 9]))
            .save(dir.path().join("b.png"))
            .unwrap();
        std::fs::create_dir_all(dir.path().join("tiles")).unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([1, 1, 1, 255]))
            .save(dir.path().join("tiles/grass (nearest repeat).png"))
            .unwrap();
        let manager = SurfaceManager::new(dir.path());
        (dir, manager, Backend::software())
    }

    #[test]
    fn get_or_load_deduplicates_by_normalized_key() {
        let (_dir, mut mgr, mut backend) = fixture();
        let first = mgr.get_or_load(&mut backend, "a.png").unwrap();
        let again = mgr.get_or_load(&mut backend, "./a.png").unwrap();
        assert_eq!(first, again);
        assert_eq!(mgr.len(), 1);
        assert_eq!(backend.live_texture_count(), 1);
        let surface = mgr.get(first).unwrap();
        assert_eq!(surface.key(), Some("a.png"));
        assert_eq!((surface.width(), surface.height()), (2, 2));
        assert_eq!(surface.format(), PixelFormat::Rgba8);
    }

    #[test]
    fn key_hints_set_sampler() {
        let (_dir, mut mgr, mut backend) = fixture();
        let id = mgr
            .get_or_load(&mut backend, "tiles/grass (nearest repeat).png")
            .unwrap();
        let sampler = mgr.get(id).unwrap().sampler();
        assert_eq!(sampler.min_filter, SamplerFilter::Nearest);
        assert_eq!(sampler.wrap_t, SamplerWrap::Repeat);
        let texture = mgr.get(id).unwrap().texture().unwrap();
        assert_eq!(backend.texture_sampler(texture), Some(sampler));
    }

    #[test]
    fn hint_words_in_directory_or_plain_names_are_not_hints() {
        let (dir, mut mgr, mut backend) = fixture();
        std::fs::create_dir_all(dir.path().join("menu")).unwrap();
        std::fs::create_dir_all(dir.path().join("grayscale_pack")).unwrap();
        RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255]))
            .save(dir.path().join("menu/checkpoint.png"))
            .unwrap();
        RgbaImage::from_pixel(1, 1, Rgba([200, 0, 0, 255]))
            .save(dir.path().join("grayscale_pack/red.png"))
            .unwrap();

        let checkpoint = mgr.get_or_load(&mut backend, "menu/checkpoint.png").unwrap();
        assert_eq!(mgr.get(checkpoint).unwrap().sampler(), SamplerDesc::default());

        let red = mgr.get_or_load(&mut backend, "grayscale_pack/red.png").unwrap();
        let px = mgr.read_pixels(&mut backend, red).unwrap();
        assert_eq!(px.bytes(), &[200, 0, 0, 255]);
    }

    #[test]
    fn parent_segments_resolve_to_the_same_surface() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        assert_eq!(mgr.get_or_load(&mut backend, "menu/../a.png").unwrap(), a);
        assert_eq!(mgr.get_or_load(&mut backend, "tiles/./../a.png").unwrap(), a);
        assert_eq!(mgr.len(), 1);
        assert_eq!(backend.live_texture_count(), 1);
        assert!(mgr.delete_by_key(&mut backend, "tiles/../a.png"));
        assert!(mgr.is_empty());
    }

    #[test]
    fn missing_asset_is_a_load_error_and_placeholder_is_shared() {
        let (_dir, mut mgr, mut backend) = fixture();
        let err = mgr.get_or_load(&mut backend, "nope.png").unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }), "got {err:?}");
        assert!(mgr.is_empty(), "failed load must not insert anything");

        let p1 = mgr.get_or_placeholder(&mut backend, "nope.png").unwrap();
        let p2 = mgr.get_or_placeholder(&mut backend, "other.png").unwrap();
        assert_eq!(p1, p2);
        assert_eq!(mgr.lookup_by_key(PLACEHOLDER_KEY), Some(p1));
        assert!(mgr.lookup_by_key("nope.png").is_none());
    }

    #[test]
    fn grab_and_restore_preserve_identity_and_state() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        let b = mgr.get_or_load(&mut backend, "b.png").unwrap();
        let before: Vec<_> = [a, b]
            .iter()
            .map(|&id| {
                let s = mgr.get(id).unwrap();
                (
                    s.texture().unwrap(),
                    s.width(),
                    s.height(),
                    s.format(),
                    s.sampler(),
                    mgr.read_pixels(&mut backend, id).unwrap(),
                )
            })
            .collect();

        assert_eq!(mgr.grab(&mut backend, true).unwrap(), 2);
        assert!(mgr.is_grabbed());
        assert_eq!(backend.live_texture_count(), 0);
        for id in [a, b] {
            let s = mgr.get(id).unwrap();
            assert_eq!(s.texture(), None);
            assert_eq!(s.residency(), Residency::Grabbed);
        }
        assert_eq!(mgr.lookup_by_key("a.png"), Some(a));

        assert_eq!(mgr.restore(&mut backend).unwrap(), 2);
        assert!(!mgr.is_grabbed());
        assert!(mgr.pending_snapshots().is_empty());
        assert_eq!(mgr.lookup_by_key("a.png"), Some(a));
        for (&id, (old_tex, w, h, fmt, sampler, pixels)) in [a, b].iter().zip(&before) {
            let s = mgr.get(id).unwrap();
            let tex = s.texture().expect("restored surface has a texture");
            assert_ne!(tex, *old_tex, "restore must allocate a fresh texture");
            assert!(backend.is_texture(tex));
            assert!(!backend.is_texture(*old_tex));
            assert_eq!((s.width(), s.height(), s.format()), (*w, *h, *fmt));
            assert_eq!(s.sampler(), *sampler);
            assert_eq!(backend.texture_sampler(tex), Some(*sampler));
            assert_eq!(&mgr.read_pixels(&mut backend, id).unwrap(), pixels);
        }
    }

    #[test]
    fn restore_survives_a_backend_rebuild() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        let pixels = mgr.read_pixels(&mut backend, a).unwrap();
        mgr.grab(&mut backend, true).unwrap();
        backend.cleanup();
        drop(backend);

        let mut rebuilt = Backend::software();
        assert_eq!(mgr.restore(&mut rebuilt).unwrap(), 1);
        assert_eq!(mgr.read_pixels(&mut rebuilt, a).unwrap(), pixels);
        assert_eq!(rebuilt.live_texture_count(), 1);
    }

    #[test]
    fn restore_reports_progress_per_batch() {
        let (_dir, mgr, mut backend) = fixture();
        let mut mgr = mgr.with_batch_size(2);
        for key in ["a.png", "b.png", "tiles/grass (nearest repeat).png"] {
            mgr.get_or_load(&mut backend, key).unwrap();
        }
        mgr.grab(&mut backend, true).unwrap();
        let mut seen = Vec::new();
        let restored = mgr
            .restore_with_progress(&mut backend, &mut |p| seen.push(p))
            .unwrap();
        assert_eq!(restored, 3);
        assert_eq!(
            seen,
            vec![
                BatchProgress { done: 2, total: 3 },
                BatchProgress { done: 3, total: 3 }
            ]
        );
    }

    #[test]
    fn grab_without_keys_reloads_from_disk() {
        let (dir, mut mgr, mut backend) = fixture();
        let b = mgr.get_or_load(&mut backend, "b.png").unwrap();
        assert_eq!(mgr.grab(&mut backend, false).unwrap(), 1);
        assert!(mgr.lookup_by_key("b.png").is_none(), "key index is dropped");
        assert!(matches!(
            mgr.pending_snapshots()[0].pixels(),
            crate::assets::SavedPixels::File(_)
        ));

        RgbImage::from_pixel(3, 1, Rgb([50, 60, 70]))
            .save(dir.path().join("b.png"))
            .unwrap();
        assert_eq!(mgr.restore(&mut backend).unwrap(), 1);
        assert_eq!(mgr.lookup_by_key("b.png"), Some(b), "key re-registered");
        let px = mgr.read_pixels(&mut backend, b).unwrap();
        assert_eq!(&px.bytes()[..3], &[50, 60, 70]);
    }

    #[test]
    fn delete_unknown_or_stale_id_is_a_no_op() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        assert!(mgr.delete_one(&mut backend, a));
        let b = mgr.get_or_load(&mut backend, "b.png").unwrap();
        assert!(!mgr.delete_one(&mut backend, a), "stale id must not hit the reused slot");
        assert!(!mgr.delete_by_key(&mut backend, "a.png"));
        assert_eq!(mgr.len(), 1);
        assert!(mgr.get(b).unwrap().texture().is_some());
        assert_eq!(backend.live_texture_count(), 1);
    }

    #[test]
    fn take_keeps_the_texture_alive() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        let surface = mgr.take(a).unwrap();
        assert!(mgr.lookup_by_key("a.png").is_none());
        assert!(!mgr.contains(a));
        let texture = surface.into_texture().unwrap();
        assert!(backend.is_texture(texture));
        backend.delete_texture(texture);
    }

    #[test]
    fn copies_are_unkeyed_and_independent() {
        let (_dir, mut mgr, mut backend) = fixture();
        let copy = mgr.get_copy(&mut backend, "a.png").unwrap();
        let original = mgr.lookup_by_key("a.png").unwrap();
        assert_ne!(copy, original);
        assert_eq!(mgr.get(copy).unwrap().key(), None);
        assert_eq!(
            mgr.read_pixels(&mut backend, copy).unwrap(),
            mgr.read_pixels(&mut backend, original).unwrap()
        );

        let tinted = PixelData::new(1, 1, PixelFormat::Rgba8, vec![255, 0, 0, 255]).unwrap();
        mgr.update_pixels(&mut backend, copy, &tinted).unwrap();
        assert_eq!(mgr.get(original).unwrap().width(), 2);

        assert!(mgr.delete_one(&mut backend, copy));
        assert_eq!(mgr.lookup_by_key("a.png"), Some(original));
        assert!(mgr.get(original).unwrap().texture().is_some());
        assert_eq!(backend.live_texture_count(), 1);
    }

    #[test]
    fn deleting_while_grabbed_discards_the_snapshot() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        mgr.get_or_load(&mut backend, "b.png").unwrap();
        assert_eq!(mgr.grab(&mut backend, true).unwrap(), 2);
        assert!(mgr.delete_one(&mut backend, a));
        assert_eq!(mgr.pending_snapshots().len(), 1);
        assert_eq!(mgr.restore(&mut backend).unwrap(), 1);
    }

    #[test]
    fn added_surfaces_take_part_in_grab() {
        let (_dir, mut mgr, mut backend) = fixture();
        let px = PixelData::new(1, 1, PixelFormat::Rgb8, vec![1, 2, 3]).unwrap();
        let texture = backend.create_texture(&px, SamplerDesc::default()).unwrap();
        let id = mgr.add(Surface::new(texture, 1, 1, PixelFormat::Rgb8, SamplerDesc::default()).with_key("gen/dot"));
        assert_eq!(mgr.lookup_by_key("gen/dot"), Some(id));
        assert_eq!(mgr.grab(&mut backend, true).unwrap(), 1);
        assert_eq!(mgr.restore(&mut backend).unwrap(), 1);
        assert_eq!(mgr.read_pixels(&mut backend, id).unwrap(), px);
    }

    #[test]
    fn evicted_surfaces_reload_from_source() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        let pixels = mgr.read_pixels(&mut backend, a).unwrap();
        assert_eq!(mgr.delete_hardware_only(&mut backend), 1);
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(mgr.get(a).unwrap().residency(), Residency::Evicted);
        assert_eq!(mgr.grab(&mut backend, true).unwrap(), 0, "evicted surfaces have nothing to grab");
        assert_eq!(mgr.restore(&mut backend).unwrap(), 0);

        assert_eq!(mgr.reload_evicted(&mut backend).unwrap(), 1);
        assert!(mgr.get(a).unwrap().is_resident());
        assert_eq!(mgr.read_pixels(&mut backend, a).unwrap(), pixels);
    }

    #[test]
    fn subscribers_hear_about_deletions() {
        let (_dir, mut mgr, mut backend) = fixture();
        let events = mgr.subscribe();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        mgr.delete_one(&mut backend, a);
        assert_eq!(
            events.try_recv(),
            Ok(SurfaceEvent::Deleted {
                id: a,
                key: Some("a.png".to_string())
            })
        );
        drop(events);
        mgr.get_or_load(&mut backend, "b.png").unwrap();
        assert_eq!(mgr.delete_all(&mut backend), 1);
        assert!(mgr.subscribers.is_empty(), "closed receivers are pruned");
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn failed_restore_keeps_every_snapshot_for_a_retry() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        let b = mgr.get_or_load(&mut backend, "b.png").unwrap();
        let pixels = mgr.read_pixels(&mut backend, a).unwrap();
        assert_eq!(mgr.grab(&mut backend, true).unwrap(), 2);

        backend.set_software_faults(Some(1), false);
        let err = mgr.restore(&mut backend).unwrap_err();
        assert!(matches!(err, GfxError::Backend(_)), "got {err:?}");
        assert!(mgr.is_grabbed());
        assert_eq!(mgr.pending_snapshots().len(), 2);
        assert_eq!(backend.live_texture_count(), 0, "partial uploads are released");
        for id in [a, b] {
            let s = mgr.get(id).unwrap();
            assert_eq!(s.residency(), Residency::Grabbed);
            assert_eq!(s.texture(), None);
        }
        assert_eq!(mgr.read_pixels(&mut backend, a).unwrap(), pixels);

        backend.set_software_faults(None, false);
        assert_eq!(mgr.restore(&mut backend).unwrap(), 2);
        assert!(!mgr.is_grabbed());
        assert_eq!(backend.live_texture_count(), 2);
        assert_eq!(mgr.read_pixels(&mut backend, a).unwrap(), pixels);
    }

    #[test]
    fn failed_readback_leaves_the_cache_untouched() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        let copy = mgr.get_copy(&mut backend, "b.png").unwrap();
        let b = mgr.lookup_by_key("b.png").unwrap();
        let pixels = mgr.read_pixels(&mut backend, a).unwrap();

        backend.set_software_faults(None, true);
        let err = mgr.grab(&mut backend, true).unwrap_err();
        assert!(matches!(err, GfxError::Backend(_)), "got {err:?}");
        assert!(!mgr.is_grabbed());
        assert!(mgr.pending_snapshots().is_empty());
        for id in [a, b, copy] {
            let s = mgr.get(id).unwrap();
            assert!(s.is_resident());
            assert!(backend.is_texture(s.texture().unwrap()));
        }
        assert_eq!(backend.live_texture_count(), 3);

        // Without the unreadable copy, file-backed surfaces fall back to disk.
        assert!(mgr.delete_one(&mut backend, copy));
        assert_eq!(mgr.grab(&mut backend, true).unwrap(), 2);
        assert!(
            mgr.pending_snapshots()
                .iter()
                .all(|snap| matches!(snap.pixels(), crate::assets::SavedPixels::File(_)))
        );
        backend.set_software_faults(None, false);
        assert_eq!(mgr.restore(&mut backend).unwrap(), 2);
        assert_eq!(mgr.lookup_by_key("a.png"), Some(a));
        assert_eq!(mgr.read_pixels(&mut backend, a).unwrap(), pixels);
    }

    #[test]
    fn grabbed_snapshot_with_a_vanished_file_reads_as_placeholder() {
        let (dir, mut mgr, mut backend) = fixture();
        let b = mgr.get_or_load(&mut backend, "b.png").unwrap();
        mgr.grab(&mut backend, false).unwrap();
        std::fs::remove_file(dir.path().join("b.png")).unwrap();
        assert_eq!(mgr.read_pixels(&mut backend, b).unwrap(), placeholder_pixels());
    }

    #[test]
    #[should_panic(expected = "is grabbed but has no pending snapshot")]
    fn grabbed_surface_without_snapshot_is_fatal() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        mgr.surfaces.get_mut(a).unwrap().residency = Residency::Grabbed;
        let _ = mgr.read_pixels(&mut backend, a);
    }

    #[test]
    #[should_panic(expected = "is grabbed but a take requires it to be resident or evicted")]
    fn taking_a_grabbed_surface_is_fatal() {
        let (_dir, mut mgr, mut backend) = fixture();
        let a = mgr.get_or_load(&mut backend, "a.png").unwrap();
        mgr.grab(&mut backend, true).unwrap();
        let _ = mgr.take(a);
    }

    #[test]
    #[should_panic(expected = "grab requested while")]
    fn double_grab_is_fatal() {
        let (_dir, mut mgr, mut backend) = fixture();
        mgr.get_or_load(&mut backend, "a.png").unwrap();
        mgr.grab(&mut backend, true).unwrap();
        let _ = mgr.grab(&mut backend, true);
    }

    #[test]
    #[should_panic(expected = "restore requested without a matching grab")]
    fn restore_without_grab_is_fatal() {
        let (_dir, mut mgr, mut backend) = fixture();
        mgr.get_or_load(&mut backend, "a.png").unwrap();
        let _ = mgr.restore(&mut backend);
    }

    #[test]
    #[should_panic(expected = "hardware eviction requested while a grab is outstanding")]
    fn evicting_during_grab_is_fatal() {
        let (_dir, mut mgr, mut backend) = fixture();
        mgr.get_or_load(&mut backend, "a.png").unwrap();
        mgr.grab(&mut backend, true).unwrap();
        mgr.delete_hardware_only(&mut backend);
    }
}
