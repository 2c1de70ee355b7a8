use crate::assets::{BatchProgress, LoadError, SurfaceId, SurfaceManager};
use crate::config::Config;
use crate::core::gfx::{Backend, BackendType, GfxError};
use crate::ui::font::{FontManager, FontSize};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tga"];

/// Creates a backend that needs no window. OpenGL contexts come from the host
/// through [`Backend::opengl`].
pub fn create_headless_backend(backend_type: BackendType) -> Result<Backend, GfxError> {
    match backend_type {
        BackendType::Software => Ok(Backend::software()),
        BackendType::OpenGL => Err(GfxError::Backend(
            "OpenGL needs a context provided by the host window".to_string(),
        )),
    }
}

/// Every image file under `dir`, sorted, as paths relative to `dir`.
pub fn scan_images(dir: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read directory '{}': {e}", dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
                continue;
            }
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
            if is_image && let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub failed: usize,
}

/// Owns the graphics backend and everything holding textures on it.
///
/// Teardown order is fonts, then surfaces, then the backend itself.
pub struct App {
    backend: Backend,
    surfaces: SurfaceManager,
    fonts: FontManager,
    shut_down: bool,
}

impl App {
    pub fn new(config: &Config, backend: Backend) -> Self {
        let mut surfaces = SurfaceManager::new(&config.asset_dir)
            .with_default_sampler(config.default_filter, config.default_wrap)
            .with_batch_size(config.restore_batch_size);
        let fonts = FontManager::new(&mut surfaces, config.font_sheet.as_str(), config.font_sizes);
        info!(
            "Texture cache ready on {} backend, assets in '{}'.",
            backend.backend_type(),
            config.asset_dir.display()
        );
        Self {
            backend,
            surfaces,
            fonts,
            shut_down: false,
        }
    }

    #[inline(always)]
    pub const fn backend(&self) -> &Backend {
        &self.backend
    }

    #[inline(always)]
    pub const fn surfaces(&self) -> &SurfaceManager {
        &self.surfaces
    }

    #[inline(always)]
    pub const fn fonts(&self) -> &FontManager {
        &self.fonts
    }

    pub fn load(&mut self, key: &str) -> Result<SurfaceId, LoadError> {
        self.surfaces.get_or_load(&mut self.backend, key)
    }

    /// Loads every image under the asset directory.
    pub fn load_all_assets(&mut self) -> LoadStats {
        let started = Instant::now();
        let mut stats = LoadStats::default();
        for rel in scan_images(self.surfaces.base_dir()) {
            let key = rel.to_string_lossy();
            match self.surfaces.get_or_load(&mut self.backend, &key) {
                Ok(_) => stats.loaded += 1,
                Err(e) => {
                    warn!("{e}");
                    stats.failed += 1;
                }
            }
        }
        info!(
            "Loaded {} textures ({} failed) in {:.2}ms.",
            stats.loaded,
            stats.failed,
            started.elapsed().as_secs_f64() * 1000.0
        );
        stats
    }

    pub fn render_text(
        &mut self,
        size: FontSize,
        text: &str,
        color: [u8; 4],
        persistent: bool,
    ) -> Result<SurfaceId, GfxError> {
        self.fonts.render_text(
            &mut self.backend,
            &mut self.surfaces,
            size,
            text,
            color,
            persistent,
        )
    }

    pub fn delete_text(&mut self, id: SurfaceId) -> bool {
        self.fonts
            .delete_text(&mut self.backend, &mut self.surfaces, id)
    }

    /// Replaces the graphics backend while keeping every surface id valid.
    ///
    /// Transient text is dropped, the rest is grabbed, the old backend cleaned
    /// up and the snapshots restored onto the backend built by `make_backend`.
    /// If that backend cannot be created the snapshots go back onto the old
    /// one. A failed restore leaves them pending for [`Self::retry_restore`].
    pub fn rebuild_context<F>(&mut self, keep_keys: bool, make_backend: F) -> Result<usize, GfxError>
    where
        F: FnOnce() -> Result<Backend, GfxError>,
    {
        let started = Instant::now();
        let evicted = self
            .fonts
            .evict_transient(&mut self.backend, &mut self.surfaces);
        let grabbed = self.surfaces.grab(&mut self.backend, keep_keys)?;
        debug!("Context rebuild: {grabbed} grabbed, {evicted} transient text surfaces dropped.");
        self.backend.cleanup();

        let result = match make_backend() {
            Ok(backend) => {
                self.backend = backend;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to create new backend: {e}. Restoring onto the previous one.");
                Err(e)
            }
        };

        let restored = self.retry_restore()?;
        result?;
        info!(
            "Context rebuilt on {} backend: {restored} textures in {:.2}ms.",
            self.backend.backend_type(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(restored)
    }

    /// Restores snapshots left pending by an earlier failed restore.
    pub fn retry_restore(&mut self) -> Result<usize, GfxError> {
        if !self.surfaces.is_grabbed() {
            return Ok(0);
        }
        self.surfaces
            .restore_with_progress(&mut self.backend, &mut |BatchProgress { done, total }| {
                debug!("Restored {done}/{total} textures.");
            })
    }

    /// Tears down fonts, surfaces and the backend. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.fonts.clear(&mut self.backend, &mut self.surfaces);
        self.surfaces.delete_all(&mut self.backend);
        self.backend.cleanup();
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
