use log::{error, info, warn};
use std::path::PathBuf;
use texcache::app::{self, App};
use texcache::config;
use texcache::core::gfx::BackendType;
use texcache::ui::font::FontSize;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    config::load();
    let mut cfg = config::get();
    log::set_max_level(cfg.log_level.as_level_filter());

    let mut args = std::env::args().skip(1);
    if let Some(dir) = args.next() {
        cfg.asset_dir = PathBuf::from(dir);
    }
    let cycles = match args.next() {
        Some(n) => n.parse::<u32>()?,
        None => 1,
    };

    let backend = match app::create_headless_backend(cfg.video_renderer) {
        Ok(backend) => backend,
        Err(e) => {
            warn!("{e}; falling back to the software renderer.");
            app::create_headless_backend(BackendType::Software)?
        }
    };
    let mut app = App::new(&cfg, backend);
    let stats = app.load_all_assets();
    if let Err(e) = app.render_text(FontSize::Normal, "texcache", [255, 255, 255, 255], true) {
        error!("Failed to render title text: {e}");
    }

    for cycle in 1..=cycles {
        let restored = app.rebuild_context(true, || {
            app::create_headless_backend(BackendType::Software)
        })?;
        info!("Rebuild cycle {cycle}/{cycles}: {restored} textures restored.");
    }

    println!(
        "{} textures loaded, {} failed, {} surfaces live after {cycles} rebuilds.",
        stats.loaded,
        stats.failed,
        app.surfaces().len()
    );
    app.shutdown();
    Ok(())
}
