use crate::core::gfx::{BackendType, SamplerFilter, SamplerWrap};
use crate::ui::font::FontSizes;
use ini::Ini;
use log::{LevelFilter, info, warn};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{LazyLock, Mutex, PoisonError};

pub const CONFIG_PATH: &str = "texcache.ini";
const SECTION: &str = "Options";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(&self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

fn parse_filter(s: &str) -> Option<SamplerFilter> {
    match s.trim().to_ascii_lowercase().as_str() {
        "linear" => Some(SamplerFilter::Linear),
        "nearest" | "point" => Some(SamplerFilter::Nearest),
        _ => None,
    }
}

const fn filter_str(filter: SamplerFilter) -> &'static str {
    match filter {
        SamplerFilter::Linear => "Linear",
        SamplerFilter::Nearest => "Nearest",
    }
}

fn parse_wrap(s: &str) -> Option<SamplerWrap> {
    match s.trim().to_ascii_lowercase().as_str() {
        "clamp" => Some(SamplerWrap::Clamp),
        "repeat" | "wrap" => Some(SamplerWrap::Repeat),
        _ => None,
    }
}

const fn wrap_str(wrap: SamplerWrap) -> &'static str {
    match wrap {
        SamplerWrap::Clamp => "Clamp",
        SamplerWrap::Repeat => "Repeat",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub asset_dir: PathBuf,
    pub log_level: LogLevel,
    pub video_renderer: BackendType,
    // Surfaces uploaded between progress reports during restore.
    pub restore_batch_size: usize,
    pub default_filter: SamplerFilter,
    pub default_wrap: SamplerWrap,
    // Glyph sheet key, relative to `asset_dir`.
    pub font_sheet: String,
    pub font_sizes: FontSizes,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("assets"),
            log_level: LogLevel::Warn,
            video_renderer: BackendType::Software,
            restore_batch_size: 16,
            default_filter: SamplerFilter::Linear,
            default_wrap: SamplerWrap::Clamp,
            font_sheet: "fonts/default 16x6.png".to_string(),
            font_sizes: FontSizes::default(),
        }
    }
}

static CONFIG: LazyLock<Mutex<Config>> = LazyLock::new(|| Mutex::new(Config::default()));

// --- File I/O ---

fn to_ini(cfg: &Config) -> Ini {
    let mut conf = Ini::new();
    conf.with_section(Some(SECTION))
        .set("AssetDir", cfg.asset_dir.to_string_lossy())
        .set("DefaultFilter", filter_str(cfg.default_filter))
        .set("DefaultWrap", wrap_str(cfg.default_wrap))
        .set("FontSheet", cfg.font_sheet.as_str())
        .set("FontSizeNormal", cfg.font_sizes.normal.to_string())
        .set("FontSizeSmall", cfg.font_sizes.small.to_string())
        .set("FontSizeVerySmall", cfg.font_sizes.very_small.to_string())
        .set("LogLevel", cfg.log_level.as_str())
        .set("RestoreBatchSize", cfg.restore_batch_size.to_string())
        .set("VideoRenderer", cfg.video_renderer.to_string());
    conf
}

/// Reads `[Options]`; absent or malformed values keep their defaults.
pub fn from_ini(conf: &Ini) -> Config {
    let default = Config::default();
    let get = |key: &str| conf.get_from(Some(SECTION), key).map(str::trim);
    let size = |key: &str, fallback: u32| {
        get(key)
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(fallback)
    };

    Config {
        asset_dir: get("AssetDir")
            .filter(|v| !v.is_empty())
            .map_or(default.asset_dir, PathBuf::from),
        log_level: get("LogLevel")
            .and_then(|v| LogLevel::from_str(v).ok())
            .unwrap_or(default.log_level),
        video_renderer: get("VideoRenderer")
            .and_then(|v| BackendType::from_str(v).ok())
            .unwrap_or(default.video_renderer),
        restore_batch_size: get("RestoreBatchSize")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(default.restore_batch_size),
        default_filter: get("DefaultFilter")
            .and_then(parse_filter)
            .unwrap_or(default.default_filter),
        default_wrap: get("DefaultWrap")
            .and_then(parse_wrap)
            .unwrap_or(default.default_wrap),
        font_sheet: get("FontSheet")
            .filter(|v| !v.is_empty())
            .map_or(default.font_sheet, str::to_string),
        font_sizes: FontSizes {
            normal: size("FontSizeNormal", default.font_sizes.normal),
            small: size("FontSizeSmall", default.font_sizes.small),
            very_small: size("FontSizeVerySmall", default.font_sizes.very_small),
        },
    }
}

/// Loads `path`, creating it with default values when it does not exist.
pub fn load_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("'{}' not found, creating with default values.", path.display());
        if let Err(e) = to_ini(&Config::default()).write_to_file(path) {
            warn!("Failed to create default config file: {e}");
        }
    }
    match Ini::load_from_file(path) {
        Ok(conf) => from_ini(&conf),
        Err(e) => {
            warn!("Failed to load '{}': {e}. Using defaults.", path.display());
            Config::default()
        }
    }
}

pub fn save_to_path(cfg: &Config, path: &Path) {
    if let Err(e) = to_ini(cfg).write_to_file(path) {
        warn!("Failed to save config file: {e}");
    }
}

pub fn load() {
    let cfg = load_from_path(Path::new(CONFIG_PATH));
    *CONFIG.lock().unwrap_or_else(PoisonError::into_inner) = cfg;
}

pub fn get() -> Config {
    CONFIG.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

pub fn update_video_renderer(renderer: BackendType) {
    let cfg = {
        let mut cfg = CONFIG.lock().unwrap_or_else(PoisonError::into_inner);
        if cfg.video_renderer == renderer {
            return;
        }
        cfg.video_renderer = renderer;
        cfg.clone()
    };
    save_to_path(&cfg, Path::new(CONFIG_PATH));
}
