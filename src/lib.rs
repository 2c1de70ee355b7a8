//! Texture cache for 2D game engines that survives graphics context loss.
//!
//! Surfaces are loaded once per asset key and addressed by stable
//! [`assets::SurfaceId`]s. Before a context is torn down the cache grabs every
//! texture into CPU memory (or remembers where to reload it from) and after the
//! new context exists it restores them into the same ids.

pub mod app;
pub mod assets;
pub mod config;
pub mod core;
pub mod ui;
