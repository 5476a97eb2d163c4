#![forbid(unsafe_code)]

//! # Pixel Sentinel
//!
//! Pixel Sentinel watches a shared collaborative pixel canvas for
//! defacement of registered artworks. For every artwork the operator stores
//! a target image (the *template*) at a canvas position; a cooperative scan
//! loop repeatedly samples the live canvas, compares observed pixels
//! against the template (and a *ground* snapshot of the pre-build canvas),
//! and emits alerts when discrepancies cross the configured thresholds.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pixel_sentinel::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Store::open("blue_scan.sqlite")?;
//! let frames: Arc<dyn FrameSource> = Arc::new(BrowserFrameSource::new(DEFAULT_CANVAS_URL));
//! let sentinel = Sentinel::new(store.clone(), frames.clone(), Arc::new(ConsoleSink));
//!
//! sentinel.start(); // idempotent; spawns the scan loop
//!
//! let app = pixel_sentinel::api::router(pixel_sentinel::api::AppState {
//!     store,
//!     sentinel,
//!     frames,
//! });
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! ## Concepts
//! - [`Sentinel`] — the scan-loop controller (start/stop, tick scheduling)
//! - [`Store`] — SQLite-backed artworks, reference rasters and config
//! - [`FrameSource`] — anything that can produce the current canvas frame
//! - [`AlertSink`] — where suspicion/degradation events go
//! - [`MonitorConfig`] — the singleton tunables record
//!
//! ## Modules
//! - [`engine`] — tile planning, pixel comparison, event tracking, the loop
//! - [`storage`] — persistence
//! - [`frame`] — canvas capture (headless browser in production)
//! - [`api`] — the JSON control surface
//! - [`alert`] — alert delivery seam

pub mod alert;
pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod frame;
pub mod raster;
pub mod storage;

pub use alert::{AlertSink, ConsoleSink};
pub use config::{DetourageMode, MonitorConfig};
pub use engine::Sentinel;
pub use errors::SentinelError;
pub use frame::{BrowserFrameSource, FrameSource};
pub use storage::{Artwork, ArtworkMode, Store};

/// The canvas site watched when no override is configured.
pub const DEFAULT_CANVAS_URL: &str = "https://wplace.live/";

pub mod prelude {
    pub use crate::{
        AlertSink, Artwork, ArtworkMode, BrowserFrameSource, ConsoleSink, FrameSource,
        MonitorConfig, Sentinel, SentinelError, Store, DEFAULT_CANVAS_URL,
    };
}
