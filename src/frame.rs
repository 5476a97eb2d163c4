//! Canvas frame acquisition.
//!
//! The scheduler only ever sees [`FrameSource`]: something that can produce
//! the most recent full RGBA frame of the remote canvas, or a region of it.
//! `None` means "no frame this time": the caller skips the tick (or returns
//! a backend-unavailable error on the snapshot endpoints) and asks again
//! later. Nothing is cached between calls.
//!
//! The production implementation drives a headless browser
//! ([`BrowserFrameSource`]); tests substitute synthetic sources.

mod browser;

pub use browser::BrowserFrameSource;

use async_trait::async_trait;

use crate::raster::Raster;

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// The current full canvas frame, or `None` when no frame could be
    /// obtained.
    async fn fetch_full(&self) -> Option<Raster>;

    /// A region of the current canvas frame in canvas pixel coordinates.
    ///
    /// The default implementation slices the full frame; implementations
    /// with a cheaper targeted read path override it.
    async fn fetch_region(&self, x: u32, y: u32, w: u32, h: u32) -> Option<Raster> {
        self.fetch_full().await?.crop(x, y, w, h)
    }
}
