//! Headless-browser frame source.
//!
//! Drives a Chromium instance over the DevTools protocol and reads pixels
//! off the largest `<canvas>` element on the page. Two capture strategies,
//! invisible to callers:
//!
//! A. `getImageData` on the canvas 2D context, shipped out base64-encoded.
//!    Exact bytes, preferred.
//! B. A screenshot of the canvas bounding rect, nearest-resized to the
//!    canvas backing-store size. Used when the context refuses image-data
//!    reads (tainted canvas, WebGL-backed surfaces).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::frame::FrameSource;
use crate::raster::{decode_image_bytes, Raster};

/// Navigation deadline for the one-time bootstrap; per-fetch calls rely on
/// whatever the protocol itself enforces.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(60);

const VIEWPORT: (u32, u32) = (1600, 900);

/// Picks the largest canvas on the page and reports its backing size and
/// bounding rect.
const CANVAS_INFO_JS: &str = r#"
(() => {
  const cs = Array.from(document.querySelectorAll('canvas'));
  if (!cs.length) return { ok: false };
  let best = cs[0], area = best.width * best.height;
  for (const c of cs) { const a = c.width * c.height; if (a > area) { best = c; area = a; } }
  const r = best.getBoundingClientRect();
  return { ok: true, cw: best.width, ch: best.height,
           bx: r.x, by: r.y, bw: r.width, bh: r.height };
})()
"#;

#[derive(Debug, Default, Deserialize)]
struct CanvasInfo {
    ok: bool,
    #[serde(default)]
    cw: u32,
    #[serde(default)]
    ch: u32,
    #[serde(default)]
    bx: f64,
    #[serde(default)]
    by: f64,
    #[serde(default)]
    bw: f64,
    #[serde(default)]
    bh: f64,
}

struct Session {
    browser: Browser,
    page: Page,
    // Drains protocol events; the session is dead once this stops.
    event_task: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

/// Frame source backed by a single lazily-started headless browser session.
pub struct BrowserFrameSource {
    canvas_url: String,
    session: Mutex<Option<Session>>,
}

impl BrowserFrameSource {
    pub fn new(canvas_url: impl Into<String>) -> Self {
        Self {
            canvas_url: canvas_url.into(),
            session: Mutex::new(None),
        }
    }

    /// Launches the browser and navigates to the canvas page. Runs at most
    /// once per lifetime of the session; a failed bootstrap is retried on
    /// the next fetch.
    async fn ensure_session(&self, slot: &mut Option<Session>) -> Result<()> {
        if slot.is_some() {
            return Ok(());
        }

        info!("starting headless browser for {}", self.canvas_url);
        let config = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .window_size(VIEWPORT.0, VIEWPORT.1)
            .build()
            .map_err(|e| anyhow!("browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launching headless browser")?;
        let event_task = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        let page = tokio::time::timeout(BOOTSTRAP_TIMEOUT, browser.new_page(self.canvas_url.as_str()))
            .await
            .context("navigation timed out")?
            .context("opening canvas page")?;

        *slot = Some(Session {
            browser,
            page,
            event_task,
        });
        Ok(())
    }

    async fn canvas_info(page: &Page) -> Result<CanvasInfo> {
        let info: CanvasInfo = page
            .evaluate(CANVAS_INFO_JS)
            .await
            .context("querying canvas info")?
            .into_value()
            .context("decoding canvas info")?;
        if !info.ok || info.cw == 0 || info.ch == 0 {
            return Err(anyhow!("no canvas on page"));
        }
        Ok(info)
    }

    /// Strategy A: read raw RGBA straight off the 2D context.
    async fn image_data_region(page: &Page, x: u32, y: u32, w: u32, h: u32) -> Result<Raster> {
        let script = format!(
            r#"
(() => {{
  const cs = Array.from(document.querySelectorAll('canvas'));
  let best = cs[0], area = best.width * best.height;
  for (const c of cs) {{ const a = c.width * c.height; if (a > area) {{ best = c; area = a; }} }}
  const ctx = best.getContext('2d', {{ willReadFrequently: true }});
  const bytes = ctx.getImageData({x}, {y}, {w}, {h}).data;
  let s = '';
  const chunk = 0x8000;
  for (let i = 0; i < bytes.length; i += chunk) {{
    s += String.fromCharCode.apply(null, bytes.subarray(i, i + chunk));
  }}
  return btoa(s);
}})()
"#
        );
        let b64: String = page
            .evaluate(script)
            .await
            .context("reading image data")?
            .into_value()
            .context("decoding image data result")?;
        let raw = general_purpose::STANDARD
            .decode(b64)
            .context("image data payload is not base64")?;
        Raster::from_rgba(w, h, raw)
    }

    /// Strategy B: screenshot the canvas bounding rect and resample it onto
    /// the backing-store grid.
    async fn screenshot_canvas(page: &Page, info: &CanvasInfo) -> Result<Raster> {
        let shot = page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .context("taking screenshot")?;
        let full = decode_image_bytes(&shot)?;

        let bx = info.bx.max(0.0) as u32;
        let by = info.by.max(0.0) as u32;
        let bw = (info.bw.round() as u32).max(1).min(full.width().saturating_sub(bx));
        let bh = (info.bh.round() as u32).max(1).min(full.height().saturating_sub(by));
        let canvas_rect = full
            .crop(bx, by, bw, bh)
            .ok_or_else(|| anyhow!("canvas rect outside screenshot"))?;
        Ok(canvas_rect.resize_nearest(info.cw, info.ch))
    }

    async fn fetch_full_inner(&self) -> Result<Raster> {
        let mut slot = self.session.lock().await;
        self.ensure_session(&mut slot).await?;
        let session = slot.as_ref().ok_or_else(|| anyhow!("no session"))?;
        let info = Self::canvas_info(&session.page).await?;

        match Self::image_data_region(&session.page, 0, 0, info.cw, info.ch).await {
            Ok(frame) => Ok(frame),
            Err(e) => {
                debug!("image-data capture failed ({e:#}), trying screenshot");
                Self::screenshot_canvas(&session.page, &info).await
            }
        }
    }

    async fn fetch_region_inner(&self, x: u32, y: u32, w: u32, h: u32) -> Result<Raster> {
        let mut slot = self.session.lock().await;
        self.ensure_session(&mut slot).await?;
        let session = slot.as_ref().ok_or_else(|| anyhow!("no session"))?;
        let info = Self::canvas_info(&session.page).await?;

        match Self::image_data_region(&session.page, x, y, w, h).await {
            Ok(tile) => Ok(tile),
            Err(e) => {
                debug!("image-data capture failed ({e:#}), trying screenshot");
                let frame = Self::screenshot_canvas(&session.page, &info).await?;
                frame
                    .crop(x, y, w, h)
                    .ok_or_else(|| anyhow!("region outside canvas"))
            }
        }
    }

    /// Closes the browser session, if one is running.
    pub async fn shutdown(&self) {
        let mut slot = self.session.lock().await;
        if let Some(mut session) = slot.take() {
            let _ = session.browser.close().await;
        }
    }
}

#[async_trait]
impl FrameSource for BrowserFrameSource {
    async fn fetch_full(&self) -> Option<Raster> {
        match self.fetch_full_inner().await {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("full-frame capture failed: {e:#}");
                None
            }
        }
    }

    async fn fetch_region(&self, x: u32, y: u32, w: u32, h: u32) -> Option<Raster> {
        match self.fetch_region_inner(x, y, w, h).await {
            Ok(tile) => Some(tile),
            Err(e) => {
                warn!("region capture failed: {e:#}");
                None
            }
        }
    }
}
