//! The scan loop and its controller.
//!
//! [`Sentinel`] is the owner of everything the loop mutates: tile plans,
//! template fingerprints, the event tracker, the hot set and the running
//! flag. The control API never touches those; it writes artworks and config
//! to storage, and the loop picks the changes up at the next tick by
//! re-reading and comparing fingerprints.
//!
//! A tick, in order: load the clamped config, reload the artwork list (id
//! order), refresh stale tile plans, fetch one canonical frame, then spend
//! the global tile budget in two passes: pass 1 hands every artwork one
//! tile (hot artworks first), pass 2 round-robins the remainder. Errors
//! never kill the loop; it logs and resumes after a short backoff.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};

use crate::alert::{AlertSink, DEGRADATION_COLOR, SUSPICION_COLOR};
use crate::config::MonitorConfig;
use crate::engine::compare::{baseline_diffs, tile_diffs, CompareSettings, ReferenceSet};
use crate::engine::planner::{build_tiles, filter_tiles, TilePlan, TileRect};
use crate::engine::tracker::{classify, AlertKind, Dispatch, EventTracker};
use crate::frame::FrameSource;
use crate::raster::Raster;
use crate::storage::{Artwork, Store, TemplateFingerprint};

/// Pause after a failed tick before the loop resumes.
const TICK_BACKOFF: Duration = Duration::from_millis(500);

/// Everything the loop carries across ticks. Owned by the loop task; the
/// tests drive [`Sentinel::tick`] against one directly.
#[derive(Default)]
pub struct ScanState {
    plans: HashMap<i64, TilePlan>,
    fingerprints: HashMap<i64, TemplateFingerprint>,
    tracker: EventTracker,
    /// Artworks that emitted at least one event; scheduled first.
    hot: HashSet<i64>,
    /// Artwork ids in visit order, rebuilt when the stored id set changes.
    rr_ids: Vec<i64>,
    /// Round-robin position into the dispatch order.
    cursor: usize,
}

/// What one tick did, for logging and tests.
pub struct TickReport {
    /// Sleep until the next tick.
    pub period: Duration,
    /// Tiles visited this tick (budget-consuming visits, skips included),
    /// in dispatch order.
    pub processed: Vec<(i64, TileRect)>,
}

/// The monitor controller: start/stop surface plus the tick itself.
#[derive(Clone)]
pub struct Sentinel {
    store: Store,
    frames: Arc<dyn FrameSource>,
    sink: Arc<dyn AlertSink>,
    running: Arc<AtomicBool>,
}

impl Sentinel {
    pub fn new(store: Store, frames: Arc<dyn FrameSource>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            store,
            frames,
            sink,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the scan loop unless it is already running. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("monitor already running");
            return;
        }
        let this = self.clone();
        tokio::spawn(async move { this.run().await });
    }

    /// Requests a stop. The flag is checked at the top of the loop, so an
    /// in-flight tick finishes first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run(&self) {
        info!("monitor loop started");
        let mut state = ScanState::default();
        while self.running.load(Ordering::SeqCst) {
            match self.tick(&mut state).await {
                Ok(report) => {
                    if !report.processed.is_empty() {
                        debug!("tick visited {} tiles", report.processed.len());
                    }
                    tokio::time::sleep(report.period).await;
                }
                Err(e) => {
                    error!("tick failed: {e:#}");
                    tokio::time::sleep(TICK_BACKOFF).await;
                }
            }
        }
        info!("monitor loop stopped");
    }

    /// One full scheduling round. Public within the crate so tests can step
    /// the loop deterministically.
    pub(crate) async fn tick(&self, state: &mut ScanState) -> Result<TickReport> {
        let cfg = self.store.config()?.clamped();
        let mut report = TickReport {
            period: cfg.period(),
            processed: Vec::new(),
        };

        let artworks = self.store.artworks_asc()?;
        let ids: Vec<i64> = artworks.iter().map(|a| a.id).collect();
        if state.rr_ids != ids {
            state.rr_ids = ids.clone();
            state.cursor = 0;
            state.plans.retain(|id, _| ids.contains(id));
            state.fingerprints.retain(|id, _| ids.contains(id));
        }

        for art in &artworks {
            self.refresh_plan(state, art, &cfg)?;
        }

        // One canonical frame per tick, fetched even with nothing to scan
        // so a broken frame source surfaces immediately.
        let Some(frame) = self.frames.fetch_full().await else {
            debug!("no frame this tick, skipping");
            return Ok(report);
        };

        if artworks.is_empty() {
            return Ok(report);
        }

        let by_id: HashMap<i64, &Artwork> = artworks.iter().map(|a| (a.id, a)).collect();
        let ScanState {
            plans,
            tracker,
            hot,
            rr_ids,
            cursor,
            ..
        } = state;

        let mut budget = cfg.tiles_global_per_tick;

        // Dispatch order: hot artworks move to the front, both groups keep
        // their relative id order.
        let mut order: Vec<i64> = rr_ids.iter().copied().filter(|id| hot.contains(id)).collect();
        order.extend(rr_ids.iter().copied().filter(|id| !hot.contains(id)));

        // Pass 1: at most one tile for every artwork, so a large plan can
        // never starve its neighbors.
        if cfg.one_tile_per_artwork {
            let mut idx = *cursor % order.len();
            for _ in 0..order.len() {
                if budget <= 0 {
                    break;
                }
                let aid = order[idx];
                idx = (idx + 1) % order.len();
                let Some(&art) = by_id.get(&aid) else { continue };
                let Some(tile) = plans.get_mut(&aid).and_then(|p| p.next_tile()) else {
                    continue;
                };
                self.process_tile(tracker, hot, &frame, &cfg, art, tile)?;
                report.processed.push((aid, tile));
                budget -= 1;
            }
            *cursor = idx;
        }

        // Pass 2: spend what is left of the budget round-robin. A full
        // round without a single tile means every plan is empty; bail out
        // instead of spinning.
        let mut idx = *cursor % rr_ids.len();
        let mut barren = 0usize;
        while budget > 0 {
            let aid = rr_ids[idx];
            idx = (idx + 1) % rr_ids.len();
            let (Some(&art), Some(tile)) = (
                by_id.get(&aid),
                plans.get_mut(&aid).and_then(|p| p.next_tile()),
            ) else {
                barren += 1;
                if barren >= rr_ids.len() {
                    break;
                }
                continue;
            };
            barren = 0;
            self.process_tile(tracker, hot, &frame, &cfg, art, tile)?;
            report.processed.push((aid, tile));
            budget -= 1;
        }
        *cursor = idx;

        Ok(report)
    }

    /// Rebuilds the tile plan of an artwork when it has none yet or its
    /// template fingerprint moved; reuses the existing plan otherwise.
    fn refresh_plan(&self, state: &mut ScanState, art: &Artwork, cfg: &MonitorConfig) -> Result<()> {
        let fp = self.store.template_fingerprint(art.id)?;
        if state.plans.contains_key(&art.id) && state.fingerprints.get(&art.id) == Some(&fp) {
            return Ok(());
        }

        let (w, h) = (art.w.max(0) as u32, art.h.max(0) as u32);
        let mut tiles = build_tiles(w, h, cfg.tile_w as u32, cfg.tile_h as u32);
        if cfg.ignore_outside {
            let template = self.store.template(art.id)?;
            let polygon = self.store.mask(art.id)?;
            tiles = filter_tiles(tiles, cfg.detourage_mode, template.as_ref(), polygon.as_ref());
        }
        debug!("tile plan for artwork {}: {} tiles", art.id, tiles.len());
        state.plans.insert(art.id, TilePlan::new(tiles));
        state.fingerprints.insert(art.id, fp);
        Ok(())
    }

    /// Handles one tile visit: slice the frame, count diffs, classify and
    /// dispatch. Shared by both passes; every call consumes one unit of
    /// budget at the call site, including the skip cases.
    fn process_tile(
        &self,
        tracker: &mut EventTracker,
        hot: &mut HashSet<i64>,
        frame: &Raster,
        cfg: &MonitorConfig,
        art: &Artwork,
        tile: TileRect,
    ) -> Result<()> {
        let x0 = art.x + tile.x as i64;
        let y0 = art.y + tile.y as i64;
        if x0 < 0 || y0 < 0 {
            debug!("artwork {} tile at ({x0},{y0}) is off-canvas", art.id);
            return Ok(());
        }
        let Some(cur) = frame.crop(x0 as u32, y0 as u32, tile.w, tile.h) else {
            debug!("artwork {} tile at ({x0},{y0}) is outside the frame", art.id);
            return Ok(());
        };

        let template = self.store.template(art.id)?;
        let ground = self.store.ground(art.id)?;

        let diffs = match (&template, &ground) {
            (Some(tpl), Some(grd)) => {
                if !covers(tpl, tile) || !covers(grd, tile) {
                    warn!("artwork {}: stored references do not cover tile, skipping", art.id);
                    return Ok(());
                }
                let polygon = self.store.mask(art.id)?;
                tile_diffs(
                    &cur,
                    &ReferenceSet {
                        template: tpl,
                        ground: grd,
                        polygon: polygon.as_ref(),
                    },
                    tile,
                    &CompareSettings {
                        mode: art.mode,
                        detourage: cfg.detourage_mode,
                        tolerance: cfg.tolerance,
                        ignore_outside: cfg.ignore_outside,
                    },
                )
            }
            _ => {
                // No template+ground pair: fall back to the legacy baseline
                // estimate, or skip entirely when there is nothing at all.
                let Some(base) = self.store.baseline(art.id)? else {
                    return Ok(());
                };
                if !covers(&base, tile) {
                    warn!("artwork {}: baseline does not cover tile, skipping", art.id);
                    return Ok(());
                }
                let mut d = baseline_diffs(&cur, &base, tile, cfg.tolerance, cfg.stride);
                let refine_at = 3i64.max(cfg.suspicion_threshold / 2) as u64;
                if cfg.staged_scan && cfg.stride > 1 && d >= refine_at {
                    d = baseline_diffs(&cur, &base, tile, cfg.tolerance, 1);
                }
                d
            }
        };

        let Some(kind) = classify(diffs, cfg.suspicion_threshold, cfg.degradation_threshold) else {
            return Ok(());
        };

        let (title, threshold, color) = match kind {
            AlertKind::Degradation => (
                "Degradation in progress!",
                cfg.degradation_threshold,
                DEGRADATION_COLOR,
            ),
            AlertKind::Suspicion => (
                "Suspicion of degradation",
                cfg.suspicion_threshold,
                SUSPICION_COLOR,
            ),
        };
        let desc = format!(
            "Artwork: {} | tile=({},{},{},{}) | diffs={} (>={}) | zone=({},{},{},{})",
            art.name, tile.x, tile.y, tile.w, tile.h, diffs, threshold, art.x, art.y, art.w, art.h
        );
        warn!("{title} {desc}");

        match tracker.observe(art.id, tile, kind) {
            Dispatch::Send => self.sink.send(title, &desc, color),
            Dispatch::Update => self.sink.update(title, &desc, color),
        }
        hot.insert(art.id);
        Ok(())
    }
}

fn covers(raster: &Raster, tile: TileRect) -> bool {
    tile.x + tile.w <= raster.width() && tile.y + tile.h <= raster.height()
}
