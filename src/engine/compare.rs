//! Pixel classification rules.
//!
//! Pure functions from an observed tile plus the stored references to a
//! count of non-conforming pixels. No I/O, no state; the scheduler feeds
//! these and the tests exercise them directly with synthetic rasters.
//!
//! The classification of a single inside pixel:
//!
//! - sentinel pixels (template RGB equals [`DEFACE_RGB`], alpha ignored)
//!   must match the ground snapshot, whatever the mode;
//! - in `build` mode anything matching template **or** ground is fine, the
//!   artwork is still going up;
//! - in `protect` mode only the template counts.
//!
//! Outside pixels are held to the ground snapshot unless `ignore_outside`
//! waives them entirely.

use crate::config::DetourageMode;
use crate::engine::planner::TileRect;
use crate::raster::{Mask, Raster, DEFACE_RGB};
use crate::storage::ArtworkMode;

/// The stored references a comparison runs against. `template` and `ground`
/// are full artwork-sized rasters; `polygon` is the optional operator mask.
pub struct ReferenceSet<'a> {
    pub template: &'a Raster,
    pub ground: &'a Raster,
    pub polygon: Option<&'a Mask>,
}

/// Knobs the comparator honors, lifted from the config row and the artwork.
#[derive(Debug, Clone, Copy)]
pub struct CompareSettings {
    pub mode: ArtworkMode,
    pub detourage: DetourageMode,
    /// Per-channel tolerance, inclusive.
    pub tolerance: i64,
    pub ignore_outside: bool,
}

/// All four RGBA channels within `tol`, inclusive.
#[inline]
fn within_tol(a: [u8; 4], b: [u8; 4], tol: i64) -> bool {
    (a[0] as i64 - b[0] as i64).abs() <= tol
        && (a[1] as i64 - b[1] as i64).abs() <= tol
        && (a[2] as i64 - b[2] as i64).abs() <= tol
        && (a[3] as i64 - b[3] as i64).abs() <= tol
}

/// Counts the non-conforming pixels of one tile.
///
/// `current` is the observed tile (sized `tile.w` x `tile.h`); references
/// are indexed at tile-offset coordinates and must cover the tile rectangle.
pub fn tile_diffs(
    current: &Raster,
    refs: &ReferenceSet<'_>,
    tile: TileRect,
    settings: &CompareSettings,
) -> u64 {
    debug_assert!(tile.x + tile.w <= refs.template.width());
    debug_assert!(tile.y + tile.h <= refs.template.height());

    let mut diffs = 0u64;
    for dy in 0..tile.h {
        for dx in 0..tile.w {
            let (ax, ay) = (tile.x + dx, tile.y + dy);
            let cur = current.pixel(dx, dy);
            let tpl = refs.template.pixel(ax, ay);
            let grd = refs.ground.pixel(ax, ay);

            let alpha = tpl[3] > 0;
            // A stale mask can be smaller than the artwork (resizing an
            // artwork does not touch its mask row); out-of-bounds pixels
            // are simply not covered by it.
            let poly = refs
                .polygon
                .map(|m| ax < m.width() && ay < m.height() && m.contains(ax, ay));
            let inside = match settings.detourage {
                DetourageMode::AlphaOnly => alpha,
                DetourageMode::PolygonOnly => poly.unwrap_or(alpha),
                DetourageMode::AlphaOrPolygon => alpha || poly.unwrap_or(false),
            };

            let tpl_ok = within_tol(cur, tpl, settings.tolerance);
            let grd_ok = within_tol(cur, grd, settings.tolerance);

            let ok = if inside {
                let deface = tpl[0] == DEFACE_RGB[0] && tpl[1] == DEFACE_RGB[1] && tpl[2] == DEFACE_RGB[2];
                if deface {
                    grd_ok
                } else {
                    match settings.mode {
                        ArtworkMode::Build => tpl_ok || grd_ok,
                        ArtworkMode::Protect => tpl_ok,
                    }
                }
            } else {
                settings.ignore_outside || grd_ok
            };

            if !ok {
                diffs += 1;
            }
        }
    }
    diffs
}

/// Legacy fallback: estimates the diff count of a tile against the baseline
/// snapshot by sampling every `stride`-th pixel and scaling the result up to
/// the full tile area.
pub fn baseline_diffs(
    current: &Raster,
    baseline: &Raster,
    tile: TileRect,
    tolerance: i64,
    stride: i64,
) -> u64 {
    let stride = stride.max(1) as u32;
    let mut sampled = 0u64;
    let mut diff_sample = 0u64;
    let mut dy = 0;
    while dy < tile.h {
        let mut dx = 0;
        while dx < tile.w {
            let cur = current.pixel(dx, dy);
            let base = baseline.pixel(tile.x + dx, tile.y + dy);
            if !within_tol(cur, base, tolerance) {
                diff_sample += 1;
            }
            sampled += 1;
            dx += stride;
        }
        dy += stride;
    }
    if stride == 1 || sampled == 0 {
        return diff_sample;
    }
    let scale = (tile.w as f64 * tile.h as f64) / sampled as f64;
    (diff_sample as f64 * scale) as u64
}
