//! Tile planning.
//!
//! Each artwork is covered by a row-major grid of tile rectangles; the grid
//! is the unit of scheduling. A [`TilePlan`] carries the retained tiles and
//! a wrapping cursor so successive visits walk the artwork one tile at a
//! time. Plans are rebuilt when the stored template's fingerprint changes
//! (or on first sight of the artwork) and reused otherwise.

use crate::config::DetourageMode;
use crate::raster::{Mask, Raster};

/// A sub-rectangle of an artwork, in artwork-local pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Row-major tiling of `[0, w) x [0, h)` with `tw` x `th` tiles; edge tiles
/// are truncated to fit.
pub fn build_tiles(w: u32, h: u32, tw: u32, th: u32) -> Vec<TileRect> {
    let mut out = Vec::new();
    if w == 0 || h == 0 || tw == 0 || th == 0 {
        return out;
    }
    let mut y = 0;
    while y < h {
        let hh = th.min(h - y);
        let mut x = 0;
        while x < w {
            let ww = tw.min(w - x);
            out.push(TileRect { x, y, w: ww, h: hh });
            x += tw;
        }
        y += th;
    }
    out
}

/// Retains only tiles whose intersection with the inside-mask is nonempty.
///
/// The mask source follows the detourage mode, falling back to whatever
/// exists when the preferred source is absent. With no usable source at all
/// every tile is kept.
pub fn filter_tiles(
    tiles: Vec<TileRect>,
    detourage: DetourageMode,
    template: Option<&Raster>,
    polygon: Option<&Mask>,
) -> Vec<TileRect> {
    if template.is_none() && polygon.is_none() {
        return tiles;
    }
    tiles
        .into_iter()
        .filter(|t| tile_touches_inside(*t, detourage, template, polygon))
        .collect()
}

fn tile_touches_inside(
    tile: TileRect,
    detourage: DetourageMode,
    template: Option<&Raster>,
    polygon: Option<&Mask>,
) -> bool {
    let alpha_at = |x: u32, y: u32| -> Option<bool> {
        template.map(|tpl| {
            if x < tpl.width() && y < tpl.height() {
                tpl.pixel(x, y)[3] > 0
            } else {
                false
            }
        })
    };
    let poly_at = |x: u32, y: u32| -> Option<bool> {
        polygon.map(|m| x < m.width() && y < m.height() && m.contains(x, y))
    };

    for dy in 0..tile.h {
        for dx in 0..tile.w {
            let (x, y) = (tile.x + dx, tile.y + dy);
            let inside = match detourage {
                DetourageMode::AlphaOnly if template.is_some() => alpha_at(x, y).unwrap_or(false),
                DetourageMode::PolygonOnly if polygon.is_some() => poly_at(x, y).unwrap_or(false),
                // Union of whatever exists, which also covers the fallback
                // cases of the two specific modes.
                _ => alpha_at(x, y).unwrap_or(false) || poly_at(x, y).unwrap_or(false),
            };
            if inside {
                return true;
            }
        }
    }
    false
}

/// The cyclic tile sequence of one artwork.
#[derive(Debug, Clone, Default)]
pub struct TilePlan {
    tiles: Vec<TileRect>,
    cursor: usize,
}

impl TilePlan {
    pub fn new(tiles: Vec<TileRect>) -> Self {
        Self { tiles, cursor: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// The tile under the cursor, advancing and wrapping. `None` only when
    /// the plan has no tiles at all.
    pub fn next_tile(&mut self) -> Option<TileRect> {
        if self.tiles.is_empty() {
            return None;
        }
        let t = self.tiles[self.cursor];
        self.cursor = (self.cursor + 1) % self.tiles.len();
        Some(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;

    #[test]
    fn tiles_cover_without_overlap() {
        let (w, h, tw, th) = (25u32, 11u32, 10u32, 10u32);
        let tiles = build_tiles(w, h, tw, th);

        let mut hits = vec![0u8; (w * h) as usize];
        for t in &tiles {
            for dy in 0..t.h {
                for dx in 0..t.w {
                    hits[((t.y + dy) * w + t.x + dx) as usize] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&n| n == 1), "coverage is exact and disjoint");
    }

    #[test]
    fn edge_tiles_are_truncated() {
        let tiles = build_tiles(25, 11, 10, 10);
        assert_eq!(tiles.len(), 6);
        // Row-major: last tile of the first row is 5 wide, bottom row 1 tall.
        assert_eq!(tiles[2], TileRect { x: 20, y: 0, w: 5, h: 10 });
        assert_eq!(tiles[5], TileRect { x: 20, y: 10, w: 5, h: 1 });
    }

    #[test]
    fn degenerate_sizes_yield_no_tiles() {
        assert!(build_tiles(0, 10, 10, 10).is_empty());
        assert!(build_tiles(10, 0, 10, 10).is_empty());
    }

    fn template_with_opaque_left_half(w: u32, h: u32) -> Raster {
        let mut tpl = Raster::blank(w, h);
        for y in 0..h {
            for x in 0..w / 2 {
                tpl.put_pixel(x, y, [10, 20, 30, 255]);
            }
        }
        tpl
    }

    #[test]
    fn alpha_filter_drops_fully_transparent_tiles() {
        let tpl = template_with_opaque_left_half(20, 10);
        let tiles = build_tiles(20, 10, 10, 10);
        let kept = filter_tiles(tiles, DetourageMode::AlphaOnly, Some(&tpl), None);
        assert_eq!(kept, vec![TileRect { x: 0, y: 0, w: 10, h: 10 }]);
    }

    #[test]
    fn polygon_filter_falls_back_to_alpha() {
        let tpl = template_with_opaque_left_half(20, 10);
        let tiles = build_tiles(20, 10, 10, 10);
        let kept = filter_tiles(tiles, DetourageMode::PolygonOnly, Some(&tpl), None);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn union_mode_keeps_tiles_covered_by_either_source() {
        let tpl = template_with_opaque_left_half(20, 10);
        // Polygon covers only the right half.
        let mut bytes = vec![0u8; 200];
        for y in 0..10 {
            for x in 10..20 {
                bytes[y * 20 + x] = 255;
            }
        }
        let poly = Mask::from_bytes(20, 10, bytes).unwrap();

        let tiles = build_tiles(20, 10, 10, 10);
        let kept = filter_tiles(tiles, DetourageMode::AlphaOrPolygon, Some(&tpl), Some(&poly));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn no_mask_sources_keep_everything() {
        let tiles = build_tiles(20, 10, 10, 10);
        let kept = filter_tiles(tiles.clone(), DetourageMode::AlphaOnly, None, None);
        assert_eq!(kept, tiles);
    }

    #[test]
    fn cursor_wraps_in_order() {
        let mut plan = TilePlan::new(build_tiles(20, 10, 10, 10));
        let a = plan.next_tile().unwrap();
        let b = plan.next_tile().unwrap();
        let a2 = plan.next_tile().unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a2, "cursor wraps back to the first tile");
    }

    #[test]
    fn empty_plan_yields_none() {
        let mut plan = TilePlan::new(Vec::new());
        assert!(plan.next_tile().is_none());
        assert!(plan.is_empty());
    }
}
