//! Monitor configuration.
//!
//! A single [`MonitorConfig`] record drives the whole scan loop. It is
//! persisted as the one-row `config` table, served verbatim over the control
//! API, and re-read by the scheduler at the top of every tick. There is no
//! hot-reload channel on purpose; the tick boundary is the reload point.
//!
//! Integer fields are clamped with [`MonitorConfig::clamped`] both when the
//! API writes the record and when the scheduler loads it, so a hand-edited
//! database row cannot push the loop into degenerate tile sizes or budgets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the inside-mask of an artwork is derived when filtering tiles and
/// classifying pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetourageMode {
    /// Template alpha channel only: a pixel is inside iff its template
    /// alpha is nonzero.
    AlphaOnly,
    /// Operator-drawn polygon only; falls back to template alpha when no
    /// polygon mask was stored.
    PolygonOnly,
    /// Union of whichever of template alpha / polygon exist.
    AlphaOrPolygon,
}

impl Default for DetourageMode {
    fn default() -> Self {
        DetourageMode::AlphaOnly
    }
}

impl DetourageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetourageMode::AlphaOnly => "alpha_only",
            DetourageMode::PolygonOnly => "polygon_only",
            DetourageMode::AlphaOrPolygon => "alpha_or_polygon",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "alpha_only" => Some(DetourageMode::AlphaOnly),
            "polygon_only" => Some(DetourageMode::PolygonOnly),
            "alpha_or_polygon" => Some(DetourageMode::AlphaOrPolygon),
            _ => None,
        }
    }
}

impl fmt::Display for DetourageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The singleton monitor configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    // --- alert routing placeholders (kept for API compatibility) ---
    #[serde(default)]
    pub guild_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub discord_webhook: String,

    // --- scan cadence ---
    /// Frontend polling interval hint, in milliseconds. Not used by the loop.
    pub poll_ms: i64,
    /// Target scan frequency. The loop period is `max(0.2s, 1/scan_hz)`.
    pub scan_hz: f64,

    // --- comparison ---
    /// Per-channel tolerance for RGBA equality, inclusive.
    pub tolerance: i64,
    pub suspicion_threshold: i64,
    pub degradation_threshold: i64,
    /// Sampling stride for the baseline fallback path. Clamped to >= 1.
    pub stride: i64,
    /// Refine a strided estimate at stride 1 once it looks suspicious.
    pub staged_scan: bool,

    // --- tiling / scheduling ---
    pub tile_w: i64,
    pub tile_h: i64,
    /// Legacy knob, kept on the surface but not wired into scheduling.
    pub tiles_per_tick: i64,
    /// Global tile budget shared by all artworks within one tick.
    pub tiles_global_per_tick: i64,
    /// Guarantee every artwork one tile per tick before budget spill-over.
    pub one_tile_per_artwork: bool,

    // --- masking ---
    /// When set, pixels outside the inside-mask never count as diffs and
    /// tiles entirely outside it are dropped from the plan.
    pub ignore_outside: bool,
    #[serde(default)]
    pub detourage_mode: DetourageMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            guild_id: String::new(),
            channel_id: String::new(),
            discord_webhook: String::new(),
            poll_ms: 2000,
            scan_hz: 1.0,
            tolerance: 8,
            suspicion_threshold: 5,
            degradation_threshold: 30,
            stride: 1,
            staged_scan: true,
            tile_w: 100,
            tile_h: 100,
            tiles_per_tick: 1,
            tiles_global_per_tick: 64,
            one_tile_per_artwork: true,
            ignore_outside: true,
            detourage_mode: DetourageMode::AlphaOnly,
        }
    }
}

impl MonitorConfig {
    /// Returns a copy with every clamped field forced into its legal range.
    pub fn clamped(&self) -> Self {
        let mut c = self.clone();
        c.stride = c.stride.max(1);
        c.tile_w = c.tile_w.clamp(10, 1000);
        c.tile_h = c.tile_h.clamp(10, 1000);
        c.tiles_per_tick = c.tiles_per_tick.max(1);
        c.tiles_global_per_tick = c.tiles_global_per_tick.max(1);
        c
    }

    /// Scan period derived from `scan_hz`, floored at 200 ms.
    pub fn period(&self) -> Duration {
        let hz = if self.scan_hz.is_finite() && self.scan_hz > 0.0 {
            self.scan_hz
        } else {
            1.0
        };
        Duration::from_secs_f64((1.0 / hz).max(0.2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_integer_fields() {
        let cfg = MonitorConfig {
            stride: 0,
            tile_w: 3,
            tile_h: 5000,
            tiles_per_tick: -4,
            tiles_global_per_tick: 0,
            ..MonitorConfig::default()
        }
        .clamped();

        assert_eq!(cfg.stride, 1);
        assert_eq!(cfg.tile_w, 10);
        assert_eq!(cfg.tile_h, 1000);
        assert_eq!(cfg.tiles_per_tick, 1);
        assert_eq!(cfg.tiles_global_per_tick, 1);
    }

    #[test]
    fn period_floors_at_200ms() {
        let mut cfg = MonitorConfig::default();
        assert_eq!(cfg.period(), Duration::from_secs(1));

        cfg.scan_hz = 100.0;
        assert_eq!(cfg.period(), Duration::from_millis(200));

        cfg.scan_hz = 0.5;
        assert_eq!(cfg.period(), Duration::from_secs(2));

        // Nonsense frequencies fall back to 1 Hz instead of dividing by zero.
        cfg.scan_hz = 0.0;
        assert_eq!(cfg.period(), Duration::from_secs(1));
    }

    #[test]
    fn detourage_mode_round_trips_through_names() {
        for mode in [
            DetourageMode::AlphaOnly,
            DetourageMode::PolygonOnly,
            DetourageMode::AlphaOrPolygon,
        ] {
            assert_eq!(DetourageMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(DetourageMode::parse("nope"), None);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let cfg = MonitorConfig {
            detourage_mode: DetourageMode::AlphaOrPolygon,
            ..MonitorConfig::default()
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["detourage_mode"], "alpha_or_polygon");

        let back: MonitorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }
}
