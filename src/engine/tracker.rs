//! Per-tile event memory.
//!
//! The alert sink distinguishes posting a fresh embed from editing the one
//! already up. Which of the two applies depends only on the tile's last
//! recorded state, so the tracker is a map from `(artwork id, tile rect)`
//! to that state. Entries are never cleared: a tile that calms down keeps
//! its last state, which is exactly what the dispatch rules consult.

use std::collections::HashMap;
use std::time::Instant;

use crate::engine::planner::TileRect;

/// Last recorded severity of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileState {
    #[default]
    Idle,
    Suspicion,
    Degradation,
}

/// Severity of a fresh observation that crossed a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Suspicion,
    Degradation,
}

/// How the alert sink should be invoked for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Send,
    Update,
}

/// Maps a diff count onto an alert severity, degradation first.
pub fn classify(diffs: u64, suspicion_threshold: i64, degradation_threshold: i64) -> Option<AlertKind> {
    if diffs >= degradation_threshold.max(0) as u64 {
        Some(AlertKind::Degradation)
    } else if diffs >= suspicion_threshold.max(0) as u64 {
        Some(AlertKind::Suspicion)
    } else {
        None
    }
}

#[derive(Debug, Default)]
pub struct EventTracker {
    last: HashMap<(i64, TileRect), (TileState, Instant)>,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event for a tile and answers whether the sink should send
    /// a new embed or update the previous one:
    ///
    /// - degradation updates only a prior suspicion, anything else sends;
    /// - suspicion updates a prior suspicion or degradation, otherwise sends.
    pub fn observe(&mut self, artwork_id: i64, tile: TileRect, kind: AlertKind) -> Dispatch {
        let key = (artwork_id, tile);
        let prev = self.last.get(&key).map(|(s, _)| *s).unwrap_or_default();

        let (dispatch, state) = match kind {
            AlertKind::Degradation => (
                if prev == TileState::Suspicion {
                    Dispatch::Update
                } else {
                    Dispatch::Send
                },
                TileState::Degradation,
            ),
            AlertKind::Suspicion => (
                if matches!(prev, TileState::Suspicion | TileState::Degradation) {
                    Dispatch::Update
                } else {
                    Dispatch::Send
                },
                TileState::Suspicion,
            ),
        };

        self.last.insert(key, (state, Instant::now()));
        dispatch
    }

    #[cfg(test)]
    pub fn state(&self, artwork_id: i64, tile: TileRect) -> TileState {
        self.last
            .get(&(artwork_id, tile))
            .map(|(s, _)| *s)
            .unwrap_or_default()
    }
}
