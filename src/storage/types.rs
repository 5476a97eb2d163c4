use serde::{Deserialize, Serialize};
use std::fmt;

/// Surveillance mode of an artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtworkMode {
    /// The artwork is still being painted: pixels matching either the
    /// template or the ground snapshot are acceptable.
    Build,
    /// The artwork is finished: only template pixels are acceptable.
    Protect,
}

impl Default for ArtworkMode {
    fn default() -> Self {
        ArtworkMode::Build
    }
}

impl ArtworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtworkMode::Build => "build",
            ArtworkMode::Protect => "protect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "build" => Some(ArtworkMode::Build),
            "protect" => Some(ArtworkMode::Protect),
            _ => None,
        }
    }
}

impl fmt::Display for ArtworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered rectangular region of the canvas under surveillance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub id: i64,
    pub name: String,
    /// Placement on the canvas, in canvas pixel coordinates (top-left).
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    /// RFC 3339 registration timestamp.
    pub added_at: String,
    pub mode: ArtworkMode,
}

/// Identity of a stored template: `(w, h, byte length)`, `(0, 0, 0)` when
/// absent. The tile planner rebuilds an artwork's plan whenever this value
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemplateFingerprint {
    pub w: u32,
    pub h: u32,
    pub bytes: usize,
}
