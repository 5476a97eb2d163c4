//! Request and response bodies of the control API.

use serde::{Deserialize, Serialize};

/// Plain-rectangle artwork registration.
#[derive(Debug, Deserialize)]
pub struct ArtworkIn {
    pub name: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

/// Four-corner artwork registration; produces a polygon mask alongside the
/// bounding-box placement.
#[derive(Debug, Deserialize)]
pub struct CornersIn {
    pub name: String,
    pub corners: Vec<[i64; 2]>,
}

/// Registration by top-left corner plus template image; the placement size
/// comes from the decoded image.
#[derive(Debug, Deserialize)]
pub struct PlaceTlIn {
    pub name: String,
    pub tl_x: i64,
    pub tl_y: i64,
    pub data_url: String,
}

#[derive(Debug, Deserialize)]
pub struct TemplateIn {
    pub data_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ModeIn {
    pub mode: String,
}

#[derive(Debug, Serialize)]
pub struct OkOut {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct MonitorOut {
    pub running: bool,
}
