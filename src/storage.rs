//! Persistent state: artworks, their reference rasters, and the config row.
//!
//! Everything lives in one SQLite database behind an r2d2 pool. RGBA blobs
//! are stored as raw row-major bytes next to their `(w, h)` so a template
//! read back is byte-identical to the template stored.

mod store;
mod types;

pub use store::Store;
pub use types::{Artwork, ArtworkMode, TemplateFingerprint};
