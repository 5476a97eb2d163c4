//! Control API.
//!
//! A small JSON surface for operating the monitor: artwork CRUD, reference
//! uploads and captures, config, and start/stop. No authentication; CORS is
//! wide open so the operator frontend can live anywhere.

mod models;
mod routes;

pub use routes::{router, AppState};
