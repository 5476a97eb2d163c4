use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use url::Url;

use pixel_sentinel::api::{router, AppState};
use pixel_sentinel::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let db_path = std::env::var("BLUE_SCAN_DB").unwrap_or_else(|_| "blue_scan.sqlite".to_string());
    let canvas_url =
        std::env::var("BLUE_SCAN_URL").unwrap_or_else(|_| DEFAULT_CANVAS_URL.to_string());
    let addr = std::env::var("BLUE_SCAN_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    // Fail fast on a broken canvas URL instead of at the first fetch.
    Url::parse(&canvas_url).with_context(|| format!("invalid canvas URL: {canvas_url}"))?;

    let store = Store::open(&db_path).with_context(|| format!("opening database {db_path}"))?;
    let frames: Arc<dyn FrameSource> = Arc::new(BrowserFrameSource::new(canvas_url));
    let sentinel = Sentinel::new(store.clone(), frames.clone(), Arc::new(ConsoleSink));

    let app = router(AppState {
        store,
        sentinel,
        frames,
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("control API listening on {addr}, database at {db_path}");
    axum::serve(listener, app).await?;
    Ok(())
}
