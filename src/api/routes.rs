use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use log::error;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::models::{ArtworkIn, CornersIn, ModeIn, MonitorOut, OkOut, PlaceTlIn, TemplateIn};
use crate::config::MonitorConfig;
use crate::engine::Sentinel;
use crate::errors::SentinelError;
use crate::frame::FrameSource;
use crate::raster::{decode_data_url, Mask};
use crate::storage::{Artwork, ArtworkMode, Store};

/// Shared handler state. The store and sentinel clones are cheap; the frame
/// source is the process-wide singleton.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub sentinel: Sentinel,
    pub frames: Arc<dyn FrameSource>,
}

/// Builds the control router with CORS open to any origin, method and
/// header.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/config", get(get_config).post(put_config))
        .route("/artworks", get(list_artworks).post(create_artwork))
        .route("/artworks/corners", post(create_from_corners))
        .route("/artworks/place_tl", post(create_place_tl))
        .route("/artworks/{id}", delete(remove_artwork))
        .route("/artworks/{id}/template", post(upload_template))
        .route("/artworks/{id}/snapshot", post(snapshot_baseline))
        .route("/artworks/{id}/ground_snapshot", post(snapshot_ground))
        .route("/artworks/{id}/mode", post(set_mode))
        .route("/monitor/start", post(start_monitor))
        .route("/monitor/stop", post(stop_monitor))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Error wrapper mapping [`SentinelError`] kinds onto HTTP statuses.
pub struct ApiError(SentinelError);

impl From<SentinelError> for ApiError {
    fn from(e: SentinelError) -> Self {
        ApiError(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(SentinelError::Internal(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            SentinelError::BadInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            SentinelError::ArtworkNotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            SentinelError::BackendUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
            }
            SentinelError::Internal(e) => {
                error!("internal error in handler: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn healthz() -> Json<OkOut> {
    Json(OkOut { ok: true })
}

async fn get_config(State(state): State<AppState>) -> ApiResult<Json<MonitorConfig>> {
    Ok(Json(state.store.config()?))
}

async fn put_config(
    State(state): State<AppState>,
    Json(cfg): Json<MonitorConfig>,
) -> ApiResult<Json<MonitorConfig>> {
    Ok(Json(state.store.put_config(&cfg)?))
}

async fn list_artworks(State(state): State<AppState>) -> ApiResult<Json<Vec<Artwork>>> {
    Ok(Json(state.store.artworks_desc()?))
}

async fn create_artwork(
    State(state): State<AppState>,
    Json(body): Json<ArtworkIn>,
) -> ApiResult<Json<Artwork>> {
    if body.w <= 0 || body.h <= 0 {
        return Err(SentinelError::bad_input("artwork width and height must be positive").into());
    }
    let art = state
        .store
        .create_artwork(&body.name, body.x, body.y, body.w, body.h)?;
    Ok(Json(art))
}

async fn create_from_corners(
    State(state): State<AppState>,
    Json(body): Json<CornersIn>,
) -> ApiResult<Json<Artwork>> {
    if body.corners.len() != 4 {
        return Err(SentinelError::bad_input("corners must contain exactly 4 points").into());
    }
    let xs: Vec<i64> = body.corners.iter().map(|p| p[0]).collect();
    let ys: Vec<i64> = body.corners.iter().map(|p| p[1]).collect();
    let (min_x, max_x) = (*xs.iter().min().unwrap(), *xs.iter().max().unwrap());
    let (min_y, max_y) = (*ys.iter().min().unwrap(), *ys.iter().max().unwrap());
    let (w, h) = (max_x - min_x + 1, max_y - min_y + 1);

    let art = state.store.create_artwork(&body.name, min_x, min_y, w, h)?;

    // Rasterize the polygon in artwork-local coordinates.
    let corners = [
        (body.corners[0][0] - min_x, body.corners[0][1] - min_y),
        (body.corners[1][0] - min_x, body.corners[1][1] - min_y),
        (body.corners[2][0] - min_x, body.corners[2][1] - min_y),
        (body.corners[3][0] - min_x, body.corners[3][1] - min_y),
    ];
    let mask = Mask::from_quad(w as u32, h as u32, &corners);
    state.store.set_mask(art.id, &mask)?;

    Ok(Json(art))
}

async fn create_place_tl(
    State(state): State<AppState>,
    Json(body): Json<PlaceTlIn>,
) -> ApiResult<Json<Artwork>> {
    let template =
        decode_data_url(&body.data_url).map_err(|e| SentinelError::BadInput(e.to_string()))?;
    let art = state.store.create_artwork(
        &body.name,
        body.tl_x,
        body.tl_y,
        template.width() as i64,
        template.height() as i64,
    )?;
    state.store.set_template(art.id, &template)?;
    Ok(Json(art))
}

async fn remove_artwork(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<OkOut>> {
    if !state.store.delete_artwork(id)? {
        return Err(SentinelError::ArtworkNotFound(id).into());
    }
    Ok(Json(OkOut { ok: true }))
}

async fn upload_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<TemplateIn>,
) -> ApiResult<Json<OkOut>> {
    if state.store.artwork(id)?.is_none() {
        return Err(SentinelError::ArtworkNotFound(id).into());
    }
    let template =
        decode_data_url(&body.data_url).map_err(|e| SentinelError::BadInput(e.to_string()))?;
    state.store.set_template(id, &template)?;
    Ok(Json(OkOut { ok: true }))
}

async fn snapshot_baseline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<OkOut>> {
    let region = capture_region(&state, id).await?;
    state.store.set_baseline(id, &region)?;
    Ok(Json(OkOut { ok: true }))
}

async fn snapshot_ground(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<OkOut>> {
    let region = capture_region(&state, id).await?;
    state.store.set_ground(id, &region)?;
    Ok(Json(OkOut { ok: true }))
}

/// Reads the artwork's canvas region from the frame source.
async fn capture_region(state: &AppState, id: i64) -> Result<crate::raster::Raster, ApiError> {
    let art = state
        .store
        .artwork(id)?
        .ok_or(SentinelError::ArtworkNotFound(id))?;
    let (x, y) = match (u32::try_from(art.x), u32::try_from(art.y)) {
        (Ok(x), Ok(y)) => (x, y),
        _ => return Err(SentinelError::bad_input("artwork origin is off-canvas").into()),
    };
    state
        .frames
        .fetch_region(x, y, art.w.max(0) as u32, art.h.max(0) as u32)
        .await
        .ok_or_else(|| {
            SentinelError::BackendUnavailable("could not capture canvas region".to_string()).into()
        })
}

async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ModeIn>,
) -> ApiResult<Json<OkOut>> {
    let mode = ArtworkMode::parse(&body.mode)
        .ok_or_else(|| SentinelError::bad_input("mode must be 'build' or 'protect'"))?;
    if !state.store.set_mode(id, mode)? {
        return Err(SentinelError::ArtworkNotFound(id).into());
    }
    Ok(Json(OkOut { ok: true }))
}

async fn start_monitor(State(state): State<AppState>) -> Json<MonitorOut> {
    state.sentinel.start();
    Json(MonitorOut { running: true })
}

async fn stop_monitor(State(state): State<AppState>) -> Json<MonitorOut> {
    state.sentinel.stop();
    Json(MonitorOut { running: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ConsoleSink;
    use crate::raster::Raster;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use base64::{engine::general_purpose, Engine as _};
    use image::codecs::png::PngEncoder;
    use image::ImageEncoder;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct StaticFrames(Option<Raster>);

    #[async_trait]
    impl FrameSource for StaticFrames {
        async fn fetch_full(&self) -> Option<Raster> {
            self.0.clone()
        }
    }

    fn app_with_frames(frames: StaticFrames) -> (TempDir, Store, Router) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api.sqlite");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        let frames: Arc<dyn FrameSource> = Arc::new(frames);
        let sentinel = Sentinel::new(store.clone(), frames.clone(), Arc::new(ConsoleSink));
        let router = router(AppState {
            store: store.clone(),
            sentinel,
            frames,
        });
        (dir, store, router)
    }

    fn app() -> (TempDir, Store, Router) {
        app_with_frames(StaticFrames(None))
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let req = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn png_data_url(w: u32, h: u32, px: [u8; 4]) -> String {
        let mut raster = Raster::blank(w, h);
        for y in 0..h {
            for x in 0..w {
                raster.put_pixel(x, y, px);
            }
        }
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(raster.bytes(), w, h, image::ExtendedColorType::Rgba8)
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(buf)
        )
    }

    #[tokio::test]
    async fn healthz_answers() {
        let (_d, _s, router) = app();
        let (status, body) = call(&router, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn artwork_create_list_delete() {
        let (_d, _s, router) = app();

        let (status, first) = call(
            &router,
            Method::POST,
            "/artworks",
            Some(serde_json::json!({"name": "a", "x": 0, "y": 0, "w": 4, "h": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["mode"], "build");

        let (_, second) = call(
            &router,
            Method::POST,
            "/artworks",
            Some(serde_json::json!({"name": "b", "x": 9, "y": 9, "w": 2, "h": 2})),
        )
        .await;

        // Listing is newest-first.
        let (status, list) = call(&router, Method::GET, "/artworks", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["b", "a"]);

        let (status, _) = call(
            &router,
            Method::DELETE,
            &format!("/artworks/{}", second["id"]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &router,
            Method::DELETE,
            &format!("/artworks/{}", second["id"]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn artwork_rejects_empty_geometry() {
        let (_d, _s, router) = app();
        let (status, body) = call(
            &router,
            Method::POST,
            "/artworks",
            Some(serde_json::json!({"name": "a", "x": 0, "y": 0, "w": 0, "h": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("positive"));
    }

    #[tokio::test]
    async fn config_round_trips_with_clamping() {
        let (_d, _s, router) = app();

        let (status, cfg) = call(&router, Method::GET, "/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cfg["tile_w"], 100);

        let mut updated = cfg.clone();
        updated["tile_w"] = serde_json::json!(5);
        updated["tolerance"] = serde_json::json!(12);
        let (status, stored) = call(&router, Method::POST, "/config", Some(updated)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["tile_w"], 10, "clamped on write");
        assert_eq!(stored["tolerance"], 12);

        let (_, read_back) = call(&router, Method::GET, "/config", None).await;
        assert_eq!(read_back, stored);
    }

    #[tokio::test]
    async fn corners_build_bounding_box_and_mask() {
        let (_d, store, router) = app();
        let (status, art) = call(
            &router,
            Method::POST,
            "/artworks/corners",
            Some(serde_json::json!({
                "name": "quad",
                "corners": [[10, 10], [19, 10], [19, 14], [10, 14]]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(art["x"], 10);
        assert_eq!(art["y"], 10);
        assert_eq!(art["w"], 10);
        assert_eq!(art["h"], 5);

        let mask = store.mask(art["id"].as_i64().unwrap()).unwrap().unwrap();
        assert_eq!((mask.width(), mask.height()), (10, 5));
        assert!(mask.contains(4, 2), "interior of the quad is inside");

        let (status, _) = call(
            &router,
            Method::POST,
            "/artworks/corners",
            Some(serde_json::json!({"name": "bad", "corners": [[0, 0], [1, 0], [1, 1]]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn place_tl_adopts_image_size() {
        let (_d, store, router) = app();
        let (status, art) = call(
            &router,
            Method::POST,
            "/artworks/place_tl",
            Some(serde_json::json!({
                "name": "stamp",
                "tl_x": 7,
                "tl_y": 3,
                "data_url": png_data_url(6, 4, [1, 2, 3, 255])
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!((art["x"].as_i64(), art["y"].as_i64()), (Some(7), Some(3)));
        assert_eq!((art["w"].as_i64(), art["h"].as_i64()), (Some(6), Some(4)));

        let tpl = store.template(art["id"].as_i64().unwrap()).unwrap().unwrap();
        assert_eq!((tpl.width(), tpl.height()), (6, 4));

        let (status, _) = call(
            &router,
            Method::POST,
            "/artworks/place_tl",
            Some(serde_json::json!({
                "name": "bad", "tl_x": 0, "tl_y": 0, "data_url": "nonsense"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn template_upload_resizes_artwork() {
        let (_d, store, router) = app();
        let (_, art) = call(
            &router,
            Method::POST,
            "/artworks",
            Some(serde_json::json!({"name": "a", "x": 0, "y": 0, "w": 9, "h": 9})),
        )
        .await;
        let id = art["id"].as_i64().unwrap();

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/artworks/{id}/template"),
            Some(serde_json::json!({"data_url": png_data_url(3, 2, [5, 5, 5, 255])})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let resized = store.artwork(id).unwrap().unwrap();
        assert_eq!((resized.w, resized.h), (3, 2));

        let (status, _) = call(
            &router,
            Method::POST,
            "/artworks/999/template",
            Some(serde_json::json!({"data_url": png_data_url(1, 1, [0, 0, 0, 255])})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn mode_endpoint_validates() {
        let (_d, store, router) = app();
        let art = store.create_artwork("a", 0, 0, 2, 2).unwrap();

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/artworks/{}/mode", art.id),
            Some(serde_json::json!({"mode": "protect"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            store.artwork(art.id).unwrap().unwrap().mode,
            ArtworkMode::Protect
        );

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/artworks/{}/mode", art.id),
            Some(serde_json::json!({"mode": "bogus"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn snapshots_capture_the_artwork_region() {
        let mut frame = Raster::blank(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                frame.put_pixel(x, y, [x as u8, y as u8, 0, 255]);
            }
        }
        let (_d, store, router) = app_with_frames(StaticFrames(Some(frame.clone())));
        let art = store.create_artwork("a", 2, 3, 4, 4).unwrap();

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/artworks/{}/ground_snapshot", art.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ground = store.ground(art.id).unwrap().unwrap();
        assert_eq!(ground, frame.crop(2, 3, 4, 4).unwrap());

        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/artworks/{}/snapshot", art.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(store.baseline(art.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn snapshot_without_frame_is_a_backend_error() {
        let (_d, store, router) = app();
        let art = store.create_artwork("a", 0, 0, 4, 4).unwrap();
        let (status, _) = call(
            &router,
            Method::POST,
            &format!("/artworks/{}/snapshot", art.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = call(&router, Method::POST, "/artworks/999/snapshot", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn monitor_start_stop_toggle_the_flag() {
        let (_d, store, router) = app();
        let _ = store;

        let (status, body) = call(&router, Method::POST, "/monitor/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], true);

        // Idempotent: a second start is a no-op.
        let (_, body) = call(&router, Method::POST, "/monitor/start", None).await;
        assert_eq!(body["running"], true);

        let (_, body) = call(&router, Method::POST, "/monitor/stop", None).await;
        assert_eq!(body["running"], false);
    }
}
