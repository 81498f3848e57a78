use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use pulsar_search::counter_store::{sanitize_target_id, DetectionCounterStore};
use pulsar_search::logging::{emit_log, Level};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::services::{ServeDir, ServeFile};

type SharedStore = Arc<Mutex<DetectionCounterStore>>;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[tokio::main]
async fn main() {
    let port = parse_port(std::env::var("PORT").ok().as_deref());

    let detection_path = std::env::var("DETECTION_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data/detections.json"));
    emit_log(
        Level::Info,
        "server",
        "store_opened",
        json!({ "path": detection_path.to_string_lossy() }),
    );

    let state: SharedStore = Arc::new(Mutex::new(DetectionCounterStore::new(detection_path)));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/detections", get(list_detections))
        .route(
            "/api/detections/{target_id}",
            get(get_detection).post(record_detection),
        )
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        emit_log(
            Level::Info,
            "server",
            "static_root",
            json!({ "path": static_dir.to_string_lossy() }),
        );
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        emit_log(Level::Info, "server", "static_root_missing", json!({}));
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            emit_log(
                Level::Error,
                "server",
                "bind_failed",
                json!({ "addr": bind_addr, "error": error.to_string() }),
            );
            std::process::exit(1);
        }
    };

    emit_log(Level::Info, "server", "listening", json!({ "port": port }));
    if let Err(error) = axum::serve(listener, app).await {
        emit_log(
            Level::Error,
            "server",
            "runtime_failed",
            json!({ "error": error.to_string() }),
        );
        std::process::exit(1);
    }
}

fn parse_port(raw: Option<&str>) -> u16 {
    raw.and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(8080)
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("dist"), PathBuf::from("public")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn list_detections(State(state): State<SharedStore>) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(guard.build_response())
}

async fn get_detection(
    State(state): State<SharedStore>,
    Path(target_id): Path<String>,
) -> ApiResult {
    let guard = state.lock().await;
    count_reply(&guard, &target_id)
}

async fn record_detection(
    State(state): State<SharedStore>,
    Path(target_id): Path<String>,
) -> ApiResult {
    let mut guard = state.lock().await;
    let reply = record_reply(&mut guard, &target_id);
    if let Ok(Json(body)) = &reply {
        emit_log(Level::Debug, "server", "detection_recorded", body.clone());
    }
    reply
}

fn count_reply(store: &DetectionCounterStore, raw_id: &str) -> ApiResult {
    let target_id = sanitize_target_id(raw_id).ok_or_else(invalid_target)?;
    Ok(Json(json!({
        "targetId": target_id,
        "count": store.count(&target_id),
    })))
}

fn record_reply(store: &mut DetectionCounterStore, raw_id: &str) -> ApiResult {
    let target_id = sanitize_target_id(raw_id).ok_or_else(invalid_target)?;
    let rank = store.record(&target_id).ok_or_else(invalid_target)?;
    Ok(Json(json!({ "targetId": target_id, "rank": rank })))
}

fn invalid_target() -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid target id" })),
    )
}
