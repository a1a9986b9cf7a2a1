//! UI adapter: axum handlers around the core pipeline.
//!
//! The page itself is a thin client; every command button posts to one of
//! the handlers here, and all state lives in [`AppState`]. Errors never
//! escape a handler: each path logs a readable line to the event log and
//! answers with JSON the page can render.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::body::StreamBody;
use axum::extract::Query;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::{Extension, Json};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use snap_core::config::AppConfig;
use snap_core::events::EventLog;
use snap_core::nn::{InferModel, OnnxClassifier};
use snap_core::pipeline::{self, Outcome, Prediction, Refusal};
use snap_core::render::{bar_width_percent, confidence_percent, result_log_line, ConfidenceBand};
use snap_core::sensors::{CameraManager, CameraSession, Facing, FrameSource};

/// Process-wide application state. Single owner per field: the camera
/// manager behind one lock, the model slot written once by the load task,
/// the busy flag serializing predictions.
pub struct AppState {
    pub config: AppConfig,
    pub events: EventLog,
    pub camera: tokio::sync::Mutex<CameraManager>,
    pub model: RwLock<Option<Arc<OnnxClassifier>>>,
    busy: AtomicBool,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            events: EventLog::new(),
            camera: tokio::sync::Mutex::new(CameraManager::new()),
            model: RwLock::new(None),
            busy: AtomicBool::new(false),
        }
    }

    /// Claim the single prediction slot. Fails while another prediction
    /// holds it.
    fn begin_predict(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn end_predict(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

pub async fn healthcheck() -> &'static str {
    "Healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    #[serde(default)]
    since: usize,
}

pub async fn event_log(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<LogParams>,
) -> Json<Value> {
    let (next, entries) = state.events.entries_since(params.since);
    Json(json!({ "next": next, "entries": entries }))
}

pub async fn start_camera(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let facing = state.config.start_facing;
    Json(start_with(&state, facing).await)
}

pub async fn switch_camera(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let current = state.camera.lock().await.current_facing();
    match current {
        Some(facing) => Json(start_with(&state, facing.toggled()).await),
        None => {
            let refusal = Refusal::CameraNotStarted;
            state.events.append(refusal.message());
            Json(refusal_json(refusal))
        }
    }
}

async fn start_with(state: &AppState, facing: Facing) -> Value {
    state
        .events
        .append(format!("starting camera ({})", facing.label()));

    // Release the previous session before the new device is opened, so the
    // hardware is never held twice.
    state.camera.lock().await.stop();

    match open_session(state, facing).await {
        Ok(session) => {
            let (width, height) = session.resolution();
            state.camera.lock().await.install(session);
            state.events.append(format!(
                "camera started ({}) at {width}x{height}",
                facing.label()
            ));
            json!({ "ok": true, "facing": facing.label() })
        }
        Err(message) => {
            state
                .events
                .append(format!("camera start failed: {message}"));
            json!({ "ok": false, "error": message })
        }
    }
}

/// Open the device on the blocking pool, bounded by the configured timeout.
async fn open_session(state: &AppState, facing: Facing) -> Result<CameraSession, String> {
    let device = state.config.device_for(facing).to_owned();
    let image_size = state.config.image_size;
    let frame_rate = state.config.frame_rate;

    let open = tokio::task::spawn_blocking(move || {
        CameraSession::open(&device, facing, image_size, frame_rate)
    });

    match tokio::time::timeout(state.config.camera_start_timeout(), open).await {
        Err(_) => Err("timed out waiting for the camera".to_owned()),
        Ok(Err(join_err)) => Err(format!("camera task failed: {join_err}")),
        Ok(Ok(Err(camera_err))) => Err(camera_err.to_string()),
        Ok(Ok(Ok(session))) => Ok(session),
    }
}

pub async fn predict(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    if !state.begin_predict() {
        let refusal = Refusal::Busy;
        state.events.append(refusal.message());
        return Json(refusal_json(refusal));
    }

    let response = run_predict(&state).await;
    state.end_predict();
    Json(response)
}

/// Capture and inference are blocking work, so they run on the blocking
/// pool like `open_session` does. The camera lock is taken there and held
/// only for the duration of the pipeline call.
async fn run_predict(state: &Arc<AppState>) -> Value {
    state.events.append("predict requested");

    let worker = {
        let state = Arc::clone(state);
        tokio::task::spawn_blocking(move || {
            let camera = state.camera.blocking_lock();
            let model = state.model.read().unwrap().clone();

            pipeline::predict_once(
                camera.session().map(|s| s as &dyn FrameSource),
                model.as_deref().map(|m| m as &dyn InferModel),
                &state.config.class_names,
                state.config.confidence_threshold,
                state.config.image_size,
            )
        })
    };

    let outcome = match worker.await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            let message = format!("prediction task failed: {join_err}");
            state.events.append(message.clone());
            return json!({ "ok": false, "error": message });
        }
    };

    match outcome {
        Ok(Outcome::Predicted(prediction)) => {
            state.events.append(result_log_line(&prediction));
            prediction_json(&prediction)
        }
        Ok(Outcome::Refused(refusal)) => {
            state.events.append(refusal.message());
            refusal_json(refusal)
        }
        Err(err) => {
            state.events.append(format!("prediction error: {err:#}"));
            json!({ "ok": false, "error": format!("{err:#}") })
        }
    }
}

fn prediction_json(prediction: &Prediction) -> Value {
    let band = ConfidenceBand::from_confidence(prediction.confidence);
    json!({
        "ok": true,
        "prediction": prediction,
        "confidence_percent": confidence_percent(prediction.confidence),
        "bar_width": bar_width_percent(prediction.confidence),
        "band_color": band.color(),
    })
}

fn refusal_json(refusal: Refusal) -> Value {
    json!({ "ok": false, "refusal": refusal.message() })
}

fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

/// Live view: raw MJPG frames from the active session as a
/// `multipart/x-mixed-replace` stream. Idles while no camera is active.
pub async fn video_stream(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let stream = async_stream::stream! {
        loop {
            let chunk = {
                let camera = state.camera.lock().await;
                camera.session().and_then(|session| match session.capture_jpeg() {
                    Ok(frame) => Some(as_jpeg_stream_item(&frame[..])),
                    Err(err) => {
                        log::warn!("live view capture failed: {err}");
                        None
                    }
                })
            };
            match chunk {
                Some(bytes) => yield Ok::<_, std::convert::Infallible>(bytes),
                None => tokio::time::sleep(Duration::from_millis(200)).await,
            }
        }
    };

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        StreamBody::new(stream),
    )
}


const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>snapclass</title>
<style>
  body { font-family: sans-serif; max-width: 640px; margin: 2em auto; }
  img#live { width: 100%; background: #222; min-height: 240px; }
  button { font-size: 1em; padding: 0.5em 1em; margin-right: 0.5em; }
  #result { font-size: 1.6em; margin: 0.4em 0; min-height: 1.2em; }
  #bar-track { background: #eee; height: 1.2em; border-radius: 4px; }
  #bar-fill { background: #28a745; height: 100%; width: 0; border-radius: 4px; }
  #confidence { font-weight: bold; }
  #log { background: #111; color: #ddd; font-family: monospace; font-size: 0.8em;
         height: 12em; overflow-y: scroll; padding: 0.5em; margin-top: 1em; }
</style>
</head>
<body>
<h3>snapclass</h3>
<img id="live" src="/video" alt="live view">
<p>
  <button id="start-camera">Start camera</button>
  <button id="switch-camera">Switch camera</button>
  <button id="predict">Predict</button>
</p>
<div id="result">-</div>
<div id="bar-track"><div id="bar-fill"></div></div>
<div id="confidence">-</div>
<div id="log"></div>
<script>
async function post(url) {
  const resp = await fetch(url, { method: "POST" });
  return resp.json();
}

function showPrediction(data) {
  const result = document.getElementById("result");
  const fill = document.getElementById("bar-fill");
  const confidence = document.getElementById("confidence");
  if (data.ok) {
    const p = data.prediction;
    result.textContent = p.decided ? p.label : p.label + " (undecided)";
    confidence.textContent = data.confidence_percent;
    confidence.style.color = data.band_color;
    fill.style.width = data.bar_width + "%";
    fill.style.background = data.band_color;
  } else {
    result.textContent = data.refusal || data.error || "error";
    confidence.textContent = "-";
    fill.style.width = "0";
  }
}

document.getElementById("start-camera").onclick = () => post("/camera/start");
document.getElementById("switch-camera").onclick = () => post("/camera/switch");
document.getElementById("predict").onclick = async () => {
  showPrediction(await post("/predict"));
};

let cursor = 0;
setInterval(async () => {
  const resp = await fetch("/log?since=" + cursor);
  const data = await resp.json();
  cursor = data.next;
  const panel = document.getElementById("log");
  for (const entry of data.entries) {
    const line = document.createElement("div");
    line.textContent = "[" + entry.timestamp + "] " + entry.message;
    panel.appendChild(line);
  }
  if (data.entries.length > 0) panel.scrollTop = panel.scrollHeight;
}, 1000);
</script>
</body>
</html>
"#;
