use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};
use clap::Parser;
use env_logger::TimestampPrecision;
use snap_core::config::AppConfig;
use snap_core::nn::OnnxClassifier;

mod endpoints;

use endpoints::AppState;

#[derive(Parser)]
#[command(name = "snapclass", about = "On-demand webcam snapshot classification")]
struct Opts {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "snapclass.toml")]
    config: PathBuf,

    /// Port on which to serve
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Bind to all IP addresses
    #[arg(short, long)]
    bindall: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let opts = Opts::parse();
    let config = AppConfig::from_file(&opts.config)?;

    let state = Arc::new(AppState::new(config));
    state.events.append("application started");
    state.events.append(format!(
        "{} classes configured, decision threshold {}",
        state.config.class_names.len(),
        state.config.confidence_threshold
    ));

    spawn_model_load(Arc::clone(&state));

    let app = Router::new()
        .route("/", get(endpoints::index))
        .route("/healthcheck", get(endpoints::healthcheck))
        .route("/video", get(endpoints::video_stream))
        .route("/camera/start", post(endpoints::start_camera))
        .route("/camera/switch", post(endpoints::switch_camera))
        .route("/predict", post(endpoints::predict))
        .route("/log", get(endpoints::event_log))
        .layer(Extension(Arc::clone(&state)));

    let bind_ip = match opts.bindall {
        true => [0, 0, 0, 0],
        false => [127, 0, 0, 1],
    };
    let addr = SocketAddr::from((bind_ip, opts.port));
    log::info!("serving on http://{addr}");
    state
        .events
        .append("start the camera, then press predict");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    // Teardown releases the camera tracks, same as switching away would.
    state.camera.lock().await.stop();
    state.events.append("camera released, shutting down");

    Ok(())
}

/// Load the model once in the background. A failure leaves the application
/// in a "no model" state; predictions refuse until the process is restarted
/// with a working URL.
fn spawn_model_load(state: Arc<AppState>) {
    tokio::spawn(async move {
        let url = state.config.model_url.clone();
        state.events.append(format!("loading model from {url}"));

        let load = OnnxClassifier::load(&url, state.config.image_size);
        match tokio::time::timeout(state.config.model_load_timeout(), load).await {
            Ok(Ok(model)) => {
                *state.model.write().unwrap() = Some(Arc::new(model));
                state.events.append("model loaded");
            }
            Ok(Err(err)) => {
                state.events.append(format!("model load failed: {err}"));
                state.events.append(format!("check the model URL: {url}"));
            }
            Err(_) => {
                state.events.append("model load timed out");
            }
        }
    });
}
