//! Defect Triage Server
//!
//! HTTP front end for a trained classifier: upload an image, get the predicted
//! defect label, its confidence and the remediation checklist for it.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use defect_triage::backend::{dispatch, BackendTask, ComputeDevice};
use defect_triage::training::checkpoint_file;
use defect_triage::utils::logging::{init_logging, LogConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::{AppState, ServerConfig, SharedState};

/// Uploads larger than this are rejected before decoding
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Defect Triage Server
#[derive(Parser, Debug)]
#[command(name = "defect-triage-server")]
#[command(version)]
#[command(about = "HTTP API for the defect triage classifier")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "TRIAGE_PORT", default_value = "8000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "TRIAGE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Best checkpoint written by `defect_triage train`
    #[arg(long, env = "TRIAGE_WEIGHTS", default_value = "weights/best.mpk")]
    weights: PathBuf,

    /// Class list written next to the checkpoint
    #[arg(long, env = "TRIAGE_CLASSES", default_value = "weights/classes.json")]
    classes: PathBuf,

    /// Label to checklist mapping, re-read on every prediction
    #[arg(long, env = "TRIAGE_PROCEDURES", default_value = "server/procedures.json")]
    procedures: PathBuf,

    /// Directory holding index.html and its assets
    #[arg(long, env = "TRIAGE_STATIC_DIR", default_value = "server/static")]
    static_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

/// Routes, static files and middleware around `state`
pub fn build_router<B: Backend>(state: SharedState<B>) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(routes::index::index::<B>))
        .route("/health", get(routes::health::health_check::<B>))
        .route("/predict", post(routes::predict::predict::<B>))
        .nest_service("/static", static_files)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

struct ServeTask {
    addr: SocketAddr,
    config: ServerConfig,
}

impl BackendTask for ServeTask {
    type Output = anyhow::Result<()>;

    fn run<B: AutodiffBackend>(self, device: B::Device, compute: ComputeDevice) -> Self::Output {
        let state = Arc::new(AppState::<B::InnerBackend>::new(
            self.config,
            device,
            compute.to_string(),
        ));
        let app = build_router(state);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the async runtime")?;

        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind(self.addr)
                .await
                .with_context(|| format!("cannot bind {}", self.addr))?;
            info!("Listening on http://{}", self.addr);
            axum::serve(listener, app).await?;
            Ok::<(), anyhow::Error>(())
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::from_verbose_flag(cli.verbose));

    let config = ServerConfig {
        weights: cli.weights,
        classes: cli.classes,
        procedures: cli.procedures,
        static_dir: cli.static_dir,
    };

    info!("Defect Triage Server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Weights:    {:?}", config.weights);
    info!("  Classes:    {:?}", config.classes);
    info!("  Procedures: {:?}", config.procedures);
    info!("  Static dir: {:?}", config.static_dir);

    if !checkpoint_file(&config.weights).is_file() {
        warn!(
            "No checkpoint at {:?} yet; /predict will fail until one is trained",
            config.weights
        );
    }

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .context("invalid host or port")?;

    dispatch(ServeTask { addr, config })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::Path;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use defect_triage::backend::CpuBackend;
    use defect_triage::model::PreprocessSource;
    use defect_triage::training::{save_checkpoint, CheckpointMetadata};
    use defect_triage::utils::save_class_names;
    use defect_triage::{Backbone, ImageClassifierConfig};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    const BOUNDARY: &str = "triage-test-boundary";

    fn config_in(dir: &Path) -> ServerConfig {
        ServerConfig {
            weights: dir.join("best.mpk"),
            classes: dir.join("classes.json"),
            procedures: dir.join("procedures.json"),
            static_dir: dir.join("static"),
        }
    }

    fn app(dir: &Path) -> (Router, SharedState<CpuBackend>) {
        let state = Arc::new(AppState::<CpuBackend>::new(
            config_in(dir),
            Default::default(),
            ComputeDevice::Cpu.to_string(),
        ));
        (build_router(state.clone()), state)
    }

    fn write_model(dir: &Path, classes: &[&str]) {
        let names: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        let model = ImageClassifierConfig::new(Backbone::default(), names.len())
            .init::<CpuBackend>(&Default::default())
            .unwrap();
        let metadata = CheckpointMetadata::new(
            Backbone::default(),
            PreprocessSource::Plain { image_size: 32 },
            names.len(),
            1,
            0.0,
        );
        save_checkpoint(&dir.join("best.mpk"), &model, &metadata).unwrap();
        save_class_names(&dir.join("classes.json"), &names).unwrap();
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(16, 16, image::Rgb([120, 60, 20])))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn upload(content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"part.png\"\r\nContent-Type: {ct}\r\n\r\n",
                b = BOUNDARY,
                ct = content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_before_any_prediction() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(dir.path());

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model_loaded"], false);
        assert_eq!(body["backend"], "NdArray (CPU)");
    }

    #[tokio::test]
    async fn test_non_image_rejected_before_model_load() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), &["crack", "rust"]);
        let (app, state) = app(dir.path());

        let response = app.oneshot(upload("text/plain", b"hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!state.model.is_loaded());
    }

    #[tokio::test]
    async fn test_missing_model_is_server_error() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(dir.path());

        let response = app.oneshot(upload("image/png", &png())).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(response).await;
        assert!(body["detail"].as_str().unwrap().starts_with("Model not available"));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_client_error() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), &["crack", "rust"]);
        let (app, _) = app(dir.path());

        let response = app
            .oneshot(upload("image/png", b"not really a png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_prediction_with_steps() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), &["crack", "rust"]);
        std::fs::write(
            dir.path().join("procedures.json"),
            r#"{"crack": ["Tag for scrap"], "rust": ["Wire-brush", "Prime"]}"#,
        )
        .unwrap();
        let (app, state) = app(dir.path());

        let response = app.oneshot(upload("image/png", &png())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.model.is_loaded());

        let body = json(response).await;
        let label = body["label"].as_str().unwrap();
        let confidence = body["confidence"].as_f64().unwrap();
        assert!(label == "crack" || label == "rust");
        assert!((0.0..=1.0).contains(&confidence));
        assert_eq!(confidence, (confidence * 1e4).round() / 1e4);

        let expected = if label == "crack" { 1 } else { 2 };
        assert_eq!(body["steps"].as_array().unwrap().len(), expected);
    }

    #[tokio::test]
    async fn test_label_without_procedures_has_no_steps() {
        let dir = TempDir::new().unwrap();
        write_model(dir.path(), &["crack", "rust"]);
        std::fs::write(dir.path().join("procedures.json"), "{}").unwrap();
        let (app, _) = app(dir.path());

        let response = app.oneshot(upload("image/jpeg", &png())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["steps"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_index_served_from_static_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("static")).unwrap();
        std::fs::write(dir.path().join("static/index.html"), "<h1>triage</h1>").unwrap();
        let (app, _) = app(dir.path());

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"<h1>triage</h1>");
    }
}
