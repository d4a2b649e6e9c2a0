use crate::cli::ServeArgs;
use crate::infra::{pipeline_routes, AppState};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use captureget::config::AppConfig;
use captureget::error::AppError;
use captureget::identity::TokenKeys;
use captureget::pipeline::{DiskBlobStore, PipelineSettings};
use captureget::storage::{MemoryStore, SqliteStore};
use captureget::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let blobs = Arc::new(DiskBlobStore::new(
        config.storage.upload_dir.clone(),
        config.storage.upload_base_url.clone(),
    ));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        uploads: Arc::clone(&blobs),
    };

    let tokens = TokenKeys::new(&config.auth.jwt_secret);
    let settings = PipelineSettings {
        max_upload_bytes: config.storage.max_upload_bytes,
    };
    let pipeline = match &config.storage.database_path {
        Some(path) => {
            let store = SqliteStore::open(path)?;
            info!(path = %path.display(), "using sqlite store");
            pipeline_routes(Arc::new(store), blobs, tokens, settings)
        }
        None => {
            warn!("APP_DATABASE_PATH is unset; records are kept in memory and lost on restart");
            pipeline_routes(Arc::new(MemoryStore::new()), blobs, tokens, settings)
        }
    };

    let app = with_service_routes(pipeline)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "captureget pipeline ready");

    axum::serve(listener, app).await?;
    Ok(())
}
