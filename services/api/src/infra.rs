use captureget::identity::TokenKeys;
use captureget::pipeline::{
    pipeline_router, BlobStore, DiskBlobStore, PipelineService, PipelineSettings, PipelineState,
    PipelineStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) uploads: Arc<DiskBlobStore>,
}

/// Wire a store and blob store into the pipeline routes.
pub(crate) fn pipeline_routes<S, B>(
    store: Arc<S>,
    blobs: Arc<B>,
    tokens: TokenKeys,
    settings: PipelineSettings,
) -> axum::Router
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let service = Arc::new(PipelineService::new(store, blobs, settings));
    pipeline_router(PipelineState { service, tokens })
}
