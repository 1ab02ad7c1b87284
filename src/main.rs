mod config;
mod engine;
mod image_utils;
mod page;
mod report;
mod types;
mod vit_engine;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::Config;
use engine::Engine;
use image_utils::{DecodedImage, ImageError, decode_upload, to_data_url};
use page::{Analysis, AnalysisResult, ModelStatus, PageView, render_page};
use report::Report;
use types::{ClassificationResponse, ErrorResponse, HealthResponse};
use vit_engine::{VitConfig, VitEngine};

/// Room for multipart boundaries and headers on top of the image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pneumoscope=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!("Starting pneumoscope with config: {:?}", config);

    let vit_config = VitConfig {
        model_id: config.model_id.clone(),
        model_path: config.model_path.clone(),
        revision: config.model_revision.clone(),
        use_pth: config.use_pth,
        cpu: config.cpu_only,
        id2label: config.parse_id2label(),
    };

    tracing::info!("Loading model (first time may take a minute)...");
    let model = match VitEngine::new(vit_config).await {
        Ok(engine) => {
            tracing::info!(model = engine.model_name(), "Model loaded successfully");
            ModelHandle::Ready(Arc::new(engine))
        }
        Err(e) => {
            // Keep serving so the page can report the failure.
            tracing::error!(error = %format!("{e:#}"), "Failed to load model, uploads disabled");
            ModelHandle::Failed {
                model: config
                    .model_path
                    .as_ref()
                    .map_or_else(|| config.model_id.clone(), |p| p.display().to_string()),
                error: format!("{e:#}"),
            }
        }
    };

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = router(AppState::new(model, config.max_upload_bytes))
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer);

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}

/// The pipeline handle, resolved once at startup and shared by every request.
enum ModelHandle {
    Ready(Arc<dyn Engine + Send + Sync>),
    Failed { model: String, error: String },
}

impl ModelHandle {
    fn status(&self) -> ModelStatus<'_> {
        match self {
            ModelHandle::Ready(engine) => ModelStatus::Ready {
                model: engine.model_name(),
            },
            ModelHandle::Failed { error, .. } => ModelStatus::Failed { error },
        }
    }
}

#[derive(Clone)]
struct AppState {
    model: Arc<ModelHandle>,
    max_upload_bytes: usize,
}

impl AppState {
    fn new(model: ModelHandle, max_upload_bytes: usize) -> Self {
        Self {
            model: Arc::new(model),
            max_upload_bytes,
        }
    }
}

fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/", get(index_handler))
        .route("/predict", post(predict_handler))
        .route("/v1/classify", post(classify_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
enum UploadError {
    #[error("Invalid upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("No file was uploaded, expected a form field named \"file\"")]
    MissingFile,

    #[error(transparent)]
    Image(#[from] ImageError),
}

impl UploadError {
    fn status(&self) -> StatusCode {
        match self {
            UploadError::Multipart(e) => e.status(),
            UploadError::Image(ImageError::TooLarge(..)) => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::MissingFile | UploadError::Image(_) => StatusCode::BAD_REQUEST,
        }
    }
}

async fn read_upload(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> Result<DecodedImage, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let bytes = field.bytes().await?;
            let decoded = decode_upload(&bytes, max_upload_bytes)?;
            tracing::debug!(
                format = ?decoded.format,
                original_color = ?decoded.original_color,
                size_bytes = decoded.size_bytes,
                "Upload decoded"
            );
            return Ok(decoded);
        }
    }
    Err(UploadError::MissingFile)
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(render_page(&PageView {
        model: state.model.status(),
        analysis: None,
    }))
}

#[tracing::instrument(skip_all)]
async fn predict_handler(State(state): State<AppState>, multipart: Multipart) -> Html<String> {
    let analysis = match state.model.as_ref() {
        ModelHandle::Ready(engine) => {
            Some(analyze_upload(engine.as_ref(), multipart, state.max_upload_bytes).await)
        }
        ModelHandle::Failed { .. } => {
            tracing::warn!("Upload received while the model is unavailable");
            None
        }
    };

    Html(render_page(&PageView {
        model: state.model.status(),
        analysis,
    }))
}

async fn analyze_upload(
    engine: &(dyn Engine + Send + Sync),
    multipart: Multipart,
    max_upload_bytes: usize,
) -> Analysis {
    let decoded = match read_upload(multipart, max_upload_bytes).await {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected upload");
            return Analysis {
                image_url: None,
                result: AnalysisResult::InvalidUpload(e.to_string()),
            };
        }
    };

    let image_url = match to_data_url(&decoded.image) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(error = %e, "Could not prepare upload for display");
            None
        }
    };

    let result = match engine.classify(decoded.image).await {
        Ok(predictions) => match Report::from_predictions(&predictions) {
            Some(report) => {
                counter!("predictions_total", "outcome" => report.outcome.as_str()).increment(1);
                tracing::info!(label = %report.label, confidence = %report.confidence, "Prediction completed");
                AnalysisResult::Report(report)
            }
            None => {
                tracing::warn!("Model returned no predictions");
                AnalysisResult::NoResults
            }
        },
        Err(e) => {
            counter!("prediction_failures_total").increment(1);
            tracing::error!(error = %e, "Prediction failed");
            AnalysisResult::Error(e.to_string())
        }
    };

    Analysis { image_url, result }
}

#[derive(Debug, Error)]
enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Model is not available: {0}")]
    ModelUnavailable(String),

    #[error("Error during prediction: {0}")]
    Prediction(anyhow::Error),

    #[error("Could not get prediction results.")]
    EmptyPrediction,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Upload(e) => e.status(),
            ApiError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Prediction(_) | ApiError::EmptyPrediction => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[tracing::instrument(skip_all)]
async fn classify_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ClassificationResponse>, ApiError> {
    let engine = match state.model.as_ref() {
        ModelHandle::Ready(engine) => engine.clone(),
        ModelHandle::Failed { error, .. } => {
            return Err(ApiError::ModelUnavailable(error.clone()));
        }
    };

    let decoded = read_upload(multipart, state.max_upload_bytes).await?;
    let predictions = engine.classify(decoded.image).await.map_err(|e| {
        counter!("prediction_failures_total").increment(1);
        tracing::error!(error = %e, "Prediction failed");
        ApiError::Prediction(e)
    })?;
    let report = Report::from_predictions(&predictions).ok_or(ApiError::EmptyPrediction)?;
    counter!("predictions_total", "outcome" => report.outcome.as_str()).increment(1);

    Ok(Json(ClassificationResponse {
        id: format!("classify-{}", uuid::Uuid::new_v4().simple()),
        object: "classification".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: engine.model_name().to_string(),
        outcome: report.outcome.as_str().to_string(),
        confidence: report.confidence,
        predictions,
    }))
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.model.as_ref() {
        ModelHandle::Ready(engine) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                model: engine.model_name().to_string(),
                error: None,
            }),
        ),
        ModelHandle::Failed { model, error } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "model_unavailable".to_string(),
                model: model.clone(),
                error: Some(error.clone()),
            }),
        ),
    }
}
