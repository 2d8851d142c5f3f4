//! HTTP backend exposing attention extraction as `POST /process` plus a
//! `GET /health` probe.
//!
//! Backends are loaded lazily per model id and cached for the lifetime of
//! the process. The forward pass is CPU/GPU-bound and can take seconds, so
//! it always runs on the blocking pool; once started it runs to completion
//! even if the caller has gone away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{error, info};

use crate::catalog::Catalog;
use crate::extractor::{ExtractError, Extractor};
use crate::wire::{HealthResponse, ProcessRequest, ProcessResponse};

/// Server address configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Clone)]
struct AppState {
    catalog: Arc<Catalog>,
    extractors: Arc<Mutex<HashMap<String, Arc<Extractor>>>>,
}

/// Build the service router (exposed separately for tests)
pub fn create_app(catalog: Catalog) -> Router {
    let state = AppState {
        catalog: Arc::new(catalog),
        extractors: Arc::new(Mutex::new(HashMap::new())),
    };
    Router::new()
        .route("/process", post(process_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the service until the process is terminated
pub async fn run(config: ServiceConfig, catalog: Catalog) -> Result<()> {
    let app = create_app(catalog);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// `"ok"` once at least one model is resident, `"loading"` before that.
/// Models load lazily on first `/process`, so a fresh server reports
/// `"loading"` and dashboards fall back to sample data until then.
fn health_status(any_loaded: bool) -> &'static str {
    if any_loaded {
        "ok"
    } else {
        "loading"
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let any_loaded = !state
        .extractors
        .lock()
        .expect("extractor cache poisoned")
        .is_empty();
    Json(HealthResponse {
        status: health_status(any_loaded).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn process_handler(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, (StatusCode, String)> {
    let model_info = state
        .catalog
        .get(&request.model_name)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("unknown model '{}'", request.model_name),
            )
        })?
        .clone();

    let extractor = get_or_load(&state, &request.model_name).await?;

    let text = request.text.clone();
    let extraction = tokio::task::spawn_blocking(move || extractor.extract(&text))
        .await
        .map_err(|err| {
            error!("Extraction task panicked: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "extraction task failed".to_string(),
            )
        })?;
    let (tokens, tensor) = extraction.map_err(map_extract_error)?;

    let head_types = state.catalog.head_types(&request.model_name);
    let response = ProcessResponse::from_extraction(
        model_info.summary(),
        tokens,
        &tensor,
        Some(&head_types),
    );

    info!(
        "Processed {} tokens for {} ({} patterns)",
        response.num_tokens,
        response.model_name,
        response.attention_patterns.len()
    );
    Ok(Json(response))
}

/// Fetch the cached extractor for a model, loading it on first use
async fn get_or_load(
    state: &AppState,
    model_id: &str,
) -> Result<Arc<Extractor>, (StatusCode, String)> {
    {
        let extractors = state.extractors.lock().expect("extractor cache poisoned");
        if let Some(extractor) = extractors.get(model_id) {
            return Ok(Arc::clone(extractor));
        }
    }

    info!("Loading model '{model_id}' on first use");
    let catalog = Arc::clone(&state.catalog);
    let id = model_id.to_string();
    let extractor = tokio::task::spawn_blocking(move || Extractor::load(&catalog, &id))
        .await
        .map_err(|err| {
            error!("Model load task panicked: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "model load task failed".to_string(),
            )
        })?
        .map_err(map_extract_error)?;

    let extractor = Arc::new(extractor);
    let mut extractors = state.extractors.lock().expect("extractor cache poisoned");
    extractors
        .entry(model_id.to_string())
        .or_insert_with(|| Arc::clone(&extractor));
    Ok(extractor)
}

/// Bad input is the caller's problem; execution failures are ours
fn map_extract_error(err: ExtractError) -> (StatusCode, String) {
    let status = match err {
        ExtractError::UnknownModel(_) | ExtractError::EmptyInput => StatusCode::BAD_REQUEST,
        ExtractError::ModelExecution(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_tracks_loaded_models() {
        assert_eq!(health_status(false), "loading");
        assert_eq!(health_status(true), "ok");
    }

    #[test]
    fn test_error_mapping() {
        let (status, message) = map_extract_error(ExtractError::EmptyInput);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "input text is empty");

        let (status, _) = map_extract_error(ExtractError::UnknownModel("x".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            map_extract_error(ExtractError::ModelExecution(anyhow::anyhow!("oom")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
