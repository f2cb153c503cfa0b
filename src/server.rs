//! HTTP surface for the capture UI.
//!
//! The browser-based capture dialog is an external collaborator: it supplies
//! captured image bytes, summary text, and the storage bearer token, and
//! renders whatever this API returns. Every response body is JSON; error
//! responses carry `{ "error": "<message>" }` with a 4xx/5xx status.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/active-subfolders` | Active destination folders + fallback |
//! | `GET`  | `/issuer-canons` | Canonical issuer master/alias pairs |
//! | `POST` | `/summarize` | Model summary for uploaded images |
//! | `POST` | `/save-set` | Persist a document bundle |
//! | `POST` | `/update-canon` | Compute (and optionally persist) a canonical alias update |
//! | `POST` | `/refresh-manifest` | Rebuild every subfolder manifest |
//! | `POST` | `/sources/invalidate` | Drop cached configuration sources |
//!
//! # Authentication
//!
//! Storage-touching endpoints read the bearer token from the inbound
//! `Authorization` header and fail with 401 when it is absent. The token is
//! request-scoped; nothing here stores or refreshes it.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted: the collaborator UI is
//! browser-based and may be served from a different origin.

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::canon::{self, CanonProposal};
use crate::completion::{
    data_uri, CompletionBackend, CompletionRequest, OpenAiBackend, UserPart,
};
use crate::config::Config;
use crate::drive::DriveClient;
use crate::manifest::ManifestStore;
use crate::models::{CapturedImage, IssuerCanonEntry};
use crate::persister::{save_bundle, BundleRequest};
use crate::refresh::refresh_manifests;
use crate::sources::{substitute, ActiveSubfolderList, PromptTemplate, SourceCache};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    cache: Arc<SourceCache>,
    store: Arc<ManifestStore>,
    backend: Arc<dyn CompletionBackend>,
}

/// Start the HTTP server and run until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let cache_ttl = Duration::from_secs(config.sources.cache_ttl_secs);

    let state = AppState {
        backend: Arc::new(OpenAiBackend::new(config.completion.clone())),
        cache: Arc::new(SourceCache::new(cache_ttl)),
        store: Arc::new(ManifestStore::new()),
        config: Arc::new(config.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/active-subfolders", get(handle_active_subfolders))
        .route("/issuer-canons", get(handle_issuer_canons))
        .route("/summarize", post(handle_summarize))
        .route("/save-set", post(handle_save_set))
        .route("/update-canon", post(handle_update_canon))
        .route("/refresh-manifest", post(handle_refresh_manifest))
        .route("/sources/invalidate", post(handle_invalidate_sources))
        .layer(cors)
        .with_state(state);

    println!("docvault server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error body: `{ "error": "<message>" }`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// 400: request validation failed; no network call was attempted.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

/// 401: no usable bearer token on the request.
fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        message: message.into(),
    }
}

/// 500: configuration or upstream failure.
fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: err.to_string(),
    }
}

/// Extract the storage bearer token from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("Missing storage access token"))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.to_string()),
        _ => Err(unauthorized("Missing storage access token")),
    }
}

fn drive_client(headers: &HeaderMap) -> Result<DriveClient, AppError> {
    let token = bearer_token(headers)?;
    DriveClient::new(token).map_err(internal)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /active-subfolders ============

async fn handle_active_subfolders(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let list: ActiveSubfolderList = state
        .cache
        .fetch_json(&state.config.sources.active_subfolders_url)
        .await
        .map_err(internal)?;

    let fallback = list
        .fallback_folder_id
        .unwrap_or_else(|| state.config.drive.fallback_folder_id.clone());

    Ok(Json(serde_json::json!({
        "subfolders": list.subfolders,
        "fallbackFolderId": fallback,
    })))
}

// ============ GET /issuer-canons ============

async fn handle_issuer_canons(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<IssuerCanonEntry>>, AppError> {
    let drive = drive_client(&headers)?;
    let content = canon::fetch_table_content(&drive, &state.config)
        .await
        .map_err(internal)?;
    let table = canon::parse_table(&content).map_err(internal)?;
    Ok(Json(table.issuers))
}

// ============ POST /summarize ============

#[derive(Serialize)]
struct SummarizeResponse {
    summary: String,
}

async fn handle_summarize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SummarizeResponse>, AppError> {
    let form = read_form(multipart).await?;
    if form.images.is_empty() {
        return Err(bad_request("No images uploaded"));
    }

    let template = match state
        .cache
        .fetch_prompts(&state.config.sources.prompts_url)
        .await
    {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Warning: summarize prompt fetch failed, using fallback: {}", e);
            PromptTemplate::summarize_fallback()
        }
    };

    let word_target = template.word_target.unwrap_or(100).to_string();
    let user_text = substitute(&template.user, &[("wordTarget", &word_target)]);

    let mut parts = vec![UserPart::Text(user_text)];
    parts.extend(
        form.images
            .iter()
            .map(|image| UserPart::ImageDataUri(data_uri(&image.mime_type, &image.bytes))),
    );

    let request = CompletionRequest {
        system: template.system,
        user: parts,
        temperature: None,
        max_tokens: state.config.completion.summary_max_tokens,
        json_object: false,
    };

    let summary = state.backend.complete(request).await.map_err(internal)?;
    Ok(Json(SummarizeResponse { summary }))
}

// ============ POST /save-set ============

async fn handle_save_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<crate::models::SaveOutcome>, AppError> {
    let form = read_form(multipart).await?;

    let summary = form.summary.as_deref().unwrap_or("").trim().to_string();
    if summary.is_empty() || form.images.is_empty() {
        return Err(bad_request("Summary and files are required"));
    }

    // Validation passed; only now touch credentials and the network.
    let drive = drive_client(&headers)?;

    let selected_canon = form.selected_canon.as_deref().and_then(|raw| {
        match serde_json::from_str::<IssuerCanonEntry>(raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                eprintln!("Warning: unable to parse selectedCanon field: {}", e);
                None
            }
        }
    });

    let bundle = BundleRequest {
        images: form.images,
        edited_summary: summary,
        selected_canon,
    };

    let outcome = save_bundle(
        &drive,
        &state.store,
        state.backend.as_ref(),
        &state.cache,
        &state.config,
        bundle,
    )
    .await
    .map_err(internal)?;

    Ok(Json(outcome))
}

// ============ POST /update-canon ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCanonRequest {
    #[serde(default)]
    draft_summary: String,
    #[serde(default)]
    editable_summary: String,
    /// Persist an accepted proposal back to the canonical table instead of
    /// only computing it.
    #[serde(default)]
    persist: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCanonResponse {
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    canonical: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
}

async fn handle_update_canon(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateCanonRequest>,
) -> Result<Json<UpdateCanonResponse>, AppError> {
    if request.draft_summary.trim().is_empty() || request.editable_summary.trim().is_empty() {
        return Err(bad_request("Missing summaries in request body"));
    }

    let drive = drive_client(&headers)?;
    let table_json = canon::fetch_table_content(&drive, &state.config)
        .await
        .map_err(internal)?;

    let proposal = canon::propose_update(
        state.backend.as_ref(),
        &state.cache,
        &state.config,
        &table_json,
        &request.draft_summary,
        &request.editable_summary,
    )
    .await
    .map_err(internal)?;

    let response = match proposal {
        CanonProposal::NoAction => UpdateCanonResponse {
            status: "NO_ACTION".to_string(),
            message: "No update required.".to_string(),
            canonical: None,
            alias: None,
        },
        CanonProposal::Update { canonical, alias } => {
            if request.persist {
                let file_id = state
                    .config
                    .drive
                    .canonical_file_id
                    .as_deref()
                    .ok_or_else(|| {
                        internal(anyhow::anyhow!(
                            "Missing drive.canonical_file_id configuration"
                        ))
                    })?;
                canon::persist_update(&drive, file_id, &canonical, &alias)
                    .await
                    .map_err(internal)?;
                UpdateCanonResponse {
                    status: "UPDATED".to_string(),
                    message: "Canonical table updated.".to_string(),
                    canonical: Some(canonical),
                    alias: Some(alias),
                }
            } else {
                UpdateCanonResponse {
                    status: "UPDATE_CALCULATED_ONLY".to_string(),
                    message: "Canonical update calculated but not persisted.".to_string(),
                    canonical: Some(canonical),
                    alias: Some(alias),
                }
            }
        }
    };

    Ok(Json(response))
}

// ============ POST /refresh-manifest ============

async fn handle_refresh_manifest(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<crate::refresh::RefreshOutcome>, AppError> {
    let drive = drive_client(&headers)?;
    let outcome = refresh_manifests(&drive, &state.store, &state.config)
        .await
        .map_err(internal)?;
    Ok(Json(outcome))
}

// ============ POST /sources/invalidate ============

async fn handle_invalidate_sources(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    state.cache.invalidate_all();
    Json(serde_json::json!({ "status": "ok" }))
}

// ============ Multipart form ============

/// Fields accepted by the multipart endpoints. `image` and `files` are the
/// repeated binary fields of the summarize and save forms respectively.
#[derive(Default)]
struct CaptureForm {
    summary: Option<String>,
    selected_canon: Option<String>,
    images: Vec<CapturedImage>,
}

async fn read_form(mut multipart: Multipart) -> Result<CaptureForm, AppError> {
    let mut form = CaptureForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "summary" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Unreadable summary field: {}", e)))?;
                form.summary = Some(text);
            }
            "selectedCanon" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Unreadable selectedCanon field: {}", e)))?;
                form.selected_canon = Some(text);
            }
            "image" | "files" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Unreadable file field: {}", e)))?;
                form.images.push(CapturedImage {
                    name: file_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {
                // Unknown fields are ignored so UI additions don't break saves.
            }
        }
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert(
                axum::http::header::AUTHORIZATION,
                v.parse().unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        let token = bearer_token(&headers_with(Some("Bearer abc123"))).unwrap();
        assert_eq!(token, "abc123");
    }

    #[test]
    fn test_bearer_token_missing_or_malformed() {
        assert!(bearer_token(&headers_with(None)).is_err());
        assert!(bearer_token(&headers_with(Some("abc123"))).is_err());
        assert!(bearer_token(&headers_with(Some("Bearer "))).is_err());
    }

    #[test]
    fn test_error_body_shape() {
        let err = bad_request("Summary and files are required");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let body = serde_json::to_value(ErrorBody {
            error: err.message,
        })
        .unwrap();
        assert_eq!(body["error"], "Summary and files are required");
    }
}
