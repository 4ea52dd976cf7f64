// FastDistrib - Web Server
// Public one-time download pages + bearer-protected admin API

use anyhow::{anyhow, Context};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Form, Multipart, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use fast_distrib::{
    export_group_csv, find_link_by_token, get_group, import_batch, list_groups, list_units,
    open_database, redeem, save_upload, send_group_notifications, stage_pdf_source,
    validate_files, DistribError, DownloadOutcome, Settings, SmtpMailer,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DOWNLOAD_TEMPLATE: &str = include_str!("../web/download.html");
const ERROR_TEMPLATE: &str = include_str!("../web/error.html");

/// Uploads carry whole PDF batches
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    settings: Arc<Settings>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal(anyhow!("database lock poisoned")))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
enum ApiError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<DistribError> for ApiError {
    fn from(err: DistribError) -> Self {
        match err {
            DistribError::UnreadableTable { .. }
            | DistribError::EmptyTable { .. }
            | DistribError::Archive { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing or invalid admin token".to_string(),
            ),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(e) => {
                error!("Request failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Admin authentication
// ============================================================================

/// Compare digests so the comparison does not depend on where the inputs differ
fn tokens_match(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let expected = match &state.settings.admin_token {
        Some(token) => token,
        None => {
            warn!("Admin request refused: ADMIN_TOKEN is not configured");
            return ApiError::Unauthorized.into_response();
        }
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if tokens_match(token, expected) => next.run(request).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

// ============================================================================
// Multipart uploads
// ============================================================================

/// One staged upload; removed from disk when dropped
struct Upload {
    staging: TempDir,
    label: Option<String>,
    table: Option<PathBuf>,
    archive: Option<PathBuf>,
    pdf_count: usize,
}

impl Upload {
    fn uploads_dir(&self) -> PathBuf {
        self.staging.path().join("uploads")
    }

    /// Archive when one was sent, otherwise the directory of loose PDFs
    fn pdf_source(&self) -> PathBuf {
        self.archive.clone().unwrap_or_else(|| self.uploads_dir())
    }

    fn require_inputs(&self) -> ApiResult<PathBuf> {
        let table = self
            .table
            .clone()
            .ok_or_else(|| ApiError::BadRequest("Missing 'table' part".to_string()))?;

        if self.archive.is_none() && self.pdf_count == 0 {
            return Err(ApiError::BadRequest(
                "Upload PDFs as 'files' parts or a ZIP as 'archive'".to_string(),
            ));
        }
        Ok(table)
    }
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart body: {}", err))
}

async fn read_upload(mut multipart: Multipart) -> ApiResult<Upload> {
    let staging = tempfile::tempdir().context("Failed to create staging directory")?;
    let mut upload = Upload {
        staging,
        label: None,
        table: None,
        archive: None,
        pdf_count: 0,
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        match name.as_str() {
            "label" => {
                upload.label = Some(field.text().await.map_err(bad_multipart)?.trim().to_string());
            }
            "table" => {
                let bytes: Bytes = field.bytes().await.map_err(bad_multipart)?;
                let name = file_name.unwrap_or_else(|| "table.csv".to_string());
                upload.table = Some(save_upload(&bytes, &name, upload.staging.path())?);
            }
            "files" => {
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                let name = file_name.unwrap_or_else(|| format!("file-{}.pdf", upload.pdf_count));
                save_upload(&bytes, &name, &upload.uploads_dir())?;
                upload.pdf_count += 1;
            }
            "archive" => {
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                upload.archive = Some(save_upload(&bytes, "archive.zip", upload.staging.path())?);
            }
            other => debug!("Ignoring multipart part '{}'", other),
        }
    }

    Ok(upload)
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/batches - Import a table + PDFs, issue links
async fn create_batch(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Response> {
    let upload = read_upload(multipart).await?;
    let table = upload.require_inputs()?;
    let label = upload
        .label
        .clone()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing 'label' part".to_string()))?;

    let db = state.db.clone();
    let media_root = state.settings.media_root.clone();

    let summary = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        let summary = import_batch(&conn, &label, &table, &upload.pdf_source(), &media_root);
        drop(upload);
        summary
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))??;

    let status = if summary.group_id.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ApiResponse::ok(summary))).into_response())
}

/// POST /api/validate - Compare table codes with PDF names, nothing stored
async fn validate_upload(multipart: Multipart) -> ApiResult<Response> {
    let upload = read_upload(multipart).await?;
    let table = upload.require_inputs()?;

    let pdf_dir = stage_pdf_source(&upload.pdf_source(), upload.staging.path())?;
    let summary = validate_files(&table, &pdf_dir)?;

    Ok(Json(ApiResponse::ok(summary)).into_response())
}

/// GET /api/groups - Groups with delivery counters
async fn get_groups(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = state.conn()?;
    let groups = list_groups(&conn)?;
    Ok(Json(ApiResponse::ok(groups)).into_response())
}

fn ensure_group(conn: &Connection, group_id: i64) -> ApiResult<()> {
    match get_group(conn, group_id)? {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("Unknown group {}", group_id))),
    }
}

/// GET /api/groups/:id/units - Units of a group with their links
async fn get_group_units(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> ApiResult<Response> {
    let conn = state.conn()?;
    ensure_group(&conn, group_id)?;

    let units = list_units(&conn, group_id)?;
    Ok(Json(ApiResponse::ok(units)).into_response())
}

/// POST /api/groups/:id/send - Email the links of a group
async fn send_group(State(state): State<AppState>, Path(group_id): Path<i64>) -> ApiResult<Response> {
    ensure_group(&*state.conn()?, group_id)?;

    let mailer = SmtpMailer::new(&state.settings.smtp)?;
    let db = state.db.clone();
    let base_url = state.settings.base_url.clone();

    let summary = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        send_group_notifications(&conn, &mailer, group_id, &base_url)
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))??;

    Ok(Json(ApiResponse::ok(summary)).into_response())
}

/// GET /api/groups/:id/export - Delivery status as CSV
async fn export_group(State(state): State<AppState>, Path(group_id): Path<i64>) -> ApiResult<Response> {
    let conn = state.conn()?;
    ensure_group(&conn, group_id)?;

    let mut csv = Vec::new();
    export_group_csv(&conn, group_id, &mut csv)?;

    let disposition = format!("attachment; filename=\"group-{}.csv\"", group_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

// ============================================================================
// Download pages
// ============================================================================

#[derive(Deserialize)]
struct DownloadForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    access_code: String,
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Fill `{{key}}` placeholders in one pass; substituted values are never rescanned
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];

        match after.find("}}") {
            Some(close) => {
                let key = &after[..close];
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(&html_escape(value)),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn render_download_form(name: &str, token: &str, error: &str) -> String {
    let action = format!("/download/{}", urlencoding::encode(token));
    fill_template(
        DOWNLOAD_TEMPLATE,
        &[("name", name), ("action", &action), ("error", error)],
    )
}

fn error_page(status: StatusCode, title: &str, message: &str) -> Response {
    let body = fill_template(ERROR_TEMPLATE, &[("title", title), ("message", message)]);
    (status, Html(body)).into_response()
}

fn not_found_page() -> Response {
    error_page(
        StatusCode::NOT_FOUND,
        "Lien introuvable",
        "Ce lien de téléchargement n'existe pas. Vérifiez l'adresse reçue par email.",
    )
}

fn already_used_page() -> Response {
    error_page(
        StatusCode::GONE,
        "Lien déjà utilisé",
        "Ce document a déjà été téléchargé. Le lien n'est plus valide.",
    )
}

fn internal_error_page() -> Response {
    error_page(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Erreur",
        "Une erreur est survenue. Réessayez plus tard.",
    )
}

/// GET /download/:token - Credentials form
async fn download_form(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let found = match state.conn() {
        Ok(conn) => find_link_by_token(&conn, &token),
        Err(e) => return e.into_response(),
    };

    match found {
        Ok(Some((link, _))) if link.used => already_used_page(),
        Ok(Some((_, unit))) => Html(render_download_form(&unit.name, &token, "")).into_response(),
        Ok(None) => not_found_page(),
        Err(e) => {
            error!("Failed to look up link: {:#}", e);
            internal_error_page()
        }
    }
}

/// POST /download/:token - Check credentials, consume the link, send the file
async fn download_submit(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Form(form): Form<DownloadForm>,
) -> Response {
    let db = state.db.clone();
    let lookup = token.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        redeem(&conn, &lookup, &form.email, &form.access_code)
    })
    .await
    .map_err(anyhow::Error::from)
    .and_then(|redeemed| redeemed);

    match outcome {
        Ok(DownloadOutcome::Granted { unit, content }) => {
            info!("Unit {} downloaded {}", unit.id, unit.file_name());
            let disposition = format!(
                "attachment; filename*=UTF-8''{}",
                urlencoding::encode(&unit.file_name())
            );
            (
                [
                    (header::CONTENT_TYPE, "application/pdf".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                content,
            )
                .into_response()
        }
        Ok(DownloadOutcome::NotFound) => not_found_page(),
        Ok(DownloadOutcome::AlreadyUsed) => already_used_page(),
        Ok(DownloadOutcome::Mismatch { unit_name }) => {
            let page = render_download_form(
                &unit_name,
                &token,
                "Adresse email ou code de sécurité incorrect.",
            );
            (StatusCode::FORBIDDEN, Html(page)).into_response()
        }
        Ok(DownloadOutcome::Unavailable { .. }) => error_page(
            StatusCode::SERVICE_UNAVAILABLE,
            "Document indisponible",
            "Votre document ne peut pas être lu pour le moment. Votre lien reste valide, réessayez plus tard.",
        ),
        Err(e) => {
            error!("Failed to redeem link: {:#}", e);
            internal_error_page()
        }
    }
}

// ============================================================================
// Router
// ============================================================================

fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/batches", post(create_batch))
        .route("/validate", post(validate_upload))
        .route("/groups", get(get_groups))
        .route("/groups/:id/units", get(get_group_units))
        .route("/groups/:id/send", post(send_group))
        .route("/groups/:id/export", get(export_group))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .merge(admin_routes);

    Router::new()
        .route("/download/:token", get(download_form).post(download_submit))
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    println!("🌐 FastDistrib - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let settings = Settings::from_env()?;

    std::fs::create_dir_all(&settings.media_root)
        .with_context(|| format!("Failed to create {}", settings.media_root.display()))?;
    let conn = open_database(&settings.database_path)?;
    println!("✓ Database opened: {:?}", settings.database_path);

    if settings.admin_token.is_none() {
        warn!("ADMIN_TOKEN is not set; the admin API will refuse every request");
    }

    let bind_addr = settings.bind_addr.clone();
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        settings: Arc::new(settings),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    println!("\n🚀 Server running on http://{}", bind_addr);
    println!("   Health: /api/health");
    println!("   Links:  /download/<token>");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
