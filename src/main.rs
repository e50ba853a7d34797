// src/main.rs
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, env, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod notify;
mod reconcile;
mod scanner;
mod sheet;


use notify::{NotificationSink, SmtpSink};
use reconcile::{
    parse_roster_rows, process_attendance_sheet, BatchReport, DispatchPolicy, EmployeeEntry,
};
use scanner::SheetLayout;
use sheet::SheetError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Spreadsheet error: {0}")]
    Sheet(#[from] SheetError),
    #[error("Upload error: {0}")]
    Upload(#[from] MultipartError),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        error!("Error occurred: {:?}", self);
        let (status_code, error_message) = match &self {
            AppError::MissingEnvVar(_) | AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server configuration error.".to_string(),
            ),
            AppError::Sheet(_) => (
                StatusCode::BAD_REQUEST,
                "Could not read the uploaded spreadsheet.".to_string(),
            ),
            AppError::Upload(_) => (
                StatusCode::BAD_REQUEST,
                "Malformed multipart upload.".to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };
        (status_code, Json(json!({ "error": error_message }))).into_response()
    }
}

#[derive(Debug, Clone)]
struct AppConfig {
    bind_addr: SocketAddr,
    smtp_host: String,
    smtp_username: String,
    smtp_password: String,
    mail_from: String,
    layout: SheetLayout,
    policy: DispatchPolicy,
}

#[derive(Clone)]
pub struct AppState {
    directory: Arc<RwLock<HashMap<String, EmployeeEntry>>>,
    sink: Arc<dyn NotificationSink>,
    layout: SheetLayout,
    policy: DispatchPolicy,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;
    info!("Tracing subscriber initialized.");

    let config = load_config()?;
    info!("App configuration loaded.");

    let sink: Arc<dyn NotificationSink> = Arc::new(SmtpSink::new(
        &config.smtp_host,
        config.smtp_username.clone(),
        config.smtp_password.clone(),
        &config.mail_from,
    )?);
    info!("SMTP sink initialized for host {}.", config.smtp_host);

    let state = AppState {
        directory: Arc::new(RwLock::new(HashMap::new())),
        sink,
        layout: config.layout.clone(),
        policy: config.policy.clone(),
    };

    let api_routes = Router::new()
        .route("/attendance/upload", post(handle_attendance_upload))
        .route("/employees/upload", post(handle_employee_upload))
        .route("/employees", get(handle_employee_list));
    let app = Router::new()
        .nest("/api", api_routes)
        .route("/status", get(handle_status))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("Binding listener failed")?;
    info!("Starting server on http://{}", config.bind_addr);
    axum::serve(listener, app)
        .await
        .context("HTTP server failed")?;

    Ok(())
}

// --- Configuration ---

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn load_config() -> Result<AppConfig, AppError> {
    let smtp_username =
        env::var("EMAIL_USER").map_err(|_| AppError::MissingEnvVar("EMAIL_USER".to_string()))?;
    let smtp_password =
        env::var("EMAIL_PASS").map_err(|_| AppError::MissingEnvVar("EMAIL_PASS".to_string()))?;
    let mail_from = env_or("MAIL_FROM", &smtp_username);

    let bind_addr_raw = env_or("BIND_ADDR", "127.0.0.1:5000");
    let bind_addr = bind_addr_raw.parse().map_err(|_| {
        AppError::Config(format!("BIND_ADDR '{}' is not an address", bind_addr_raw))
    })?;

    // Exports disagree on where the punch columns sit relative to the date
    // column, so the offsets stay configurable rather than hard-coded.
    let mut date_columns: Vec<usize> = env_or("SHEET_DATE_COLUMNS", "0,1")
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if date_columns.is_empty() {
        date_columns = SheetLayout::default().date_columns;
    }
    let layout = SheetLayout {
        date_columns,
        in_time_offset: env_parse_or("SHEET_IN_TIME_OFFSET", 1),
        out_time_offset: env_parse_or("SHEET_OUT_TIME_OFFSET", 2),
    };

    let policy = DispatchPolicy {
        enabled: env_parse_or("NOTIFY_ENABLED", true),
        timeout: Duration::from_secs(env_parse_or("NOTIFY_TIMEOUT_SECS", 30)),
    };

    Ok(AppConfig {
        bind_addr,
        smtp_host: env_or("SMTP_HOST", "smtp.gmail.com"),
        smtp_username,
        smtp_password,
        mail_from,
        layout,
        policy,
    })
}

// --- Handlers ---

#[derive(Debug, Deserialize)]
struct UploadParams {
    date: Option<NaiveDate>,
}

async fn read_upload_file(mut multipart: Multipart) -> Result<Bytes, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            return Ok(field.bytes().await?);
        }
    }
    Err(AppError::BadRequest("No file uploaded".to_string()))
}

async fn handle_attendance_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    multipart: Multipart,
) -> Result<Json<BatchReport>, AppError> {
    let bytes = read_upload_file(multipart).await?;
    let target_day = params.date.unwrap_or_else(|| Local::now().date_naive());
    info!(
        "Handling attendance upload ({} bytes) for target day {}",
        bytes.len(),
        target_day
    );

    // Snapshot once; the whole scan works against one consistent directory.
    let snapshot = state.directory.read().await.clone();

    let report = process_attendance_sheet(
        &bytes,
        target_day,
        &snapshot,
        state.sink.as_ref(),
        &state.layout,
        &state.policy,
    )
    .await?;
    Ok(Json(report))
}

async fn handle_employee_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let bytes = read_upload_file(multipart).await?;
    let rows = sheet::load_rows(&bytes)?;
    let entries = parse_roster_rows(&rows);
    let count = entries.len();

    let mut directory = state.directory.write().await;
    for entry in entries {
        directory.insert(entry.employee_id.clone(), entry);
    }
    info!(
        "Employee roster upload stored {} entries ({} total).",
        count,
        directory.len()
    );
    Ok(Json(json!({
        "message": "Employee data uploaded successfully",
        "count": count,
    })))
}

async fn handle_employee_list(
    State(state): State<AppState>,
) -> Result<Json<Vec<EmployeeEntry>>, AppError> {
    let mut employees: Vec<EmployeeEntry> =
        state.directory.read().await.values().cloned().collect();
    employees.sort_by(|a, b| a.employee_id.cmp(&b.employee_id));
    Ok(Json(employees))
}

async fn handle_status(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let employee_count = state.directory.read().await.len();
    let html_body = format!(
        "<h1>Server Status</h1><p>Current Time (Server): {}</p>\
         <p>Registered Employees: {}</p>\
         <p>Notifications enabled: {}</p>",
        Local::now().to_rfc3339(),
        employee_count,
        state.policy.enabled
    );
    Ok(Html(html_body))
}
