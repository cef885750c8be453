use std::path::{Path, PathBuf};

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::middleware::DefaultHeaders;
use actix_web::{guard, web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;
use crate::models::{DownloadRequest, DownloadResult, DEFAULT_QUALITY};
use crate::observer::SideEffect;
use crate::state::AppState;
use crate::util::sanitize_filename;

#[derive(Deserialize)]
pub struct DownloadBody {
    pub url: Option<String>,
    // Keep the audio track (default true).
    pub audio: Option<bool>,
    // Upper bound on video height, e.g. "720p" (default "1080p").
    pub quality: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    pub old_path: Option<String>,
    pub new_name: Option<String>,
}

#[derive(Deserialize)]
pub struct SaveBody {
    pub path: Option<String>,
}

#[derive(Deserialize)]
pub struct AutosaveBody {
    pub enabled: Option<bool>,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
    // Must come first: answers CORS preflight for every path.
    .service(
        web::resource("/{tail:.*}")
            .guard(guard::Options())
            .to(preflight),
    )
    .service(web::resource("/").route(web::get().to(index)))
    .service(web::resource("/download").route(web::post().to(download)))
    .service(web::resource("/history").route(web::get().to(history)))
    .service(web::resource("/rename").route(web::post().to(rename)))
    .service(web::resource("/save").route(web::post().to(save)))
    .service(
        web::resource("/autosave")
            .route(web::get().to(get_autosave))
            .route(web::post().to(set_autosave)),
    )
    .default_service(web::route().to(fallback));
}

/// The UI runs from another origin, so every response allows any origin.
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type"))
}

fn fail(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "status": "fail",
        "kind": kind,
        "message": message.into(),
    }))
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Input => StatusCode::BAD_REQUEST,
        ErrorKind::Extraction | ErrorKind::Transcode => StatusCode::BAD_GATEWAY,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Unparseable bodies get the same JSON failure shape as every other error.
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = format!("Invalid request body: {}", err);
    InternalError::from_response(err, fail(StatusCode::BAD_REQUEST, ErrorKind::Input, message))
        .into()
}

async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

async fn fallback() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({
        "status": "fail",
        "message": "Not found"
    }))
}

pub async fn index() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "service": "makecut download service",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /": "Health check",
            "POST /download": "Download and normalize a video (body: {url, audio, quality})",
            "GET /history": "List saved files that still exist",
            "POST /rename": "Rename a saved file (body: {oldPath, newName})",
            "POST /save": "Open a saved file in the default player (body: {path})",
            "GET /autosave": "Read the autosave toggle",
            "POST /autosave": "Set the autosave toggle (body: {enabled})"
        }
    }))
}

pub async fn download(req: web::Json<DownloadBody>, state: web::Data<AppState>) -> impl Responder {
    let body = req.into_inner();
    let request = match DownloadRequest::new(
        body.url.as_deref().unwrap_or(""),
        body.audio.unwrap_or(true),
        body.quality.as_deref().unwrap_or(DEFAULT_QUALITY),
    ) {
        Ok(r) => r,
        Err(e) => return fail(StatusCode::BAD_REQUEST, e.kind(), e.to_string()),
    };

    log::info!(
        "[DOWNLOAD] Request: audio={} max_height={} url={}",
        request.include_audio(),
        request.max_height(),
        request.url()
    );

    let permit = match state.limiter.clone().try_acquire_owned() {
        Ok(p) => p,
        Err(_) => {
            return HttpResponse::TooManyRequests().json(serde_json::json!({
                "status": "fail",
                "message": format!(
                    "Too many concurrent downloads (max: {})",
                    state.config.max_concurrent_downloads
                )
            }));
        }
    };

    // If the client goes away this handler is dropped, the guard cancels the
    // run and the pipeline removes its working files.
    let cancel = CancellationToken::new();
    let _cancel_on_disconnect = cancel.clone().drop_guard();
    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(async move {
        let _permit = permit;
        pipeline.run_with_cancel(&request, &cancel).await
    });

    let result = match task.await {
        Ok(r) => r,
        Err(e) => {
            return fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Cancelled,
                format!("Download task failed: {}", e),
            );
        }
    };

    match result {
        DownloadResult::Success { final_path } => {
            if state.store.autosave().await.enabled {
                if let Err(e) = state.store.record(&final_path).await {
                    state.observer.side_effect_failed(
                        SideEffect::HistoryRecord,
                        &final_path,
                        &format!("{:#}", e),
                    );
                }
            }
            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "path": state.pipeline.download_dir().to_string_lossy(),
                "file": final_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            }))
        }
        DownloadResult::Failure { kind, message } => {
            log::warn!("[DOWNLOAD] Failed ({}): {}", kind.as_str(), message);
            fail(status_for(kind), kind, message)
        }
    }
}

pub async fn history(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok()
        .append_header((actix_web::http::header::CACHE_CONTROL, "no-store"))
        .json(state.store.entries().await)
}

pub async fn rename(req: web::Json<RenameBody>, state: web::Data<AppState>) -> impl Responder {
    let body = req.into_inner();
    let (old_path, new_name) = match (body.old_path, body.new_name) {
        (Some(o), Some(n)) if !o.trim().is_empty() && !n.trim().is_empty() => (o, n),
        _ => return fail(StatusCode::BAD_REQUEST, ErrorKind::Input, "Missing data"),
    };

    let clean = sanitize_filename(&new_name);
    if clean.is_empty() {
        return fail(StatusCode::BAD_REQUEST, ErrorKind::Input, "Invalid name");
    }

    let old_file = PathBuf::from(&old_path);
    let new_file = old_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}.mp4", clean));

    if new_file != old_file && new_file.exists() {
        return fail(
            StatusCode::CONFLICT,
            ErrorKind::Filesystem,
            format!("{} already exists", new_file.display()),
        );
    }

    if let Err(e) = tokio::fs::rename(&old_file, &new_file).await {
        return fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Filesystem,
            e.to_string(),
        );
    }
    log::info!("[RENAME] {} -> {}", old_file.display(), new_file.display());

    if let Err(e) = state.store.replace(&old_path, &new_file).await {
        state
            .observer
            .side_effect_failed(SideEffect::HistoryRecord, &new_file, &format!("{:#}", e));
    }

    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "path": new_file.to_string_lossy(),
    }))
}

pub async fn save(req: web::Json<SaveBody>, state: web::Data<AppState>) -> impl Responder {
    let path = match req.into_inner().path {
        Some(p) if !p.trim().is_empty() && Path::new(&p).exists() => PathBuf::from(p),
        _ => return fail(StatusCode::BAD_REQUEST, ErrorKind::Input, "File not found"),
    };

    if let Err(e) = state.viewer.open(&path) {
        state
            .observer
            .side_effect_failed(SideEffect::ViewerLaunch, &path, &format!("{:#}", e));
    }
    HttpResponse::Ok().json(serde_json::json!({ "status": "success" }))
}

pub async fn get_autosave(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.store.autosave().await)
}

pub async fn set_autosave(req: web::Json<AutosaveBody>, state: web::Data<AppState>) -> impl Responder {
    let enabled = req.into_inner().enabled.unwrap_or(false);
    match state.store.set_autosave(enabled).await {
        Ok(setting) => HttpResponse::Ok().json(serde_json::json!({
            "status": "updated",
            "enabled": setting.enabled,
        })),
        Err(e) => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Filesystem,
            format!("{:#}", e),
        ),
    }
}
