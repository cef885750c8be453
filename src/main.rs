use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tokio::sync::Semaphore;

mod config;
mod error;
mod extractor;
mod format_selector;
mod handlers;
mod models;
mod observer;
mod pipeline;
mod process;
mod release;
mod state;
mod store;
#[cfg(test)]
mod testing;
mod transcoder;
mod util;
mod viewer;

use crate::extractor::YtDlpExtractor;
use crate::observer::{LogObserver, Observer};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::state::AppState;
use crate::store::HistoryStore;
use crate::transcoder::FfmpegTranscoder;
use crate::viewer::{MediaViewer, SystemViewer};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cfg_path = std::env::args()
        .skip_while(|a| a != "--config")
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let mut cfg = match config::AppConfig::load_or_default(&cfg_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[CONFIG] Failed to load {}: {:#}", cfg_path, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = cfg.apply_port_override(std::env::var("PORT").ok().as_deref()) {
        eprintln!("[CONFIG] {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::create_dir_all(&cfg.download_dir) {
        eprintln!(
            "[CONFIG] Cannot create download dir {}: {}",
            cfg.download_dir.display(),
            e
        );
        std::process::exit(1);
    }

    println!("========================================");
    println!("  makecut download service");
    println!("  http://{}", cfg.listen_addr);
    println!("  saving to {}", cfg.download_dir.display());
    println!("========================================");
    println!();

    let viewer: Arc<dyn MediaViewer> = Arc::new(SystemViewer);
    let observer: Arc<dyn Observer> = Arc::new(LogObserver);
    let pipeline = Pipeline::new(
        PipelineSettings::from_config(&cfg),
        Arc::new(YtDlpExtractor::new(&cfg)),
        Arc::new(FfmpegTranscoder::new(&cfg)),
        viewer.clone(),
        observer.clone(),
    );

    let state = web::Data::new(AppState {
        limiter: Arc::new(Semaphore::new(cfg.max_concurrent_downloads)),
        store: Arc::new(HistoryStore::new(&cfg.download_dir)),
        pipeline: Arc::new(pipeline),
        viewer,
        observer,
        config: Arc::new(cfg),
    });

    let bind_addr = state.config.listen_addr.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(handlers::cors_headers())
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .configure(handlers::routes)
    })
    .bind(bind_addr.as_str())?
    .run()
    .await
}
