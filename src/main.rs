//! photo-drive 服务入口。
//!
//! 按用户维护相册、回收站与空间配额，数据以 JSON 文件落盘。
//! 这里组装存储核心、Axum 路由与后台清理任务，然后启动 HTTP 监听。

mod album;
mod atomic;
mod background;
mod config;
mod document;
mod error;
mod handlers;
mod http;
mod locking;
mod logging;
mod model;
mod quota;
mod storage;
mod trash;
mod version;

use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post, put};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::album::AlbumStore;
use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::document::DocumentStore;
use crate::http::{build_cors_layer, extract_forwarded_ip};
use crate::quota::{QuotaPolicy, QuotaTracker};
use crate::storage::Storage;
use crate::trash::TrashManager;

shadow!(build);

/// 启动服务并阻塞直到收到退出信号。
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let storage = Arc::new(Storage::new(PathBuf::from(&args.data_dir)));
    storage.ensure_root().await?;
    let docs = Arc::new(DocumentStore::new(Duration::from_secs(args.lock_wait_secs)));
    let quota = Arc::new(QuotaTracker::new(
        storage.clone(),
        docs.clone(),
        QuotaPolicy::default(),
        args.default_level,
    ));
    let albums = Arc::new(AlbumStore::new(storage.clone(), docs.clone(), quota.clone()));
    let trash = Arc::new(TrashManager::new(storage.clone(), docs.clone(), quota.clone()));

    let mut app = Router::new()
        .route("/api/users/{user}/quota", get(handlers::get_quota))
        .route("/api/users/{user}/level", put(handlers::set_level))
        .route("/api/users/{user}/albums", get(handlers::list_albums))
        .route("/api/users/{user}/albums/{album}", get(handlers::list_album))
        .route(
            "/api/users/{user}/albums/{album}/photos",
            post(handlers::upload_photo),
        )
        .route(
            "/api/users/{user}/albums/{album}/rename",
            post(handlers::rename_photo),
        )
        .route(
            "/api/users/{user}/albums/{album}/remark",
            post(handlers::set_photo_remark).put(handlers::set_album_remark),
        )
        .route(
            "/api/users/{user}/albums/{album}/delete",
            post(handlers::delete_photos),
        )
        .route(
            "/api/users/{user}/albums/{album}/move",
            post(handlers::move_photos),
        )
        .route(
            "/api/users/{user}/albums/{album}/trash",
            post(handlers::trash_photos),
        )
        .route("/api/users/{user}/trash", get(handlers::list_trash))
        .route(
            "/api/users/{user}/trash/restore",
            post(handlers::restore_photos),
        )
        .route("/api/users/{user}/trash/purge", post(handlers::purge_photos))
        .route("/api/users/{user}/trash/empty", post(handlers::empty_trash))
        .route("/api/version", get(version::get_service_info))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = extract_forwarded_ip(request.headers())
                        .map(|ip| ip.to_string())
                        .or_else(|| {
                            request
                                .extensions()
                                .get::<ConnectInfo<SocketAddr>>()
                                .map(|ConnectInfo(addr)| addr.ip().to_string())
                        })
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(quota))
        .layer(Extension(albums))
        .layer(Extension(trash.clone()));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(data_dir = %storage.root_path().display(), "🚀 Starting HTTP server at {}", addr);

    spawn_background_tasks(
        storage,
        docs,
        trash,
        Duration::from_secs(args.sweep_interval_secs),
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
