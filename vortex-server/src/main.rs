//! Vortex: a networked in-memory key/value cache with watcher/notify
//! fan-out, publish-on-notify routing, and rotational journal durability.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vortex_core::{Journal, PubQueue, Registry, ReplayProcessor, Store};

use vortex_server::config::Args;
use vortex_server::context::AppContext;
use vortex_server::worker_pool::WorkerPool;
use vortex_server::{peer_link, server};

const WORKER_COUNT: usize = 6;
const JOURNAL_DIR: &str = "./journal";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse().clamped();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| console_filter(args.console_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        name = %args.name,
        port = args.port,
        interval = args.interval,
        keep = args.keep,
        version = env!("CARGO_PKG_VERSION"),
        "vortex starting"
    );

    let (journal, startup_segments) = Journal::open(JOURNAL_DIR, args.keep as usize)
        .await
        .context("failed to open journal directory")?;

    let store = Arc::new(Store::new());
    for segment in &startup_segments {
        let sink = ReplayProcessor::new(store.clone());
        if let Err(err) = Journal::load(segment, &sink).await {
            tracing::warn!(segment = %segment.display(), error = %err, "failed to replay journal segment at startup");
        }
    }
    let store = Arc::try_unwrap(store).unwrap_or_else(|_| unreachable!("store still shared after startup replay"));

    let registry = Registry::new();
    let pub_queue = PubQueue::new();
    let ctx = AppContext::new(args.clone(), store, journal, registry, pub_queue);

    let pool = WorkerPool::spawn(WORKER_COUNT, ctx.clone());
    let shutdown = Arc::new(Notify::new());

    let rotation_handle = tokio::spawn(rotation_timer(ctx.clone(), shutdown.clone()));

    let peer_handle = ctx.config().peer.clone().map(|peer_addr| {
        tokio::spawn(peer_link::run(
            peer_addr,
            ctx.clone(),
            pool.handle(),
            shutdown.clone(),
        ))
    });

    let listener = TcpListener::bind(("0.0.0.0", ctx.config().port))
        .await
        .with_context(|| format!("failed to bind port {}", ctx.config().port))?;
    tracing::info!(port = ctx.config().port, "listening");

    let server_shutdown = shutdown.clone();
    let server_ctx = ctx.clone();
    let server_pool = pool.handle();
    let accept_handle = tokio::spawn(async move {
        if let Err(err) = server::run(listener, server_ctx, server_pool, server_shutdown).await {
            tracing::error!(error = %err, "accept loop exited with error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");
    shutdown.notify_waiters();

    // Join every task holding a WorkerPoolHandle clone before shutting the
    // pool down, so its submission channel actually closes.
    let _ = accept_handle.await;
    rotation_handle.abort();
    let _ = rotation_handle.await;
    if let Some(handle) = peer_handle {
        handle.abort();
        let _ = handle.await;
    }
    pool.shutdown().await;

    Ok(())
}

async fn rotation_timer(ctx: AppContext, shutdown: Arc<Notify>) {
    let interval = std::time::Duration::from_secs(ctx.config().interval);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                tracing::info!("rotation tick");
                if let Err(err) = vortex_core::processor::rotate(&ctx.journal(), &ctx.store()).await {
                    tracing::error!(error = %err, "journal rotation failed");
                }
            }
            _ = shutdown.notified() => {
                tracing::info!("rotation timer shutting down");
                return;
            }
        }
    }
}

fn console_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}
