mod playback;
mod prefetch;

use anyhow::Context;
use axum::{Json, Router, extract::State, routing::get};
use kqcache::{MediaCache, NullCache, OnceCache, YtDlpFetcher};
use kqconfig::get_config;
use kqevents::{
    Broadcaster,
    sse::{EventsState, create_events_router},
};
use kqqueue::{Queue, SqliteStore};
use playback::Player;
use prefetch::CachePrefetch;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Dernière demande consommée, pour l'affichage "en cours de lecture"
async fn now_playing(State(queue): State<Arc<Queue>>) -> Json<serde_json::Value> {
    match queue.last_dequeued().await {
        Ok(Some(item)) => Json(serde_json::json!(item)),
        Ok(None) => Json(serde_json::json!(null)),
        Err(e) => {
            tracing::error!("failed to read last dequeued item: {}", e);
            Json(serde_json::json!(null))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = get_config();
    let shutdown = CancellationToken::new();

    // ========== PHASE 1 : File de demandes ==========

    let db_path = config.get_queue_db_path();
    info!("📦 Opening queue store at {}", db_path.display());
    let store = Arc::new(SqliteStore::open(&db_path).context("failed to open queue store")?);
    let queue = Arc::new(Queue::new(store, config.get_user_limit()));

    let broadcaster = Broadcaster::new(config.get_event_buffer());
    queue.add_sink(broadcaster.clone());

    // ========== PHASE 2 : Cache média ==========

    let fetcher = Arc::new(YtDlpFetcher::new(
        config.get_fetcher_program(),
        config.get_fetcher_format(),
    ));

    let cache: Arc<dyn OnceCache> = if config.get_cache_enabled() {
        let cache_dir = config.get_cache_dir().context("failed to set up cache directory")?;
        info!("💾 Media cache enabled at {}", cache_dir);
        MediaCache::new(
            &cache_dir,
            fetcher,
            config.get_cache_job_capacity(),
        )
        .context("failed to start media cache")?
    } else {
        info!("💾 Media cache disabled");
        Arc::new(NullCache)
    };

    queue.add_sink(CachePrefetch::new(cache.clone(), shutdown.clone()));

    // ========== PHASE 3 : Lecture ==========

    let player = Player::new(config.get_player_program(), queue.clone(), cache.clone());
    let player_shutdown = shutdown.clone();
    let player_task = tokio::spawn(async move {
        player.run(player_shutdown).await;
    });

    // ========== PHASE 4 : Serveur HTTP ==========

    let state = EventsState {
        queue: queue.clone(),
        broadcaster: broadcaster.clone(),
    };
    let app = Router::new()
        .route("/now-playing", get(now_playing))
        .with_state(queue.clone())
        .merge(create_events_router(state));

    let port = config.get_http_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {}", port))?;

    info!("🌐 KaraQ ready on http://0.0.0.0:{}/", port);
    info!("Press Ctrl+C to stop...");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = player_task.await;

    info!("✅ KaraQ stopped");
    Ok(())
}
