//! Service entrypoint: wires configuration, infrastructure and the router.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::EnvFilter;

use threadline::adapters::ai::OpenAiCompatProvider;
use threadline::adapters::http::{router, AppState};
use threadline::adapters::postgres::PostgresChatStore;
use threadline::adapters::redis::RedisKeyValueStore;
use threadline::application::{
    ChatTurnHandler, RateLimiter, ResumableStreamContext, StreamContextConfig, StreamRegistry,
};
use threadline::config::AppConfig;
use threadline::ports::{ChatStore, KeyValueStore, ModelProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone())),
        )
        .init();

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;

    if config.database.run_migrations {
        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_conn = tokio::time::timeout(
        config.redis.timeout(),
        redis_client.get_multiplexed_tokio_connection(),
    )
    .await??;

    let kv: Arc<dyn KeyValueStore> = Arc::new(RedisKeyValueStore::new(redis_conn));
    let chat_store: Arc<dyn ChatStore> = Arc::new(PostgresChatStore::new(pool));
    let provider: Arc<dyn ModelProvider> = Arc::new(OpenAiCompatProvider::from_config(&config.ai)?);

    let rate_limiter = RateLimiter::new(kv.clone(), config.limits.clone());
    let registry = StreamRegistry::new(kv, config.limits.stream_ttl());
    let streams = ResumableStreamContext::new(StreamContextConfig::default());

    let turns = ChatTurnHandler::new(
        chat_store.clone(),
        provider,
        rate_limiter.clone(),
        registry.clone(),
        streams.clone(),
        config.limits.clone(),
    );

    let state = AppState {
        turns,
        chat_store,
        rate_limiter,
        registry,
        streams: streams.clone(),
    };

    let cors = {
        let origins = config.server.cors_origins_list();
        if origins.is_empty() {
            CorsLayer::permissive()
        } else {
            let parsed: Vec<http::HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any)
        }
    };

    let app = router(state)
        .layer(cors)
        .layer(TimeoutLayer::new(config.server.request_timeout()));

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight generations finish persisting before exit.
    tracing::info!("draining in-flight streams");
    streams.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
