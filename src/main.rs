use pastyshop_api::{
    config,
    db,
    events::{self, EventSender},
    message_queue::InMemoryMessageQueue,
    services::recommender::RedisScoreStore,
    sessions::RedisSessionStore,
    AppServices, AppState,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!(
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = %cfg.environment,
        "Starting up"
    );

    let db_pool = Arc::new(db::establish_connection_from_app_config(&cfg).await?);
    if cfg.auto_migrate {
        db::run_migrations(&db_pool).await?;
    }

    let redis = Arc::new(redis::Client::open(cfg.redis_url.as_str())?);

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    tokio::spawn(events::process_events(event_rx));
    let event_sender = Arc::new(EventSender::new(event_tx));

    let sessions = Arc::new(RedisSessionStore::new(redis.clone(), cfg.session_ttl_secs));
    let scores = Arc::new(RedisScoreStore::new(redis.clone()));
    let queue = Arc::new(InMemoryMessageQueue::new());

    let config = Arc::new(cfg);
    let services = AppServices::build(
        db_pool.clone(),
        sessions,
        scores,
        queue,
        event_sender,
        &config,
    );

    let state = AppState {
        db: db_pool,
        redis: Some(redis),
        config: config.clone(),
        services,
    };

    let app = pastyshop_api::app(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!("Server error: {}", e);
            e
        })?;

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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

    info!("Shutdown signal received");
}
