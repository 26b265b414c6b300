use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use medq_core::{
    InMemoryAppointmentDirectory, InMemoryQueueStore, LiveUpdateHub,
    PostgresAppointmentDirectory, PostgresQueueStore, QueueEngine, QueueEventBus,
    TracingDispatcher,
};
use medq_server::{AppState, ServerConfig, routes::create_app_router};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "medq-server", about = "Clinic queue backend", version)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "MEDQ_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address, e.g. 127.0.0.1:8080. Overrides config and env.
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Postgres connection string. Overrides config and env.
    #[arg(long)]
    database_url: Option<String>,

    /// Run with in-memory stores and no database.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("medq_server=info,medq_core=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(url) = args.database_url {
        config.database_url = Some(url);
    }

    let bus = QueueEventBus::new(config.event_capacity);

    let engine = if args.demo || config.database_url.is_none() {
        if !args.demo {
            warn!("no database_url configured, falling back to in-memory demo mode");
        }
        info!("starting with in-memory stores");
        Arc::new(QueueEngine::new(
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(InMemoryAppointmentDirectory::new()),
            Arc::new(TracingDispatcher),
            bus,
        ))
    } else {
        let url = config
            .database_url
            .as_deref()
            .context("database_url must be set outside demo mode")?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("connecting to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("running database migrations")?;
        info!("database migrations applied");

        Arc::new(QueueEngine::new(
            Arc::new(PostgresQueueStore::new(pool.clone())),
            Arc::new(PostgresAppointmentDirectory::new(pool)),
            Arc::new(TracingDispatcher),
            bus,
        ))
    };

    let hub = LiveUpdateHub::new(Arc::clone(&engine));
    hub.spawn();

    let state = AppState::new(engine, hub);
    let app = create_app_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
