use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use user_service::config::{Config, LogFormat, StoreBackend};
use user_service::database::{self, PgUserStore};
use user_service::services::{event_publisher, InMemoryUserStore, MutationHook, ServiceNotifier, UserStore};
use user_service::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    info!("Starting user service...");

    let store: Arc<dyn UserStore> = match config.user_store {
        StoreBackend::Postgres => {
            let pool = database::new_pool(&config.database_url).await?;
            info!("Database connection pool created");
            if config.run_migrations {
                database::run_migrations(&pool).await?;
            }
            Arc::new(PgUserStore::new(pool))
        }
        StoreBackend::Memory => {
            info!("Using in-memory user store");
            Arc::new(InMemoryUserStore::new())
        }
    };

    let publisher = event_publisher::from_config(&config).await;
    let notifier = ServiceNotifier::from_config(&config)?;
    for target in notifier.targets() {
        info!(target_service = %target.name, url = %target.endpoint(), "Notification target configured");
    }
    let hook = MutationHook::new(publisher, notifier);

    let port = config.port;
    let app = user_service::app(AppState::new(store, hook, config));

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    // Graceful shutdown
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutting down gracefully...");
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "user_service=debug,tower_http=debug".into());

    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
