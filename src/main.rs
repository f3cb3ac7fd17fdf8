use std::sync::Arc;

use epub_convert::api::api_routes;
use epub_convert::config::ServiceConfig;
use epub_convert::converter::Converter;
use epub_convert::tasks::{Sweeper, TaskService, TaskStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env();

    tokio::fs::create_dir_all(&config.temp_root)
        .await
        .map_err(|e| format!("cannot create {}: {e}", config.temp_root.display()))?;

    // Resolved once; a missing binary stays a degraded health state until restart.
    let converter = Converter::locate(config.converter_override.clone());

    eprintln!("📚 epub-convert v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Converter: {} ({})",
        converter.path().display(),
        if converter.is_available() { "found" } else { "MISSING" }
    );
    eprintln!("   Temp dir: {}", config.temp_root.display());
    eprintln!(
        "   Max upload: {} MB, download TTL: {}s",
        config.max_upload_mb(),
        config.download_ttl.as_secs()
    );
    if let Some(timeout) = config.conversion_timeout {
        eprintln!("   Conversion timeout: {}s", timeout.as_secs());
    }

    let store = TaskStore::new();
    let service = Arc::new(TaskService::new(&config, Arc::clone(&store), converter));

    // Sweeper lives as long as the server.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = Sweeper::new(Arc::clone(&store), config.temp_root.clone())
        .spawn(config.sweep_interval, shutdown_rx);

    let app = api_routes(service, config.cors_allowed_origins.as_deref());
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "HTTP server started");
    eprintln!("   API: http://{}/api\n", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    sweeper.await.ok();

    Ok(())
}
