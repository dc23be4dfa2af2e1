mod cli;
mod live_reload;

use anyhow::{Context, Result};
use api2html::EngineFactory;
use clap::Parser;
use cli::Cli;
use tower_livereload::LiveReloadLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env file is fine
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("api2html starting with {:?}", cli.config);

    let engine = EngineFactory::new(cli.engine_options())
        .build(&cli.config, cli.live_reload)
        .with_context(|| format!("Failed to build engine from {:?}", cli.config))?;
    info!(
        "Loaded {} template(s) and {} layout(s)",
        engine.templates().len(),
        engine.layouts().len()
    );

    let mut app = engine.router();
    let _reload_tasks = if cli.live_reload {
        let layer = LiveReloadLayer::new();
        let tasks = live_reload::forward_reloads(&engine, layer.reloader());
        app = app.layer(layer);
        tasks
    } else {
        Vec::new()
    };

    let addr = cli.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
