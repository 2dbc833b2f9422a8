//! filewire server entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use filewire::cli::ServerCli;
use filewire::config::Settings;
use filewire::logging::init_logging;
use filewire_transfer::FileServer;

fn main() -> anyhow::Result<()> {
    let cli = ServerCli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);
    init_logging(cli.verbose, settings.log_file.as_deref())?;

    let config = settings.server.to_config()?;
    std::fs::create_dir_all(&config.serve_dir)
        .with_context(|| format!("cannot create {}", config.serve_dir.display()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dir = %config.serve_dir.display(),
        "starting filewire server"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let server = FileServer::new(config);
        let listener = server.bind().await.context("server failed to start")?;

        let on_signal = Arc::clone(&server);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("interrupt received, shutting down");
                    on_signal.shutdown();
                }
                Err(e) => tracing::warn!("cannot listen for ctrl-c: {e}"),
            }
        });

        server.serve(listener).await?;
        anyhow::Ok(())
    })?;

    tracing::info!("server shut down cleanly");
    Ok(())
}
