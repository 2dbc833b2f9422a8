//! filewire client entry point.
//!
//! Exits 0 only when the file arrived complete and its checksum matched.

use std::process::ExitCode;

use clap::Parser;
use filewire::cli::ClientCli;
use filewire::config::Settings;
use filewire::logging::init_logging;
use filewire_transfer::FileClient;
use tokio_util::sync::CancellationToken;

fn main() -> anyhow::Result<ExitCode> {
    let cli = ClientCli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);
    init_logging(cli.verbose, settings.log_file.as_deref())?;

    let config = settings.client.to_config()?;
    let client = FileClient::new(config);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });
        client.fetch_cancellable(&cli.filename, &cancel).await
    });

    if result.success {
        let dest = result
            .destination
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{} -> {} ({} bytes, md5 {})",
            result.filename,
            dest,
            result.bytes_received,
            result.actual_checksum.as_deref().unwrap_or("-")
        );
        return Ok(ExitCode::SUCCESS);
    }

    match &result.error {
        Some(err) => eprintln!("{}: {err}", result.filename),
        None => eprintln!("{}: transfer failed", result.filename),
    }
    if let Some(kept) = &result.destination {
        eprintln!("partial data kept at {}", kept.display());
    }
    Ok(ExitCode::FAILURE)
}
