//! Logging setup shared by both binaries.

use std::path::Path;

use anyhow::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` wins over `verbosity` when set. With `log_file`, output is
/// appended to that file without colours; otherwise it goes to stderr.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

    match log_file {
        None => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(verbosity >= 2).with_writer(std::io::stderr))
            .try_init()
            .context("logging already initialized")?,
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true),
                )
                .try_init()
                .context("logging already initialized")?
        }
    }

    Ok(())
}

fn default_directives(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!(
        "warn,filewire={level},filewire_server={level},filewire_client={level},\
         filewire_transfer={level},filewire_protocol={level}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_crate_levels_only() {
        let d = default_directives(0);
        assert!(d.starts_with("warn,"));
        assert!(d.contains("filewire_transfer=info"));
        assert!(default_directives(1).contains("filewire_protocol=debug"));
        assert!(default_directives(7).contains("filewire_client=trace"));
    }

    #[test]
    fn directives_parse() {
        for v in 0..3 {
            assert!(EnvFilter::try_new(default_directives(v)).is_ok());
        }
    }
}
