use std::{env, fs::OpenOptions, sync::Mutex};

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs to stdout and, when `MAILER_LOG_FILE` is set, appends to that file as
/// well. The level comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing() -> anyhow::Result<()> {
    let file_layer = match env::var("MAILER_LOG_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Could not open log file {path}"))?;
            Some(
                tracing_subscriber::fmt::Layer::default()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .with(file_layer)
        .try_init()
        .context("Could not install the tracing subscriber")?;

    Ok(())
}
