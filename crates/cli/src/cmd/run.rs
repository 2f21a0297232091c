//! Run the forwarder in the foreground

use anyhow::Result;
use push_core::LocalBus;
use push_lib::ingest::{spawn_line_reader, LineFeeder};
use push_lib::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(config_path: &Path, data_dir: Option<PathBuf>, keep_running: bool) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }

    // Pin the id so the feeder and the supervisor agree on it
    let self_id = push_lib::resolve_self_id(&config)?;
    config.self_id = Some(self_id.clone());

    let bus = Arc::new(LocalBus::default());
    let mut handle = push_lib::start(&config, bus.clone())?;
    info!(
        "Forwarding {} paths to {} as vessels.{}",
        config.paths.len(),
        config.remote_host.as_deref().unwrap_or_default(),
        self_id
    );

    let mut feeder = LineFeeder::new(bus, self_id);
    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    let mut input_open = true;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            line = lines.recv(), if input_open => match line {
                Some(line) => feeder.feed(&line),
                None => {
                    input_open = false;
                    info!("Input closed after {} updates", feeder.published());
                    if !keep_running {
                        break;
                    }
                }
            },
        }
    }

    handle.stop().await;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
