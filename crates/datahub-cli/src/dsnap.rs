//! `dsnap` — stream a snapshot of an embedded Data Hub to a file, stdout,
//! or the configured named FIFO.

use anyhow::{Context, Result};
use clap::Parser;
use datahub_core::error::HubError;
use datahub_snapshot::{
    SnapshotFormat, SnapshotParams, SnapshotStatus, begin, start_snapshot, transport,
};
use std::cell::RefCell;
use std::io::Write as _;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::io::AsyncReadExt;
use tracing::warn;

#[derive(Parser)]
#[command(name = "dsnap", about = "Data Hub snapshot tool")]
struct Cli {
    /// Output format
    #[arg(short, long, default_value = "json")]
    format: String,

    /// Only include entries modified after this timestamp
    #[arg(short, long, default_value_t = 0.0)]
    since: f64,

    /// Subtree root path
    #[arg(short, long, default_value = "/")]
    path: String,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stream through the configured named FIFO instead; a reader must
    /// already hold its other end
    #[arg(long, conflicts_with = "output")]
    fifo: bool,

    /// Release all deletion records once the snapshot completes
    #[arg(long)]
    flush_deletions: bool,

    /// Hub-script populating the embedded hub
    #[arg(short = 'S', long)]
    script: Option<PathBuf>,

    /// Hub config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    datahub_cli::init_tracing();
    let cli = Cli::parse();

    let format = SnapshotFormat::from_name(&cli.format)?;
    let hub = datahub_cli::build_hub(cli.config.as_deref(), cli.script.as_deref())?;
    let fifo_path = hub.config().snapshot.fifo_path.clone();
    let hub = Rc::new(RefCell::new(hub));

    let params = SnapshotParams {
        path: cli.path.clone(),
        since: cli.since,
        format,
        flush_deletions: cli.flush_deletions,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    let local = tokio::task::LocalSet::new();

    let status = if cli.fifo {
        runtime.block_on(local.run_until(async move {
            let prepared = begin(&hub, &params).map_err(busy_to_warning)?;
            let sender = match transport::open_fifo_sender(&fifo_path) {
                Ok(sender) => sender,
                Err(err) => {
                    prepared.abort();
                    return Err(err).with_context(|| {
                        format!("failed to open fifo {} for writing", fifo_path.display())
                    });
                }
            };
            anyhow::Ok(prepared.stream(sender).await)
        }))?
    } else {
        let (bytes, status) = runtime.block_on(local.run_until(async move {
            let (status_tx, status_rx) = tokio::sync::oneshot::channel();
            let mut reader = start_snapshot(&hub, &params, move |status| {
                let _ = status_tx.send(status);
            })
            .map_err(busy_to_warning)?;

            let mut bytes = Vec::new();
            reader
                .read_to_end(&mut bytes)
                .await
                .context("failed to read snapshot pipe")?;
            let status = status_rx.await.context("snapshot task vanished")?;
            anyhow::Ok((bytes, status))
        }))?;

        match &cli.output {
            Some(file) => std::fs::write(file, &bytes)
                .with_context(|| format!("failed to write {}", file.display()))?,
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&bytes)?;
                stdout.write_all(b"\n")?;
            }
        }
        status
    };

    match status {
        SnapshotStatus::Ok => Ok(()),
        other => anyhow::bail!("snapshot ended with {other:?}"),
    }
}

fn busy_to_warning(err: HubError) -> anyhow::Error {
    if err == HubError::Busy {
        warn!("a snapshot is already in progress");
    }
    err.into()
}
