//! Shared pieces of the `dhub` and `dsnap` binaries.
//!
//! The IPC transport that would expose a long-running hub is out of scope,
//! so both tools operate an embedded hub populated from a hub-script: a
//! line-oriented admin command file (see [`script`]).

pub mod script;

use anyhow::{Context, Result};
use datahub_core::config::HubConfig;
use datahub_core::hub::DataHub;
use std::path::Path;

/// Build a hub from an optional config file and an optional hub-script.
pub fn build_hub(config: Option<&Path>, script_file: Option<&Path>) -> Result<DataHub> {
    let config = HubConfig::load(config)?;
    let mut hub = DataHub::new(config);
    if let Some(file) = script_file {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read script {}", file.display()))?;
        script::apply_script(&mut hub, &text)?;
    }
    Ok(hub)
}

/// Default `tracing` setup for the binaries: `RUST_LOG` or `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
