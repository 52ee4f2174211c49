//! `dhub` — admin tool for an embedded Data Hub.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datahub_cli::script;
use datahub_core::hub::{DataHub, ResourceInfo};
use datahub_core::resource::ObservationConfig;
use datahub_core::sample::SampleType;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dhub", about = "Data Hub admin tool")]
struct Cli {
    /// Hub-script applied before the command runs
    #[arg(short = 'S', long, global = true)]
    script: Option<PathBuf>,

    /// Hub config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current value and metadata of a resource
    Get {
        path: String,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Apply an admin setting
    Set {
        #[command(subcommand)]
        setting: SetCommand,
    },

    /// Push a sample into a resource
    Push {
        path: String,

        /// Sample type: trigger, bool, num, str, json
        #[arg(value_name = "TYPE")]
        ty: String,

        /// Value (omitted for trigger)
        value: Vec<String>,

        /// Timestamp in seconds since the epoch (defaults to now)
        #[arg(long, default_value_t = f64::NAN)]
        ts: f64,

        /// Units hint checked against the resource's units
        #[arg(long, default_value = "")]
        units: String,
    },

    /// List the resource tree
    List {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Include deletion records
        #[arg(long)]
        deleted: bool,
    },

    /// Watch a resource: print accepted samples while applying push
    /// directives from stdin
    Watch {
        path: String,

        /// Sample type to subscribe to
        #[arg(value_name = "TYPE")]
        ty: String,
    },
}

#[derive(Subcommand)]
enum SetCommand {
    /// Substitute every accepted value with a fixed one
    Override {
        path: String,
        ty: String,
        value: Vec<String>,
    },
    /// Value emitted to a newly connected consumer
    Default {
        path: String,
        ty: String,
        value: Vec<String>,
    },
    /// Route samples from <SRC> into <DST> (omit SRC to clear)
    Source { dst: String, src: Option<String> },
    /// Dotted/indexed extraction applied to incoming JSON
    Extraction { path: String, spec: String },
    /// Units of an Observation
    Units { path: String, units: String },
    /// Observation filter parameters
    Observation {
        path: String,
        #[arg(long)]
        min_period: Option<f64>,
        #[arg(long)]
        low: Option<f64>,
        #[arg(long)]
        high: Option<f64>,
        #[arg(long)]
        change_by: Option<f64>,
        #[arg(long)]
        buffer: Option<usize>,
        #[arg(long)]
        backup_period: Option<f64>,
    },
    /// Deletion tracking: on or off
    Tracking { state: String },
}

fn main() -> Result<()> {
    datahub_cli::init_tracing();
    let cli = Cli::parse();
    let mut hub = datahub_cli::build_hub(cli.config.as_deref(), cli.script.as_deref())?;

    match cli.command {
        Commands::Get { path, json } => cmd_get(&hub, &path, json),
        Commands::Set { setting } => cmd_set(&mut hub, setting),
        Commands::Push {
            path,
            ty,
            value,
            ts,
            units,
        } => cmd_push(&mut hub, &path, &ty, &value, ts, &units),
        Commands::List { json, deleted } => cmd_list(&hub, json, deleted),
        Commands::Watch { path, ty } => cmd_watch(hub, &path, &ty),
    }
}

fn print_info(info: &ResourceInfo) {
    let ty = info
        .declared
        .map_or("-", datahub_core::sample::SampleType::name);
    let value = match (&info.value, info.timestamp) {
        (Some(v), Some(ts)) => format!("{} @ {ts}", v.to_display_string()),
        _ => "(no value)".to_string(),
    };
    let tail = if info.deleted { "  [deleted]" } else { "" };
    println!(
        "{}  {}  type={ty}  units={:?}  {value}{tail}",
        info.path, info.kind, info.units
    );
}

fn cmd_get(hub: &DataHub, path: &str, json: bool) -> Result<()> {
    let info = hub
        .inspect(path)
        .with_context(|| format!("no resource at {path}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }
    Ok(())
}

fn cmd_set(hub: &mut DataHub, setting: SetCommand) -> Result<()> {
    match setting {
        SetCommand::Override { path, ty, value } => {
            let value = parse_cli_value(&ty, &value)?;
            hub.set_override(&path, value)?;
        }
        SetCommand::Default { path, ty, value } => {
            let value = parse_cli_value(&ty, &value)?;
            hub.set_default(&path, value)?;
        }
        SetCommand::Source { dst, src } => hub.set_source(&dst, src.as_deref())?,
        SetCommand::Extraction { path, spec } => hub.set_json_extraction(&path, &spec)?,
        SetCommand::Units { path, units } => hub.set_units(&path, &units)?,
        SetCommand::Observation {
            path,
            min_period,
            low,
            high,
            change_by,
            buffer,
            backup_period,
        } => {
            let mut cfg = ObservationConfig::default();
            if let Some(v) = min_period {
                cfg.min_period = v;
            }
            if let Some(v) = low {
                cfg.low_limit = v;
            }
            if let Some(v) = high {
                cfg.high_limit = v;
            }
            if let Some(v) = change_by {
                cfg.change_by = v;
            }
            if let Some(v) = buffer {
                cfg.buffer_max_count = v;
            }
            if let Some(v) = backup_period {
                cfg.buffer_backup_period = v;
            }
            hub.create_observation(&path, cfg)?;
        }
        SetCommand::Tracking { state } => match state.as_str() {
            "on" => hub.set_deletion_tracking(true),
            "off" => hub.set_deletion_tracking(false),
            other => anyhow::bail!("expected on|off, got {other:?}"),
        },
    }
    println!("ok");
    Ok(())
}

fn parse_cli_value(ty: &str, tokens: &[String]) -> Result<datahub_core::sample::Value> {
    let ty = SampleType::from_name(ty)?;
    let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    script::parse_value(ty, &refs)
}

fn cmd_push(
    hub: &mut DataHub,
    path: &str,
    ty: &str,
    value: &[String],
    ts: f64,
    units: &str,
) -> Result<()> {
    let parsed = parse_cli_value(ty, value)?;
    hub.push(path, units, datahub_core::sample::Sample::new(ts, parsed))?;
    match hub.inspect(path) {
        Some(info) => print_info(&info),
        None => println!("ok"),
    }
    Ok(())
}

fn cmd_list(hub: &DataHub, json: bool, deleted: bool) -> Result<()> {
    let infos = hub.list(deleted);
    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }
    if infos.is_empty() {
        println!("(empty tree)");
    }
    for info in &infos {
        print_info(info);
    }
    Ok(())
}

/// Register a handler on `path` and feed push directives from stdin into
/// the hub; accepted samples print as they arrive. EOF ends the watch.
fn cmd_watch(hub: DataHub, path: &str, ty: &str) -> Result<()> {
    use std::cell::RefCell;
    use std::io::BufRead as _;
    use std::rc::Rc;

    let ty = SampleType::from_name(ty)?;
    let hub = Rc::new(RefCell::new(hub));
    let watched = path.to_string();

    hub.borrow_mut().add_push_handler(
        path,
        ty,
        Box::new(move |_hub, sample| {
            println!(
                "{}\t{}\t{}",
                watched,
                sample.timestamp(),
                sample.value().to_display_string()
            );
        }),
    )?;

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if let Err(err) = script::apply_line(&mut hub.borrow_mut(), &line) {
            eprintln!("error: {err:#}");
        }
    }
    Ok(())
}
