//! keel-sim - Boot a Keel system on the host
//!
//! Commands:
//! - `keel-sim boot` - Boot and print capabilities, apps and services
//! - `keel-sim launch <app-id>` - Launch an app and print its result
//! - `keel-sim services` - Start services and print their states
//!
//! `--without <capability>` drops a factory from the simulated board to show
//! how the system degrades.

mod demo;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use keel_app::{Bundle, LaunchState, Value};
use keel_hal::CapabilityKind;
use keel_hal_mock::SimulatedBoard;
use keel_service::ServiceState;
use keel_system::{System, SystemConfig};

#[derive(Parser)]
#[command(name = "keel-sim")]
#[command(author = "Keel Contributors")]
#[command(version)]
#[command(about = "Keel system simulator", long_about = None)]
struct Cli {
    /// System configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Remove a capability from the simulated board (repeatable)
    #[arg(short, long, global = true)]
    without: Vec<CapabilityKind>,

    /// Boot with the SD card slot empty
    #[arg(long, global = true)]
    no_sdcard: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot and show what the system found
    Boot,

    /// Launch an app and wait for its result
    Launch {
        /// App id
        app_id: String,

        /// Parameter passed to the app, as key=value (repeatable)
        #[arg(short, long, value_parser = parse_param)]
        param: Vec<(String, Value)>,

        /// Stop the app after this many milliseconds
        #[arg(short, long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Start services and show their states
    Services {
        /// Service to start in addition to the autostart ones (repeatable)
        #[arg(short, long)]
        start: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let system = boot(&cli)?;
    let outcome = match &cli.command {
        Commands::Boot => {
            show_boot(&system);
            Ok(())
        }
        Commands::Launch {
            app_id,
            param,
            timeout_ms,
        } => launch(&system, app_id, param, Duration::from_millis(*timeout_ms)),
        Commands::Services { start } => services(&system, start),
    };

    system.shutdown();
    outcome
}

fn boot(cli: &Cli) -> anyhow::Result<System> {
    let config = match &cli.config {
        Some(path) => SystemConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SystemConfig::default(),
    };

    let board = cli
        .without
        .iter()
        .fold(SimulatedBoard::default(), |board, kind| board.without(*kind))
        .card_inserted(!cli.no_sdcard);
    let (board, _devices) = board.build();

    System::boot(&board, config, demo::apps(), demo::services()).context("boot failed")
}

fn show_boot(system: &System) {
    println!(
        "{} Booted board '{}'",
        "⚙".green(),
        system.hal().board_name().bold()
    );

    println!("\n{}", "Capabilities".bold());
    for kind in CapabilityKind::ALL {
        if system.hal().has(kind) {
            println!("  {} {}", "✓".green(), kind);
        } else {
            println!("  {} {}", "✗".red(), kind.as_str().dimmed());
        }
    }

    println!("\n{}", "Devices".bold());
    for (kind, name) in system.hal().devices() {
        println!("  {:<10} {}", kind.to_string(), name);
    }

    println!("\n{}", "Apps".bold());
    let available = system.hal().available();
    for manifest in system.manifests().list() {
        let missing = manifest.required_capabilities.difference(available);
        let status = if missing.is_empty() {
            "launchable".green()
        } else {
            format!("missing {}", kind_list(missing.kinds())).as_str().yellow()
        };
        println!("  {:<20} {:<10} {}", manifest.id, manifest.name, status);
    }

    println!("\n{}", "Services".bold());
    for context in system.services().list() {
        println!("  {:<20} {}", context.id(), context.state());
    }
}

fn launch(
    system: &System,
    app_id: &str,
    params: &[(String, Value)],
    timeout: Duration,
) -> anyhow::Result<()> {
    let parameters: Bundle = params.iter().cloned().collect();
    let apps = system.apps();

    println!("{} Launching {}...", "🚀".green(), app_id.bold());
    let launch = apps
        .launch(app_id, parameters)
        .with_context(|| format!("cannot launch {app_id}"))?;

    if !apps.wait_for_state(launch, LaunchState::Stopped, timeout)? {
        println!("  {} still running after {:?}, stopping", launch, timeout);
        apps.stop(launch, Bundle::new())?;
        apps.wait_for_state(launch, LaunchState::Stopped, timeout)?;
    }

    let result = apps.take_result(launch)?;
    println!("{} {} stopped", "✓".green(), launch);
    if result.is_empty() {
        println!("  (empty result)");
    }
    for (key, value) in result.iter() {
        println!("  {key} = {value}");
    }
    Ok(())
}

fn services(system: &System, start: &[String]) -> anyhow::Result<()> {
    for id in start {
        system
            .services()
            .start(id, Bundle::new())
            .with_context(|| format!("cannot start {id}"))?;
    }

    for context in system.services().list() {
        let state = match context.state() {
            ServiceState::Running => context.state().as_str().green(),
            other => other.as_str().dimmed(),
        };
        println!("  {:<20} {}", context.id(), state);
        println!("    data: {}", context.paths().data_directory().display());
    }
    Ok(())
}

fn kind_list(kinds: impl Iterator<Item = CapabilityKind>) -> String {
    kinds.map(|kind| kind.to_string()).collect::<Vec<_>>().join(", ")
}

/// Parse `key=value`, typing the value as bool, i32, i64 or string
fn parse_param(text: &str) -> Result<(String, Value), String> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {text:?}"))?;
    if key.is_empty() {
        return Err("empty parameter name".to_string());
    }

    let value = if let Ok(flag) = value.parse::<bool>() {
        Value::Bool(flag)
    } else if let Ok(number) = value.parse::<i32>() {
        Value::Int32(number)
    } else if let Ok(number) = value.parse::<i64>() {
        Value::Int64(number)
    } else {
        Value::String(value.to_string())
    };
    Ok((key.to_string(), value))
}
