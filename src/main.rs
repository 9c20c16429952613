//! zpoolctl
//!
//! Command-line host for the ZFS pool reconciler. One invocation manages one
//! pool, whose recorded state lives in a JSON file.
//!
//! ```text
//! zpoolctl apply --file tank.yaml      create or converge the pool
//! zpoolctl refresh                     re-read the pool, report drift
//! zpoolctl import <guid|name>          start managing an existing pool
//! zpoolctl show                        print the recorded state
//! zpoolctl destroy                     destroy the pool
//! zpoolctl schema                      print the declaration schema
//! ```

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zpool_reconciler::{
    ApplyOptions, BackendFactory, PoolController, PoolDeclaration, Reconciler, Result,
    StateStore, ZpoolCliConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Declarative lifecycle management for ZFS storage pools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command backend (zpool, memory)
    #[arg(long, env = "ZPOOL_BACKEND", default_value = "zpool")]
    backend: String,

    /// Path to the zpool binary
    #[arg(long, env = "ZPOOL_BIN", default_value = "zpool")]
    zpool_bin: String,

    /// Run zpool through this program (e.g. sudo, pfexec)
    #[arg(long, env = "ZPOOL_SUDO")]
    sudo: Option<String>,

    /// State file of the managed pool
    #[arg(long, env = "ZPOOLCTL_STATE", default_value = "zpoolctl.state.json")]
    state: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the declared pool or converge it in place
    Apply {
        /// Declaration file (YAML or JSON)
        #[arg(long, short)]
        file: PathBuf,

        /// Destroy and recreate the pool when its layout changed
        #[arg(long)]
        allow_replace: bool,

        /// Create even if devices appear to be in use
        #[arg(long)]
        force: bool,
    },

    /// Re-read the managed pool and record what was observed
    Refresh,

    /// Destroy the managed pool
    Destroy,

    /// Start managing an existing pool
    Import {
        /// Pool GUID or name
        id: String,
    },

    /// Print the recorded state
    Show,

    /// Print the JSON schema of the declaration format
    Schema,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(err) = run(args).await {
        error!("{}", err);
        eprintln!("error: {}", err);
        std::process::exit(err.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    if let Command::Schema = args.command {
        println!("{}", PoolDeclaration::json_schema()?);
        return Ok(());
    }

    info!("Starting {} {}", zpool_reconciler::NAME, zpool_reconciler::VERSION);
    info!("  Backend: {}", args.backend);
    info!("  State: {}", args.state.display());

    let config = ZpoolCliConfig {
        zpool_path: args.zpool_bin.clone(),
        privilege_wrapper: args.sudo.clone(),
    };
    let commands = BackendFactory::create(&args.backend, config)?;
    let reconciler = Reconciler::new(
        PoolController::new(commands),
        StateStore::new(args.state.clone()),
    );

    match args.command {
        Command::Apply {
            file,
            allow_replace,
            force,
        } => {
            let declaration = PoolDeclaration::load(&file).await?;
            let desired = declaration.desired()?;
            let outcome = reconciler
                .apply(
                    &desired,
                    ApplyOptions {
                        allow_replace,
                        force,
                    },
                )
                .await?;
            info!("Applied {} to pool {}", outcome.action, outcome.state.name);
            print_json(&outcome)?;
        }
        Command::Refresh => match reconciler.refresh().await? {
            Some(state) => {
                for drift in &state.drift {
                    warn!("Drift on {}: {:?} -> {:?}", drift.name, drift.declared, drift.observed);
                }
                print_json(&state)?;
            }
            None => info!("No pool is managed by {}", args.state.display()),
        },
        Command::Destroy => {
            if reconciler.destroy().await? {
                info!("Pool destroyed");
            } else {
                info!("No pool is managed by {}", args.state.display());
            }
        }
        Command::Import { id } => {
            let state = reconciler.import(&id).await?;
            print_json(&state)?;
        }
        Command::Show => match reconciler.show().await? {
            Some(state) => print_json(&state)?,
            None => info!("No pool is managed by {}", args.state.display()),
        },
        Command::Schema => {}
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so stdout stays parseable JSON
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
