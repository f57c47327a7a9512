//! janet-claims binary
//!
//! Inspects a terrain data directory and answers protection queries against
//! it, or keeps an index open with background saving until Ctrl-C.
//!
//! ## Configuration (TOML via `--config`, then env via `config` crate)
//!
//! | Key                          | Default    | Description                        |
//! |------------------------------|------------|------------------------------------|
//! | `CLAIMS_DATA_DIR`            | `terrains` | Directory of terrain records       |
//! | `CLAIMS_SAVE_DELAY_MS`       | `2000`     | Debounce before a save cycle       |
//! | `CLAIMS_LIMITS__CHUNK_CAP`   | `4096`     | Max chunks indexed per terrain     |
//! | `CLAIMS_LIMITS__BORDER_AREA_CAP` | `100000` | Max area with traced borders     |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use janet_claims::{
    ActorId, ClaimsConfig, Protections, TerrainIndex, TerrainRelations, WorldCoordinate, WorldId,
};
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "janet-claims", about = "Janet Claims terrain engine", version)]
struct Args {
    /// TOML file layered over the defaults
    #[arg(long, env = "CLAIMS_CONFIG")]
    config: Option<PathBuf>,

    /// Terrain data directory (overrides the config file)
    #[arg(long, env = "CLAIMS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print index statistics as JSON
    Stats,

    /// List stored terrains, highest priority first
    List {
        /// Only terrains of this world
        #[arg(long)]
        world: Option<WorldId>,
    },

    /// Resolve one boolean flag for an actor at a point
    Check {
        #[arg(long)]
        world: WorldId,
        #[arg(long, allow_hyphen_values = true)]
        x: f64,
        #[arg(long, allow_hyphen_values = true)]
        y: f64,
        #[arg(long, allow_hyphen_values = true)]
        z: f64,
        #[arg(long)]
        actor: ActorId,
        #[arg(long, default_value = "build")]
        flag: String,
    },

    /// Keep the index open with background saves until Ctrl-C
    Serve,
}

fn load_config(args: &Args) -> Result<ClaimsConfig> {
    let mut config =
        ClaimsConfig::load(args.config.as_deref()).context("reading configuration")?;

    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("janet_claims=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    tracing::info!(
        "Starting janet-claims (data_dir='{}', save_delay={}ms)",
        config.data_dir.display(),
        config.save_delay_ms,
    );

    let index = TerrainIndex::open(config);
    let report = index.load().context("loading terrains")?;
    if report.quarantined > 0 {
        tracing::warn!("{} terrain files were quarantined", report.quarantined);
    }
    index.start(tokio::runtime::Handle::current());

    let outcome = run(&index, args.command).await;

    let flushed = index.shutdown();
    tracing::info!(
        "Shut down ({} written, {} deleted, {} failed)",
        flushed.written,
        flushed.deleted,
        flushed.failed
    );
    outcome
}

async fn run(index: &TerrainIndex, command: Command) -> Result<()> {
    match command {
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&index.stats())?);
        }

        Command::List { world } => {
            let mut terrains = match world {
                Some(world) => index.terrains_in(world),
                None => index.all_terrains(),
            };
            if world.is_none() {
                terrains.sort_by_key(|t| std::cmp::Reverse(t.priority()));
            }
            for terrain in terrains {
                println!(
                    "{}  {:<24} prio={:<11} world={} {} → {}",
                    terrain.id(),
                    terrain.name(),
                    terrain.priority(),
                    terrain.world(),
                    terrain.min_diagonal(),
                    terrain.max_diagonal(),
                );
            }
        }

        Command::Check {
            world,
            x,
            y,
            z,
            actor,
            flag,
        } => {
            let Some(flag) = index.flag_registry().get_typed::<bool>(&flag) else {
                bail!("'{flag}' is not a known boolean flag");
            };
            let protections = Protections::new(index.clone(), Arc::new(TerrainRelations::new()));
            let at = WorldCoordinate::at(world, x, y, z);
            let allowed = protections.is_allowed(actor, &at, &flag);
            println!("{} {} at {}: {}", actor, flag.id(), at, if allowed { "allow" } else { "deny" });
        }

        Command::Serve => {
            tracing::info!("Serving {} terrains, Ctrl-C to stop", index.stats().terrains);
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            tracing::info!("Received Ctrl-C, shutting down");
        }
    }
    Ok(())
}
