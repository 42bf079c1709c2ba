//! `smem-cli`: a development toolkit exercising the fabric's safe API —
//! join a rank, allocate a slice, run a two-rank copy, or validate a
//! `FabricConfig` file — without writing a test harness by hand.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use smem_types::{CopyDirection, Tier};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smem-cli", about = "Exercise the shared-memory fabric's safe API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Host,
    Device,
}

impl From<TierArg> for Tier {
    fn from(t: TierArg) -> Self {
        match t {
            TierArg::Host => Tier::HostDram,
            TierArg::Device => Tier::DeviceHbm,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Push,
    Pull,
}

impl From<DirectionArg> for CopyDirection {
    fn from(d: DirectionArg) -> Self {
        match d {
            DirectionArg::Push => CopyDirection::Push,
            DirectionArg::Pull => CopyDirection::Pull,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Bring up a single entity and reserve its GVA sub-window.
    Join {
        #[arg(long, default_value_t = 1)]
        world_size: u32,
        #[arg(long, default_value_t = 0)]
        rank_id: u32,
        #[arg(long, default_value_t = 4 * 1024 * 1024)]
        host_size: u64,
        #[arg(long, default_value_t = 0)]
        hbm_size: u64,
    },
    /// Join, then allocate one slice, printing its index/address/size.
    Alloc {
        #[arg(long, default_value_t = 1)]
        world_size: u32,
        #[arg(long, default_value_t = 0)]
        rank_id: u32,
        #[arg(long, value_enum, default_value_t = TierArg::Host)]
        tier: TierArg,
        #[arg(long, default_value_t = 4096)]
        size: u64,
    },
    /// Run a two-rank exchange-and-copy demonstration.
    Copy {
        #[arg(long, default_value_t = 4096)]
        len: u64,
        #[arg(long, value_enum, default_value_t = DirectionArg::Push)]
        direction: DirectionArg,
    },
    /// Load and validate a `FabricConfig` TOML file.
    Inspect {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match Cli::parse().command {
        Command::Join { world_size, rank_id, host_size, hbm_size } => {
            let ptr = smem_cli::join(world_size, rank_id, host_size, hbm_size).await?;
            println!("reserved gva base: {ptr:#x}");
        }
        Command::Alloc { world_size, rank_id, tier, size } => {
            let (index, va, size) = smem_cli::alloc(world_size, rank_id, tier.into(), size).await?;
            println!("allocated slice {index}: va={va:#x} size={size}");
        }
        Command::Copy { len, direction } => {
            let observed = smem_cli::copy(len, direction.into()).await?;
            println!("copied {len} bytes; destination now reads: {}", hex::encode(observed));
        }
        Command::Inspect { config } => {
            let cfg = smem_cli::inspect(&config)?;
            println!(
                "store_url={} world_size={} rank_id={:?} ops={:?} scene={:?}",
                cfg.store_url,
                cfg.world_size,
                cfg.rank_id,
                cfg.op_type_mask()?,
                cfg.scene()?
            );
        }
    }
    Ok(())
}
