//! MT5 Trade Copier
//!
//! Mirrors positions from a master MetaTrader 5 account onto a slave
//! account: opens, closes, partial closes, and SL/TP changes, with
//! configurable lot sizing and a durable ticket mapping.

mod config;
mod copier;
mod gateway;
mod models;
mod monitor;
mod notify;
mod runner;
mod store;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{CopyMode, CopySettings};
use crate::gateway::MockGateway;
use crate::notify::LogNotifier;
use crate::runner::{Engine, Topology};
use crate::store::MappingStore;

/// MT5 trade-copier CLI.
#[derive(Parser)]
#[command(name = "mt5copier")]
#[command(about = "Copy trades from a master MT5 account to a slave account", long_about = None)]
struct Cli {
    /// Mapping file path
    #[arg(short, long, default_value = "./position_map.json")]
    map_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the copy engine
    Run {
        /// Lot sizing mode
        #[arg(long, value_enum, default_value = "same-lot")]
        mode: CopyMode,

        /// Lot size for fixed-lot mode
        #[arg(long, default_value = "0.01")]
        fixed_lot: Decimal,

        /// Multiplier for ratio mode
        #[arg(long, default_value = "1.0")]
        ratio: Decimal,

        /// Risk cap as a fraction of balance (0.05 = 5%)
        #[arg(long, default_value = "0.05")]
        max_risk: Decimal,

        /// Assumed stop distance in points when the master has no SL
        #[arg(long, default_value = "200")]
        default_sl_points: Decimal,

        /// Only copy these symbols (repeatable)
        #[arg(long = "symbol")]
        whitelist: Vec<String>,

        /// Never copy these symbols (repeatable)
        #[arg(long = "skip-symbol")]
        blacklist: Vec<String>,

        /// Maximum concurrently mapped slave positions (0 = no cap)
        #[arg(long, default_value = "0")]
        max_positions: usize,

        /// Maximum slippage in points for slave orders
        #[arg(long, default_value = "20")]
        max_slippage: u32,

        /// Master polling interval in milliseconds
        #[arg(short, long, default_value = "500")]
        interval: u64,

        /// Deployment topology
        #[arg(long, value_enum, default_value = "dual")]
        topology: Topology,

        /// Dry run against simulated terminals (no real accounts)
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the effective configuration
    Config,

    /// List the persisted master->slave mappings
    Mappings,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            mode,
            fixed_lot,
            ratio,
            max_risk,
            default_sl_points,
            whitelist,
            blacklist,
            max_positions,
            max_slippage,
            interval,
            topology,
            dry_run,
        } => {
            let settings = CopySettings {
                mode,
                fixed_lot,
                ratio,
                default_sl_points,
                max_risk_percent: max_risk,
                symbol_whitelist: whitelist,
                symbol_blacklist: blacklist,
                max_slave_positions: max_positions,
                max_slippage_points: max_slippage,
                poll_interval_ms: interval,
            };

            if !dry_run {
                anyhow::bail!(
                    "No live terminal transport is configured in this build; \
                     run with --dry-run to use simulated terminals"
                );
            }

            let master: Arc<dyn gateway::TerminalGateway> =
                Arc::new(MockGateway::new("master", Decimal::from(10_000)));
            let slave: Arc<dyn gateway::TerminalGateway> =
                Arc::new(MockGateway::new("slave", Decimal::from(10_000)));

            let store = Arc::new(MappingStore::open(cli.map_file.clone()));
            for mapping in store.all() {
                info!(
                    master_ticket = mapping.master_ticket,
                    slave_ticket = mapping.slave_ticket,
                    symbol = %mapping.symbol,
                    "Loaded mapping"
                );
            }

            let engine = Engine::new(
                master,
                slave,
                store,
                Arc::new(LogNotifier::new()),
                settings,
            );

            // Ctrl+C flips the shutdown flag; the loops wind down
            // cooperatively and flush the mapping file.
            let shutdown = engine.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    shutdown.store(true, Ordering::SeqCst);
                }
            });

            println!("\n=== MT5 Trade Copier ===");
            println!("Mode: DRY RUN (simulated terminals)");
            println!("Mapping file: {}", cli.map_file.display());
            println!("\nPress Ctrl+C to stop.\n");

            engine.run(topology).await?;
        }

        Commands::Config => {
            let settings = CopySettings::default();

            println!("\n=== Copy Configuration ===\n");
            println!("Sizing:");
            println!("  Mode:              {:?}", settings.mode);
            println!("  Fixed Lot:         {}", settings.fixed_lot);
            println!("  Ratio:             {}", settings.ratio);
            println!("  Max Risk:          {}%", settings.max_risk_percent * Decimal::from(100));
            println!("  Default SL Points: {}", settings.default_sl_points);

            println!("\nFilters:");
            println!("  Whitelist:         {:?}", settings.symbol_whitelist);
            println!("  Blacklist:         {:?}", settings.symbol_blacklist);
            println!("  Max Positions:     {} (0 = no cap)", settings.max_slave_positions);

            println!("\nExecution:");
            println!("  Max Slippage:      {} points", settings.max_slippage_points);
            println!("  Poll Interval:     {}ms", settings.poll_interval_ms);
        }

        Commands::Mappings => {
            let store = MappingStore::open(cli.map_file.clone());
            let mappings = store.all();

            if mappings.is_empty() {
                println!("No mappings in {}", cli.map_file.display());
                return Ok(());
            }

            println!(
                "\n{:>10} {:>10} {:<10} {:<4} {:>8} {:>8}",
                "MASTER", "SLAVE", "SYMBOL", "DIR", "M.VOL", "S.VOL"
            );
            println!("{}", "-".repeat(56));

            let mut sorted = mappings;
            sorted.sort_by_key(|m| m.master_ticket);
            for m in sorted {
                println!(
                    "{:>10} {:>10} {:<10} {:<4} {:>8} {:>8}",
                    m.master_ticket,
                    m.slave_ticket,
                    m.symbol,
                    m.direction.as_str(),
                    m.master_volume,
                    m.slave_volume
                );
            }
        }
    }

    Ok(())
}
