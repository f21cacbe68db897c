use anyhow::Context;
use broker::{Broker, SimulatedBroker};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use configuration::{Config, LogFormat, init_tracing, load_config};
use core_types::{Bar, Order, Position};
use database::{DbRepository, MemoryStore, Store, connect, run_migrations};
use engine::{Engine, EngineParts, MarketEvent, StateReconciler, StrategyPipeline, spawn_signal_loop};
use risk::SimpleRiskManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strategies::StrategyRegistry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

/// The main entry point for the Helm trading engine.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be set.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let mut config = load_config(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            if let Some(format) = cli.log_format {
                config.logging.format = format;
            }
            let _guard = init_tracing(&config.logging)?;
            handle_run(config, args).await
        }
        Commands::Strategies => {
            for name in StrategyRegistry::with_builtins().list() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::CheckConfig => {
            let config = load_config(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            StrategyRegistry::with_builtins().resolve(&config.strategies)?;
            println!(
                "{} is valid: {} symbols, {} strategy instances, max position {}, max daily loss {}",
                cli.config.display(),
                config.engine.symbols.len(),
                config.strategies.len(),
                config.risk_management.max_position_pct,
                config.risk_management.max_daily_loss_pct,
            );
            Ok(())
        }
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A risk-gated order engine driven by pluggable strategies.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides `logging.format` from the configuration.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded bars through the strategies against the paper venue.
    Run(RunArgs),
    /// List the built-in strategies.
    Strategies,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[derive(Parser)]
struct RunArgs {
    /// Market data to replay: one JSON bar per line.
    #[arg(long)]
    bars: PathBuf,

    /// How often unconfirmed orders are reconciled with the venue.
    #[arg(long, default_value_t = 1_000)]
    sweep_ms: u64,
}

// ==============================================================================
// Run Command Logic
// ==============================================================================

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    if config.database.url.is_none() && std::env::var("DATABASE_URL").is_err() {
        tracing::info!("No database configured; keeping state in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let pool = connect(&config.database).await?;
    run_migrations(&pool).await?;
    Ok(Arc::new(DbRepository::new(pool)))
}

/// Wires the engine together, replays the bar file and prints the final state.
async fn handle_run(config: Config, args: RunArgs) -> anyhow::Result<()> {
    let instances = StrategyRegistry::with_builtins().resolve(&config.strategies)?;
    let store = open_store(&config).await?;

    let (broker, reports) = SimulatedBroker::new(config.simulation.clone());
    let broker = Arc::new(broker);
    let engine = Arc::new(Engine::new(EngineParts {
        settings: config.engine.clone(),
        risk: config.risk_management.clone(),
        broker: broker.clone(),
        store,
        risk_manager: Arc::new(SimpleRiskManager::new(config.risk_management.clone())?),
    })?);
    engine.init().await?;

    let (stop_tx, stop_rx) = oneshot::channel();
    let reconciler = StateReconciler::new(engine.clone(), reports, Duration::from_millis(args.sweep_ms));
    let reconciler = tokio::spawn(reconciler.start(stop_rx));

    let (pipeline, signals) = StrategyPipeline::spawn(instances, config.engine.report_buffer);
    let signal_loop = spawn_signal_loop(engine.clone(), signals);
    tracing::info!(instances = pipeline.instance_count(), bars = %args.bars.display(), "Replay started");

    let file = tokio::fs::File::open(&args.bars)
        .await
        .with_context(|| format!("opening {}", args.bars.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    let mut replayed = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let bar: Bar = serde_json::from_str(line)
            .with_context(|| format!("{}:{line_no}: malformed bar", args.bars.display()))?;

        let event = MarketEvent::Bar(bar);
        broker.set_price(event.symbol(), event.price()).await;
        engine.on_market_event(&event);
        pipeline.publish(event).await;
        replayed += 1;
    }

    pipeline.shutdown().await;
    let submitted = signal_loop.await?;
    // The receiver is gone only if the reconciler already stopped on its own.
    let _ = stop_tx.send(());
    reconciler.await?;
    tracing::info!(replayed, submitted, "Replay finished");

    let account = broker.get_account().await?;
    println!(
        "Equity {}  Cash {}  Realized today {}",
        account.equity, account.cash, account.realized_pnl_today
    );
    println!("{}", positions_table(&engine.positions()));
    println!("{}", orders_table(&engine.orders()));
    Ok(())
}

fn positions_table(positions: &[Position]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Symbol", "Side", "Qty", "Avg Entry", "Market Value"]);
    for p in positions {
        table.add_row(vec![
            p.symbol.clone(),
            p.side.to_string(),
            p.qty.to_string(),
            p.avg_entry_price.round_dp(4).to_string(),
            p.market_value.round_dp(2).to_string(),
        ]);
    }
    table
}

fn orders_table(orders: &[Order]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Order", "Strategy", "Symbol", "Side", "Type", "Qty", "Filled", "Avg Price", "Status",
    ]);
    for o in orders {
        table.add_row(vec![
            o.id.to_string(),
            o.strategy_id.clone().unwrap_or_default(),
            o.symbol.clone(),
            o.side.to_string(),
            o.order_type.to_string(),
            o.qty.to_string(),
            o.filled_qty.to_string(),
            o.filled_avg_price
                .map(|p| p.round_dp(4).to_string())
                .unwrap_or_default(),
            o.status.to_string(),
        ]);
    }
    table
}
