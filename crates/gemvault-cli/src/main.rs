//! Gemvault CLI
//!
//! Runs JSON-lines operation scripts against an in-process reward service
//! and prints the reward tables and effective configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use gemvault_core::Tier;
use gemvault_economics::{ActionType, LockPeriod};
use gemvault_node::{handle_json, RewardService, ServiceConfig};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "gemvault")]
#[command(version)]
#[command(about = "Gemvault - multi-currency reward & protection ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "GEMVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a JSON-lines operation script, printing one reply per line
    Exec {
        /// Script path, `-` for stdin
        script: PathBuf,

        /// Stop at the first failed operation
        #[arg(long)]
        fail_fast: bool,

        /// Print published events to stderr
        #[arg(long)]
        events: bool,
    },

    /// Print reward, stake, shield and plan tables
    Tables,

    /// Print the effective configuration as TOML
    Config,

    /// Version information
    Version,
}

fn init_logging(config: &ServiceConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { config.logging.level.as_str() };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_writer(std::io::stderr))
            .init();
    }
}

fn open_script(path: &Path) -> anyhow::Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(std::io::stdin())));
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open script {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

async fn exec(
    config: ServiceConfig,
    script: PathBuf,
    fail_fast: bool,
    print_events: bool,
) -> anyhow::Result<()> {
    let service = RewardService::new(config)?;

    let printer = print_events.then(|| {
        let mut rx = service.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{line}"),
                        Err(err) => tracing::warn!("Unprintable event: {}", err),
                    },
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Event printer lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let reader = open_script(&script)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0usize;
    let mut executed = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", index + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let reply = handle_json(&service, trimmed);
        executed += 1;
        writeln!(out, "{}", serde_json::to_string(&reply)?)?;

        if !reply.ok {
            failures += 1;
            if fail_fast {
                anyhow::bail!("line {} failed: {:?}", index + 1, reply.error);
            }
        }
        // Let the printer task drain between operations
        tokio::task::yield_now().await;
    }
    out.flush()?;

    tracing::info!(executed, failures, "Script finished");

    drop(service);
    if let Some(printer) = printer {
        printer.await?;
    }
    Ok(())
}

fn print_tables(config: &ServiceConfig) -> anyhow::Result<()> {
    let calculator = config.reward_calculator()?;
    let coverage = config.coverage_table()?;

    println!("Tier multipliers");
    for (tier, multiplier) in calculator.tiers().iter() {
        println!("  {:<10} {}", tier.name(), multiplier);
    }

    println!();
    println!("Rewards at free tier (points gems keys, in-app / external)");
    for action in ActionType::ALL {
        let in_app = calculator.compute(action, false, Tier::Free)?;
        let external = calculator.compute(action, true, Tier::Free)?;
        println!(
            "  {:<16} {:>5} {:>4} {:>4}   / {:>6} {:>4} {:>4}",
            action.name(),
            in_app.points,
            in_app.gems,
            in_app.keys,
            external.points,
            external.gems,
            external.keys
        );
    }

    println!();
    println!("Stake locks");
    let bonuses: Vec<_> = coverage.bonuses().collect();
    for lock in LockPeriod::ALL {
        let bonus = bonuses
            .iter()
            .find(|(l, _)| *l == lock)
            .map(|(_, b)| *b)
            .unwrap_or(0);
        println!(
            "  {:>3} days   multiplier {}   shield bonus +{}%",
            lock.days(),
            lock.multiplier(),
            bonus
        );
    }

    println!();
    println!("Shield coverage");
    for (tier, percent) in coverage.tiers() {
        println!("  {:<10} {}%", tier.name(), percent);
    }

    println!();
    println!("Advertiser plans");
    for (plan, terms) in config.plan_terms() {
        println!(
            "  {:<8} {:>6} moves   {:>5} gems",
            plan.name(),
            terms.moves,
            terms.price_gems
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ServiceConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Exec {
            script,
            fail_fast,
            events,
        } => {
            exec(config, script, fail_fast, events).await?;
        }

        Commands::Tables => {
            print_tables(&config)?;
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Version => {
            println!("gemvault {}", env!("CARGO_PKG_VERSION"));
            println!("Currencies: points, gems, keys, gold");
            println!("Tiers: {}", Tier::ALL.map(|t| t.name()).join(", "));
        }
    }

    Ok(())
}
