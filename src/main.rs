//! Zentrack aggregation CLI
//!
//! Hourly usage feature windows for fatigue scoring.

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use zentrack_aggregator::{
    config::Config,
    core::{FeatureAggregator, RangeScheduler},
    ingest::IngestPipeline,
    replay::{replay, ReplayOptions},
    store::{MemoryEventLog, MemoryWindowStore},
    transparency::create_shared_log_with_persistence,
    PRIVACY_DECLARATION, VERSION,
};

#[derive(Parser)]
#[command(name = "zentrack-agg")]
#[command(author = "Zentrack")]
#[command(version = VERSION)]
#[command(about = "Hourly usage feature windows for fatigue scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API until Ctrl+C (requires server feature)
    Serve {
        /// Port to listen on (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Replay a JSON Lines event file and print the resulting windows
    Replay {
        /// File with one event object per line
        #[arg(long, short)]
        file: PathBuf,

        /// User the events belong to
        #[arg(long, short)]
        user: String,

        /// Events per ingested batch
        #[arg(long, default_value = "50")]
        batch_size: usize,

        /// Recompute every window instead of reusing ones refreshed during ingest
        #[arg(long)]
        force: bool,
    },

    /// Show cumulative processing statistics
    Status,

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            cmd_serve(port);
        }
        Commands::Replay {
            file,
            user,
            batch_size,
            force,
        } => {
            cmd_replay(file, &user, batch_size, force);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Privacy => {
            cmd_privacy();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config ({e}), using defaults");
            Config::default()
        }
    }
}

#[cfg(feature = "server")]
fn cmd_serve(port: Option<u16>) {
    use zentrack_aggregator::server::{serve, ServerConfig, ServerState};

    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let mut server_config = ServerConfig::from_config(&config);
    if let Some(port) = port {
        server_config.port = port;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error creating runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async move {
        let state = match ServerState::new(&server_config) {
            Ok(state) => Arc::new(state),
            Err(e) => {
                eprintln!("Error initializing server: {e}");
                std::process::exit(1);
            }
        };

        let (addr, shutdown_tx) = match serve(state.clone(), server_config.port).await {
            Ok(running) => running,
            Err(e) => {
                eprintln!("Error starting server: {e}");
                std::process::exit(1);
            }
        };

        println!("Zentrack aggregator v{VERSION}");
        println!("Listening on http://{addr}");
        println!(
            "Scorer: {}",
            if server_config.scorer.enabled {
                server_config.scorer.predict_url()
            } else {
                "disabled".to_string()
            }
        );
        println!("Press Ctrl+C to stop.");

        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Error waiting for Ctrl+C: {e}");
        }

        println!();
        println!("Stopping...");
        let _ = shutdown_tx.send(());

        if let Err(e) = state.transparency().save() {
            eprintln!("Warning: Could not save transparency log: {e}");
        }
        println!("{}", state.transparency().summary());
    });
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_port: Option<u16>) {
    eprintln!("Error: the server feature is not enabled at compile time.");
    eprintln!("Rebuild with: cargo build --features server");
    std::process::exit(1);
}

fn cmd_replay(file: PathBuf, user: &str, batch_size: usize, force: bool) {
    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let reader = match File::open(&file) {
        Ok(f) => BufReader::new(f),
        Err(e) => {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        }
    };

    let transparency = create_shared_log_with_persistence(config.transparency_path());
    let events = Arc::new(MemoryEventLog::new());
    let aggregator = FeatureAggregator::new(events.clone(), config.feature_params());
    let scheduler = RangeScheduler::new(aggregator, Arc::new(MemoryWindowStore::new()))
        .with_max_hours(config.max_range_hours)
        .with_transparency_log(transparency.clone());
    let pipeline = IngestPipeline::new(events, scheduler).with_transparency_log(transparency.clone());

    let options = ReplayOptions {
        batch_size,
        force_recompute: force,
    };

    let report = match replay(reader, user, &pipeline, &options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error replaying events: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = transparency.save() {
        eprintln!("Warning: Could not save transparency log: {e}");
    }

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing windows: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_status() {
    let config = load_config();

    println!("Zentrack Aggregator Status");
    println!("==========================");
    println!();
    println!("Configuration:");
    println!("  Session gap: {} min", config.session_gap_minutes);
    println!("  Max range: {} hours", config.max_range_hours);
    println!(
        "  Scorer: {}",
        if config.scorer.enabled {
            config.scorer.base_url.as_str()
        } else {
            "disabled"
        }
    );
    println!();

    let stats_path = config.transparency_path();
    if stats_path.exists() {
        let log = create_shared_log_with_persistence(stats_path);
        println!("Cumulative Statistics:");
        let stats = log.stats();
        println!("  Events accepted: {}", stats.events_accepted);
        println!("  Events rejected: {}", stats.events_rejected);
        println!("  Windows computed: {}", stats.windows_computed);
        println!("  Windows reused: {}", stats.windows_reused);
        println!("  Live updates sent: {}", stats.notifications_sent);
        println!("  Scoring failures: {}", stats.scoring_failures);
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_privacy() {
    println!("{PRIVACY_DECLARATION}");
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
