//! Binary entrypoint for the Disaster Alert station.
//!
//! Commands:
//! - `start [--port <path>]` - run the station loop, optionally on a radio serial port
//! - `init` - write a starter `config.toml`
//! - `status` - print dedup registry and write budget state from the store file
//! - `clear` - clear dedup history (subject to the write budget)
//!
//! A restart request from the station ends the process with a distinct exit
//! code (3 critical memory, 4 emergency clear) for the supervisor.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;

use disaster_alert::config::Config;
use disaster_alert::controls::spawn_console_reader;
use disaster_alert::feeds::FeedClient;
use disaster_alert::mesh::health::LinkHealth;
use disaster_alert::mesh::{LogTransport, MeshLink, Transport};
use disaster_alert::station::{build_tracker, RestartReason, Station};
use disaster_alert::storage::guard::SaveOutcome;
use disaster_alert::storage::FileStore;
use disaster_alert::system::{SharedClock, SystemClock};

#[derive(Parser)]
#[command(name = "disaster-alert")]
#[command(about = "Disaster alert station relaying hazard feeds over Meshtastic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the station
    Start {
        /// Radio serial port (e.g., /dev/ttyUSB0); overrides [relay].port
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Show dedup registry and write budget state
    Status,
    /// Clear the dedup history
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_logging(&None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Start { port } => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting Disaster Alert v{}", env!("CARGO_PKG_VERSION"));

            if let Some(reason) = start(config, port).await? {
                warn!("Exiting for restart: {}", reason);
                std::process::exit(reason.exit_code());
            }
        }
        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            show_status(&config)?;
        }
        Commands::Clear => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            clear_history(&config)?;
        }
    }

    Ok(())
}

async fn start(config: Config, port: Option<String>) -> Result<Option<RestartReason>> {
    let clock: SharedClock = Arc::new(SystemClock);

    #[cfg(feature = "feeds")]
    let feeds = disaster_alert::feeds::FeedFetcher::new(&config.feeds)?;
    #[cfg(not(feature = "feeds"))]
    let feeds = {
        warn!("Built without the 'feeds' feature; every fetch will fail");
        disaster_alert::feeds::CannedFeeds::new()
    };
    run_station(config, port, feeds, clock).await
}

async fn run_station<F: FeedClient>(
    config: Config,
    port: Option<String>,
    feeds: F,
    clock: SharedClock,
) -> Result<Option<RestartReason>> {
    let store = FileStore::open(&config.storage.path, config.storage.size)?;
    info!("Store file {}", store.path().display());
    let tracker = build_tracker(&config, Box::new(store), clock.clone())?;

    // CLI overrides config; an empty configured port means no radio
    let chosen_port = port.or_else(|| {
        let configured = config.relay.port.trim();
        (!configured.is_empty()).then(|| configured.to_string())
    });
    let transport = open_transport(chosen_port.as_deref(), config.relay.baud_rate).await;
    let link = MeshLink::new(
        transport,
        LinkHealth::new(config.link.health_config(), clock.clone()),
    );

    let mut station = Station::new(&config, tracker, link, feeds, clock);
    if atty::is(atty::Stream::Stdin) {
        info!("Console commands: C=clear T=test M=memory W=write count R=reset link");
        station = station.with_console(spawn_console_reader());
    }

    info!("Station loop starting...");
    Ok(station.run().await)
}

async fn open_transport(port: Option<&str>, baud_rate: u32) -> Box<dyn Transport> {
    let Some(port_path) = port else {
        info!("No --port specified and no configured radio port set; relay lines go to the log.");
        return Box::new(LogTransport);
    };

    #[cfg(feature = "serial")]
    {
        match disaster_alert::mesh::SerialTransport::open(port_path, baud_rate).await {
            Ok(transport) => {
                info!("Connected to radio on {}", port_path);
                return Box::new(transport);
            }
            Err(e) => warn!(
                "Failed to open radio on {}: {} (station continuing without radio)",
                port_path, e
            ),
        }
    }
    #[cfg(not(feature = "serial"))]
    {
        let _ = baud_rate;
        warn!(
            "Radio port {} ignored: built without the 'serial' feature",
            port_path
        );
    }
    Box::new(LogTransport)
}

fn show_status(config: &Config) -> Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let store = FileStore::open(&config.storage.path, config.storage.size)?;
    let tracker = build_tracker(config, Box::new(store), clock)?;
    let registry = tracker.registry();

    println!("Disaster Alert v{}", env!("CARGO_PKG_VERSION"));
    println!("Store: {}", config.storage.path);
    println!(
        "Seen registry: {}/{}{}",
        registry.len(),
        registry.capacity(),
        if registry.persistence_valid() {
            ""
        } else {
            " (store unreadable)"
        }
    );
    println!("Write budget: {}", registry.guard().report());
    for id in registry.ids() {
        println!("  {}", id);
    }
    Ok(())
}

fn clear_history(config: &Config) -> Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let store = FileStore::open(&config.storage.path, config.storage.size)?;
    let mut tracker = build_tracker(config, Box::new(store), clock)?;
    match tracker.clear_history() {
        SaveOutcome::Saved { lifetime_writes } => {
            println!("Dedup history cleared (lifetime writes {}).", lifetime_writes);
            Ok(())
        }
        SaveOutcome::Refused(reason) => Err(anyhow::anyhow!("Clear refused: {}", reason)),
        SaveOutcome::Failed(e) => Err(anyhow::anyhow!("Clear failed: {}", e)),
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Under a supervisor stdout is redirected; only echo when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
