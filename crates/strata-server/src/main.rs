mod error;
mod service;
mod signal;
mod state;

use std::io;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strata_core::config::{load_config, minimal_config_template, ServerConfig};
use strata_core::index::{FingerprintIndex, IndexStats};
use strata_core::recipe::RecipeStore;
use strata_core::session::SessionResources;
use strata_core::storage::{ContainerStore, MemoryKvStore};

use crate::error::StartupError;
use crate::state::ServerState;

#[derive(Parser)]
#[command(name = "strata-server", version, about = "deduplicating chunk storage server")]
struct Cli {
    /// Path to the YAML config file; built-in defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Log output format: "json" or "pretty"
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write a starter config file to the given path and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(path) = cli.init_config.as_deref() {
        if let Err(err) = init_config(Path::new(path)) {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    match cli.log_format.as_str() {
        "json" => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_config(path: &Path) -> Result<(), StartupError> {
    if path.exists() {
        return Err(StartupError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("file already exists: {}", path.display()),
        )));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, minimal_config_template())?;
    println!("Config written to: {}", path.display());
    println!("Edit it to set the storage directories and listen address.");
    Ok(())
}

fn run(cli: Cli) -> Result<(), StartupError> {
    let mut config = match &cli.config {
        Some(path) => load_config(Path::new(path))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    config.validate()?;

    let stats = IndexStats::load(Path::new(&config.stats_path))?;
    let containers = ContainerStore::open(Path::new(&config.container_dir))?;
    let recipes = RecipeStore::open(Path::new(&config.recipe_dir))?;
    let index = Arc::new(FingerprintIndex::new(Arc::new(MemoryKvStore::new()), stats));

    let state = ServerState::new(SessionResources {
        config,
        index,
        containers,
        recipes,
    });

    signal::install();
    serve(state)
}

fn serve(state: ServerState) -> Result<(), StartupError> {
    let addr = state.config().listen_addr.clone();
    let listener = TcpListener::bind(&addr).map_err(|source| StartupError::Bind {
        addr: addr.clone(),
        source,
    })?;
    // Nonblocking accept so the loop can notice the shutdown flag.
    listener.set_nonblocking(true)?;
    info!("strata-server listening on {addr}");

    while !signal::triggered() {
        match listener.accept() {
            Ok((stream, _peer)) => {
                // Accepted sockets must block; only the listener polls.
                if let Err(err) = stream.set_nonblocking(false) {
                    warn!(error = %err, "cannot configure accepted socket");
                    continue;
                }
                let state = state.clone();
                thread::spawn(move || service::handle_connection(stream, state));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    info!("shutdown signal received, saving index stats");
    let stats_path = state.config().stats_path.clone();
    state.resources().index.save_stats(Path::new(&stats_path))?;
    Ok(())
}
