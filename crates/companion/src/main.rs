//! Basewire companion CLI
//!
//! Registers appliances, pairs with them and invokes their remote procedures.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use companion::pairing::{load_or_generate, PairingStore};
use companion::{
    BaseApi, BaseClient, ChannelEvent, Config, ConnectionState, ErrorClass, WebSocketConnector,
};
use tracing_subscriber::EnvFilter;

/// How long `confirm` waits for the appliance's user.
const PAIRING_WAIT: Duration = Duration::from_secs(300);

/// Basewire companion - secure channel to Basewire appliances.
#[derive(Parser, Debug)]
#[command(name = "basectl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Register an appliance reachable at host[:port]
    Register {
        /// Address of the appliance
        address: String,
    },

    /// List registered appliances
    List,

    /// Forget an appliance and its pinned key
    Forget {
        /// Appliance id, id prefix or address
        appliance: String,
    },

    /// Connect and show the channel fingerprint
    Connect {
        /// Appliance id, id prefix or address
        appliance: String,
    },

    /// Confirm the channel fingerprint and wait until the appliance confirms too
    Confirm {
        /// Appliance id, id prefix or address
        appliance: String,
    },

    /// Replace the pinned key with the one the appliance presents now
    Repair {
        /// Appliance id, id prefix or address
        appliance: String,
    },

    /// Show or change the appliance hostname
    Hostname {
        /// Appliance id, id prefix or address
        appliance: String,

        /// New hostname
        #[arg(long)]
        set: Option<String>,
    },

    /// Re-download the blockchain from scratch
    Resync {
        /// Appliance id, id prefix or address
        appliance: String,
    },

    /// Rebuild the blockchain index
    Reindex {
        /// Appliance id, id prefix or address
        appliance: String,
    },

    /// Show the appliance software version
    Version {
        /// Appliance id, id prefix or address
        appliance: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug"
    } else {
        config.general.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = Arc::new(PairingStore::open(config.pinned_keys_path())?);

    match cli.command {
        Commands::Register { address } => {
            let identity = store.register(&address)?;
            println!("Registered {}", identity);
            println!("Run `basectl confirm {}` to pair.", identity.id);
        }
        Commands::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("No appliances registered.");
            } else {
                println!("Registered appliances:");
                for entry in entries {
                    let key = entry
                        .public_key
                        .map(|k| hex::encode(&k[..8]))
                        .unwrap_or_else(|| "not pinned".to_string());
                    let trust = match (entry.public_key.is_some(), entry.verified) {
                        (true, true) => "verified",
                        (true, false) => "unverified",
                        (false, _) => "unpaired",
                    };
                    println!(
                        "  {}  {:<24} key {:<16} {}",
                        entry.identity.id, entry.identity.address, key, trust
                    );
                }
            }
        }
        Commands::Forget { appliance } => {
            let identity = store
                .find(&appliance)?
                .with_context(|| format!("no registered appliance matches {:?}", appliance))?;
            store.remove(&identity)?;
            println!("Forgot {}", identity);
        }
        Commands::Connect { appliance } => {
            let client = open_client(&config, &store, &appliance)?;
            let fingerprint = connect(&client, client.connect().await)?;
            println!("Connected to {}", client.identity());
            println!("Fingerprint: {}", fingerprint);
            println!("State:       {}", client.state());
            if let Some(status) = client.status() {
                println!("Status:      {}", status);
            }
            client.close();
        }
        Commands::Confirm { appliance } => {
            let client = open_client(&config, &store, &appliance)?;
            let fingerprint = connect(&client, client.connect().await)?;
            confirm(&client, &fingerprint.to_string()).await?;
            client.close();
        }
        Commands::Repair { appliance } => {
            let client = open_client(&config, &store, &appliance)?;
            let fingerprint = connect(&client, client.repair().await)?;
            confirm(&client, &fingerprint.to_string()).await?;
            client.close();
        }
        Commands::Hostname { appliance, set } => {
            let api = open_api(&config, &store, &appliance).await?;
            match set {
                Some(hostname) => {
                    api.set_hostname(&hostname).await?;
                    println!("Hostname set to {}", hostname);
                }
                None => println!("{}", api.hostname().await?),
            }
            api.client().close();
        }
        Commands::Resync { appliance } => {
            let api = open_api(&config, &store, &appliance).await?;
            api.resync_bitcoin().await?;
            println!("Blockchain resync started");
            api.client().close();
        }
        Commands::Reindex { appliance } => {
            let api = open_api(&config, &store, &appliance).await?;
            api.reindex_bitcoin().await?;
            println!("Blockchain reindex started");
            api.client().close();
        }
        Commands::Version { appliance } => {
            let api = open_api(&config, &store, &appliance).await?;
            println!("{}", api.base_version().await?);
            api.client().close();
        }
    }

    Ok(())
}

/// Builds a client for a registered appliance.
fn open_client(
    config: &Config,
    store: &Arc<PairingStore>,
    appliance: &str,
) -> anyhow::Result<Arc<BaseClient>> {
    let identity = store
        .find(appliance)?
        .with_context(|| format!("no registered appliance matches {:?}", appliance))?;
    let keypair = load_or_generate(&config.keypair_path())?;
    let connector = Arc::new(WebSocketConnector::new(&config.connection)?);

    Ok(Arc::new(BaseClient::new(
        config.connection.clone(),
        identity,
        keypair,
        Arc::clone(store),
        connector,
    )))
}

/// Builds and connects a client and wraps it in the typed API.
async fn open_api(
    config: &Config,
    store: &Arc<PairingStore>,
    appliance: &str,
) -> anyhow::Result<BaseApi> {
    let client = open_client(config, store, appliance)?;
    connect(&client, client.connect().await)?;
    if client.state() != ConnectionState::Active {
        eprintln!(
            "Warning: fingerprint not yet verified; run `basectl confirm {}`",
            client.identity().id
        );
    }
    Ok(BaseApi::new(client).with_deadline(config.connection.call_timeout()))
}

/// Adds user guidance to connection failures.
fn connect<T>(client: &BaseClient, result: companion::error::Result<T>) -> anyhow::Result<T> {
    result.map_err(|e| {
        let hint = match e.class() {
            ErrorClass::Security => format!(
                "\nIf the appliance was reinstalled, run `basectl repair {}` and compare fingerprints.",
                client.identity().id
            ),
            ErrorClass::Retry => "\nCheck that the appliance is powered on and reachable.".to_string(),
            _ => String::new(),
        };
        anyhow::anyhow!("{}{}", e, hint)
    })
}

/// Asks the user to compare fingerprints, then waits for both confirmations.
async fn confirm(client: &BaseClient, fingerprint: &str) -> anyhow::Result<()> {
    if client.state() == ConnectionState::Active {
        println!("Already paired with {}", client.identity());
        return Ok(());
    }

    println!("Fingerprint: {}", fingerprint);
    println!("Compare it with the one shown by the appliance.");
    print!("Type 'yes' if they match: ");
    std::io::stdout().flush()?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;
    if answer.trim() != "yes" {
        anyhow::bail!("fingerprint not confirmed");
    }

    let mut events = client.subscribe();
    let flags = client.confirm_fingerprint().await?;
    if !flags.remote_verified {
        println!("Waiting for confirmation on the appliance...");
    }

    let wait = async {
        loop {
            match client.state() {
                ConnectionState::Active => return Ok(()),
                ConnectionState::Closed => anyhow::bail!("connection closed before pairing completed"),
                _ => {}
            }
            match events.recv().await {
                Ok(ChannelEvent::StatusChanged(status)) => println!("Appliance status: {}", status),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("connection closed before pairing completed")
                }
            }
        }
    };
    tokio::time::timeout(PAIRING_WAIT, wait)
        .await
        .context("timed out waiting for the appliance to confirm")??;

    println!("Paired with {}", client.identity());
    Ok(())
}
