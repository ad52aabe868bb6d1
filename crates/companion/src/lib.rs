//! # Basewire Companion Library
//!
//! This crate provides the companion side of the Basewire secure channel:
//! pairing with an appliance, keeping the encrypted link alive and calling
//! the appliance's remote procedures.
//!
//! ## Overview
//!
//! - **Pairing**: trust-on-first-use pinning of appliance keys and the
//!   installation's static key pair
//! - **Frame Transport**: probe, WebSocket link, Noise handshake, encrypted
//!   frames dispatched by opcode
//! - **Call Multiplexer**: synchronous calls over the message channel
//! - **State Machine**: observable connection and pairing state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    BaseApi (typed operations)                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                            BaseClient                           │
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐   │
//! │  │     Call     │  │  Connection  │  │     Pairing          │   │
//! │  │  Multiplexer │  │ State Machine│  │      Store           │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘   │
//! │                                                                 │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │        Frame Transport (Noise XX, counters, opcodes)       │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │                                                                 │
//! │  ┌───────────────────────┐  ┌───────────────────────────────┐   │
//! │  │  WebSocket Connector  │  │        Memory Connector       │   │
//! │  └───────────────────────┘  └───────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use companion::pairing::{load_or_generate, PairingStore};
//! use companion::{BaseApi, BaseClient, Config, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let keypair = load_or_generate(&config.keypair_path())?;
//!     let store = Arc::new(PairingStore::open(config.pinned_keys_path())?);
//!     let identity = store.register("192.168.1.20:8845")?;
//!
//!     let connector = Arc::new(WebSocketConnector::new(&config.connection)?);
//!     let client = Arc::new(BaseClient::new(
//!         config.connection.clone(),
//!         identity,
//!         keypair,
//!         store,
//!         connector,
//!     ));
//!
//!     let fingerprint = client.connect().await?;
//!     println!("Compare with the appliance: {}", fingerprint);
//!
//!     let api = BaseApi::new(client);
//!     println!("Hostname: {}", api.hostname().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`pairing`]: Appliance identities, pinned keys, static key pair
//! - [`transport`]: Connectors and the encrypted frame transport
//! - [`rpc`]: Call multiplexer
//! - [`state`]: Connection state machine and events
//! - [`client`]: Connection façade
//! - [`api`]: Typed remote procedures
//! - [`error`]: Channel error taxonomy

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod pairing;
pub mod rpc;
pub mod state;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export channel types for convenience
pub use api::BaseApi;
pub use client::BaseClient;
pub use error::{ChannelError, ErrorClass};
pub use pairing::{PairingError, PairingStore, PinCheck, PinnedKey, RemoteIdentity};
pub use state::{ChannelEvent, ConnectionState, PairingFlags};
pub use transport::{Connector, MemoryAcceptor, MemoryConnector, RawLink, WebSocketConnector};
