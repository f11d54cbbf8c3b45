//! # Snow Owl UDP File Service
//!
//! A small remote file-access service carried directly on UDP datagrams.
//! Peers send one UTF-8 text frame per datagram and get at most one frame
//! back. Sessions are keyed by peer address; plain sessions are read-only,
//! sessions that log in with the admin secret may also upload, download and
//! delete.
//!
//! ## Guarantees (and their absence)
//!
//! - No delivery, ordering or retransmission; clients time out on their own
//! - Every file operation is confined to one sandbox root directory
//! - Session and counter updates are serialized under one lock
//! - Idle sessions are evicted on a timer

pub mod audit;
pub mod auth;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod reaper;
pub mod sandbox;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use auth::{CredentialVerifier, Privilege, SharedSecretVerifier};
pub use client::Client;
pub use config::{LogFormat, LoggingConfig, PerformanceConfig, ServerConfig};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use protocol::{Request, Response};
pub use sandbox::Sandbox;
pub use server::Server;
pub use session::{Session, SessionTable};
