//! Core types and shared functionality for waystation.
//!
//! This crate provides:
//! - The Cache Store and durable deferred-task storage, SQLite backed
//! - The request/response model and the `Network` seam
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod http;
pub mod network;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use http::{Destination, Method, Request, Response};
pub use network::Network;
pub use store::{CacheDb, CacheEntry, DeferredTask, EntryMeta, Generation, GenerationStore, TaskKind};
