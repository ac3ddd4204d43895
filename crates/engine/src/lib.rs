//! Offline interception engine.
//!
//! This crate provides:
//! - Generation management: install-time precaching and activation purges
//! - Request classification and the cache-first / network-first strategies
//! - Periodic eviction of stale dynamic entries
//! - A durable queue for work started while offline
//! - Push notification dispatch and click routing
//! - A control channel for the foreground application

pub mod background;
pub mod classifier;
pub mod control;
pub mod engine;
pub mod generations;
pub mod notify;
pub mod queue;
pub mod strategy;
pub mod sweeper;

#[cfg(test)]
mod testing;

pub use classifier::{Classifier, Route, RouteKind, Strategy};
pub use control::{Action, Command, CommandData, ControlClient, ControlMessage, Reply};
pub use engine::{Engine, Lifecycle, PreloadReport, SYNC_TAG};
pub use generations::{GenerationHandle, GenerationManager, GenerationRole, InstallReport};
pub use notify::{
    ClickOutcome, InMemoryWindows, LogPresenter, Notification, NotificationDispatcher, NotificationPresenter,
    WindowClient, WindowClients,
};
pub use queue::{DeferredQueue, DrainReport};
pub use sweeper::{EvictionSweeper, SweepReport};
