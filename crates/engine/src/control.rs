//! Control Channel.
//!
//! Messages from the foreground application arrive as
//! `{ action, data? }` and may carry a reply port. Each message is handled on
//! its own task, so a slow preload does not hold up a size query.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use waystation_core::Error;

use crate::engine::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    SkipWaiting,
    GetCacheSize,
    ClearCache,
    PreloadRoutes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandData {
    /// Generation to clear; all generations when absent or blank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_name: Option<String>,
    /// URLs or origin-relative paths to preload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<String>>,
}

/// A message as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ControlMessage {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<CommandData>,
}

impl ControlMessage {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidInput(format!("bad control message: {e}")))
    }
}

/// A decoded control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SkipWaiting,
    GetCacheSize,
    ClearCache { name: Option<String> },
    PreloadRoutes { routes: Vec<String> },
}

impl From<ControlMessage> for Command {
    fn from(message: ControlMessage) -> Self {
        let data = message.data.unwrap_or_default();
        match message.action {
            Action::SkipWaiting => Command::SkipWaiting,
            Action::GetCacheSize => Command::GetCacheSize,
            Action::ClearCache => Command::ClearCache { name: data.cache_name.filter(|n| !n.trim().is_empty()) },
            Action::PreloadRoutes => Command::PreloadRoutes { routes: data.routes.unwrap_or_default() },
        }
    }
}

/// Reply sent back on the port, for the commands that have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Size { size: u64 },
    Success { success: bool },
}

struct Envelope {
    command: Command,
    reply: Option<oneshot::Sender<Reply>>,
}

/// Sending half of the control channel.
#[derive(Clone)]
pub struct ControlClient {
    tx: mpsc::Sender<Envelope>,
}

impl ControlClient {
    /// Send without a reply port.
    pub async fn post(&self, command: Command) -> Result<(), Error> {
        self.tx.send(Envelope { command, reply: None }).await.map_err(|_| Error::ChannelClosed)
    }

    /// Send with a reply port and wait for the answer. Commands without a
    /// reply resolve to `None` once handled.
    pub async fn request(&self, command: Command) -> Result<Option<Reply>, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Envelope { command, reply: Some(reply_tx) }).await.map_err(|_| Error::ChannelClosed)?;
        Ok(reply_rx.await.ok())
    }
}

/// Open a control channel served by `engine`. The serving task ends when
/// every client has been dropped.
pub fn channel(engine: Arc<Engine>, capacity: usize) -> (ControlClient, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(capacity.max(1));

    let task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let engine = engine.clone();
            tokio::spawn(async move {
                let reply = engine.on_message(envelope.command).await;
                if let (Some(port), Some(reply)) = (envelope.reply, reply)
                    && port.send(reply).is_err()
                {
                    tracing::debug!("control reply dropped: requester went away");
                }
            });
        }
        tracing::debug!("control channel closed");
    });

    (ControlClient { tx }, task)
}
