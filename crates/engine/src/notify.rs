//! Notification Dispatcher.
//!
//! Turns push payloads into notifications and routes clicks back to an
//! application window. Displaying notifications and managing windows belong
//! to the host, reached through [`NotificationPresenter`] and
//! [`WindowClients`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;
use waystation_client::resolve;
use waystation_core::{AppConfig, Error};

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

const OPEN_ICON: &str = "/icons/action-open.png";
const CLOSE_ICON: &str = "/icons/action-close.png";

/// Inbound push message.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NotificationData {
    /// Where a click should take the user.
    pub url: String,
    /// Milliseconds since the Unix epoch when the notification was built.
    pub timestamp: i64,
}

/// A notification as handed to the presenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// Displays and closes notifications.
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<(), Error>;
    async fn close(&self, notification: &Notification);
}

/// An application window known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowClient {
    pub id: u64,
    pub url: Url,
}

/// The host's open application windows.
#[async_trait]
pub trait WindowClients: Send + Sync {
    async fn windows(&self) -> Result<Vec<WindowClient>, Error>;
    async fn focus(&self, id: u64) -> Result<WindowClient, Error>;
    async fn open(&self, url: &Url) -> Result<WindowClient, Error>;
}

/// What a click did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "window", rename_all = "lowercase")]
pub enum ClickOutcome {
    Dismissed,
    Focused(WindowClient),
    Opened(WindowClient),
}

pub struct NotificationDispatcher {
    origin: Url,
    icon: String,
    badge: String,
    vibrate: Vec<u32>,
    presenter: Arc<dyn NotificationPresenter>,
    windows: Arc<dyn WindowClients>,
}

impl NotificationDispatcher {
    pub fn new(
        config: &AppConfig, origin: Url, presenter: Arc<dyn NotificationPresenter>, windows: Arc<dyn WindowClients>,
    ) -> Self {
        Self {
            origin,
            icon: config.notification_icon.clone(),
            badge: config.notification_badge.clone(),
            vibrate: config.vibration_pattern.clone(),
            presenter,
            windows,
        }
    }

    /// Handle a push delivery.
    ///
    /// A missing or unparseable payload is dropped and yields `Ok(None)`.
    /// The call returns once the presenter has displayed the notification.
    pub async fn on_push(&self, data: Option<&[u8]>) -> Result<Option<Notification>, Error> {
        let Some(data) = data else {
            return Ok(None);
        };
        let payload: PushPayload = match serde_json::from_slice(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed push payload");
                return Ok(None);
            }
        };

        let notification = self.build(payload);
        self.presenter.show(&notification).await?;
        tracing::info!(title = %notification.title, url = %notification.data.url, "notification shown");
        Ok(Some(notification))
    }

    /// Handle a click on `notification`, with `action` naming the button, if any.
    pub async fn on_click(&self, notification: &Notification, action: Option<&str>) -> Result<ClickOutcome, Error> {
        self.presenter.close(notification).await;

        if action == Some(ACTION_DISMISS) {
            return Ok(ClickOutcome::Dismissed);
        }

        let target = if notification.data.url.is_empty() { "/" } else { notification.data.url.as_str() };
        let target = resolve(&self.origin, target)?;

        let existing = self.windows.windows().await?.into_iter().find(|w| w.url == target);
        if let Some(window) = existing {
            let window = self.windows.focus(window.id).await?;
            tracing::debug!(id = window.id, url = %window.url, "focused existing window");
            return Ok(ClickOutcome::Focused(window));
        }

        let window = self.windows.open(&target).await?;
        tracing::debug!(id = window.id, url = %window.url, "opened window");
        Ok(ClickOutcome::Opened(window))
    }

    fn build(&self, payload: PushPayload) -> Notification {
        Notification {
            title: payload.title,
            body: payload.body,
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            vibrate: self.vibrate.clone(),
            data: NotificationData {
                url: payload.url.filter(|u| !u.is_empty()).unwrap_or_else(|| "/".to_string()),
                timestamp: Utc::now().timestamp_millis(),
            },
            actions: vec![
                NotificationAction { action: ACTION_OPEN.into(), title: "Open".into(), icon: OPEN_ICON.into() },
                NotificationAction { action: ACTION_DISMISS.into(), title: "Close".into(), icon: CLOSE_ICON.into() },
            ],
        }
    }
}

/// Presenter for headless hosts: notifications go to the log.
#[derive(Debug, Default)]
pub struct LogPresenter;

#[async_trait]
impl NotificationPresenter for LogPresenter {
    async fn show(&self, notification: &Notification) -> Result<(), Error> {
        tracing::info!(title = %notification.title, body = %notification.body, "notification");
        Ok(())
    }

    async fn close(&self, notification: &Notification) {
        tracing::debug!(title = %notification.title, "notification closed");
    }
}

/// Window registry kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryWindows {
    windows: Mutex<Vec<WindowClient>>,
    focused: Mutex<Option<u64>>,
    next_id: AtomicU64,
}

impl InMemoryWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a window already showing `url`.
    pub fn add(&self, url: Url) -> WindowClient {
        let window = WindowClient { id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1, url };
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).push(window.clone());
        window
    }

    pub fn focused(&self) -> Option<u64> {
        *self.focused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WindowClients for InMemoryWindows {
    async fn windows(&self) -> Result<Vec<WindowClient>, Error> {
        Ok(self.windows.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn focus(&self, id: u64) -> Result<WindowClient, Error> {
        let window = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("no window with id {id}")))?;
        *self.focused.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
        Ok(window)
    }

    async fn open(&self, url: &Url) -> Result<WindowClient, Error> {
        let window = self.add(url.clone());
        *self.focused.lock().unwrap_or_else(PoisonError::into_inner) = Some(window.id);
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    #[derive(Default)]
    struct RecordingPresenter {
        shown: Mutex<Vec<Notification>>,
        closed: AtomicU64,
    }

    #[async_trait]
    impl NotificationPresenter for RecordingPresenter {
        async fn show(&self, notification: &Notification) -> Result<(), Error> {
            self.shown.lock().unwrap().push(notification.clone());
            Ok(())
        }

        async fn close(&self, _notification: &Notification) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dispatcher() -> (NotificationDispatcher, Arc<RecordingPresenter>, Arc<InMemoryWindows>) {
        let config = test_config();
        let presenter = Arc::new(RecordingPresenter::default());
        let windows = Arc::new(InMemoryWindows::new());
        let dispatcher =
            NotificationDispatcher::new(&config, config.origin_url().unwrap(), presenter.clone(), windows.clone());
        (dispatcher, presenter, windows)
    }

    #[tokio::test]
    async fn test_push_builds_notification() {
        let (dispatcher, presenter, _) = dispatcher();
        let notification = dispatcher
            .on_push(Some(br#"{"title":"Sale","body":"50% off","url":"/catalog"}"#))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(notification.title, "Sale");
        assert_eq!(notification.data.url, "/catalog");
        assert_eq!(notification.icon, "/icons/icon-192x192.png");
        assert_eq!(notification.vibrate, vec![200, 100, 200]);
        let actions: Vec<&str> = notification.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["open", "dismiss"]);
        assert_eq!(presenter.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_without_url_targets_root() {
        let (dispatcher, _, _) = dispatcher();
        let notification = dispatcher.on_push(Some(br#"{"title":"T","body":"B"}"#)).await.unwrap().unwrap();
        assert_eq!(notification.data.url, "/");
    }

    #[tokio::test]
    async fn test_malformed_push_is_dropped() {
        let (dispatcher, presenter, _) = dispatcher();
        assert!(dispatcher.on_push(Some(b"not json")).await.unwrap().is_none());
        assert!(dispatcher.on_push(Some(br#"{"body":"no title"}"#)).await.unwrap().is_none());
        assert!(dispatcher.on_push(None).await.unwrap().is_none());
        assert!(presenter.shown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dismiss_closes_only() {
        let (dispatcher, presenter, windows) = dispatcher();
        let notification = dispatcher.on_push(Some(br#"{"title":"T","body":"B"}"#)).await.unwrap().unwrap();

        let outcome = dispatcher.on_click(&notification, Some("dismiss")).await.unwrap();
        assert_eq!(outcome, ClickOutcome::Dismissed);
        assert_eq!(presenter.closed.load(Ordering::SeqCst), 1);
        assert!(windows.is_empty());
    }

    #[tokio::test]
    async fn test_click_focuses_matching_window() {
        let (dispatcher, _, windows) = dispatcher();
        windows.add(Url::parse("http://localhost:3000/").unwrap());
        let orders = windows.add(Url::parse("http://localhost:3000/orders").unwrap());
        let notification =
            dispatcher.on_push(Some(br#"{"title":"T","body":"B","url":"/orders"}"#)).await.unwrap().unwrap();

        let outcome = dispatcher.on_click(&notification, Some("open")).await.unwrap();
        assert_eq!(outcome, ClickOutcome::Focused(orders.clone()));
        assert_eq!(windows.focused(), Some(orders.id));
        assert_eq!(windows.len(), 2);
    }

    #[tokio::test]
    async fn test_click_opens_window_when_none_matches() {
        let (dispatcher, presenter, windows) = dispatcher();
        windows.add(Url::parse("http://localhost:3000/").unwrap());
        let notification =
            dispatcher.on_push(Some(br#"{"title":"T","body":"B","url":"/orders"}"#)).await.unwrap().unwrap();

        let outcome = dispatcher.on_click(&notification, None).await.unwrap();
        let ClickOutcome::Opened(window) = outcome else {
            panic!("expected a new window, got {outcome:?}");
        };
        assert_eq!(window.url.as_str(), "http://localhost:3000/orders");
        assert_eq!(windows.len(), 2);
        assert_eq!(presenter.closed.load(Ordering::SeqCst), 1);
    }
}
