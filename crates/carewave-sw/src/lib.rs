//! # CareWave Service Worker
//!
//! Push-notification service worker runtime for the CareWave PWA.
//!
//! ## Features
//!
//! - **Lifecycle**: install (skip-waiting), activate (claim clients)
//! - **Push events**: payload parsing with plain-text fallback, OS notifications
//! - **Click routing**: focus an open window or open a new one
//! - **Command channel**: `SHOW_NOTIFICATION` messages from an active page
//! - **Registration**: scope derivation, waiting/active worker slots
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (navigator.serviceWorker)
//!     └── ServiceWorkerRegistration
//!             ├── installing / waiting / active (ServiceWorker)
//!             └── scope
//!
//! NotificationWorker (worker global scope)
//!     ├── NotificationStore  (tag → Notification, dedup by tag)
//!     ├── Clients            (open windows, focus / open / claim)
//!     └── dispatch(SwEvent)  → async handler; the returned future is the
//!                              event's lifetime extension and must be awaited
//!                              by the host before the worker may be suspended
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};
use url::Url;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum SwError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Display failed: {0}")]
    DisplayFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Initial state, script being parsed.
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::Parsed
    }
}

// ==================== Constants ====================

/// Title used when a push payload carries no usable title.
pub const DEFAULT_TITLE: &str = "CareWave - New care request";

/// Body used when a push payload carries no body.
pub const DEFAULT_BODY: &str = "A new care request is available in your area.";

/// Application icon, also used as the badge.
pub const ICON_PATH: &str = "/favicon.png";

/// Buzz, pause, buzz.
pub const VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];

/// Dedup tag for pushes that carry no `id`; untagged pushes collapse into
/// a single replaceable notification slot.
pub const DEFAULT_TAG: &str = "new-booking";

/// Routing target for pushes that carry no `url`.
pub const ROOT_PATH: &str = "/";

/// Identifier of the "view details" action button.
pub const ACTION_VIEW: &str = "view";

/// Identifier of the "dismiss" action button.
pub const ACTION_CLOSE: &str = "close";

/// Click-handler action identifier that opens the accept route.
pub const ACTION_ACCEPT: &str = "accept";

/// Click-handler action identifier that opens the deny route.
pub const ACTION_DECLINE: &str = "decline";

/// Command-channel discriminator for a direct display request.
pub const MSG_SHOW_NOTIFICATION: &str = "SHOW_NOTIFICATION";

// ==================== Push Payload ====================

/// A parsed push payload. Every field is optional; unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushPayload {
    /// Display headline.
    pub title: Option<String>,

    /// Display message.
    pub body: Option<String>,

    /// Routing destination, also the navigation target on click.
    pub url: Option<String>,

    /// Grouping / deduplication key.
    pub id: Option<String>,
}

impl PushPayload {
    /// Parse raw push bytes.
    ///
    /// Never fails: content that is not well-formed JSON (or not an object)
    /// degrades to a payload whose `body` is the raw text.
    pub fn parse(raw: &[u8]) -> Self {
        match serde_json::from_slice(raw) {
            Ok(payload) => payload,
            Err(_) => Self {
                body: Some(String::from_utf8_lossy(raw).into_owned()),
                ..Self::default()
            },
        }
    }
}

// ==================== Notification ====================

/// A named notification action button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Action identifier reported on click.
    pub action: String,

    /// Human-readable button label.
    pub title: String,
}

impl NotificationAction {
    pub fn new(action: &str, title: &str) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
        }
    }
}

/// Platform notification options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
    /// Display message.
    #[serde(default)]
    pub body: String,

    /// Icon asset path.
    #[serde(default)]
    pub icon: String,

    /// Badge asset path.
    #[serde(default)]
    pub badge: String,

    /// Vibration pattern (milliseconds).
    #[serde(default)]
    pub vibrate: Vec<u32>,

    /// Opaque routing destination carried into the click handler.
    #[serde(default)]
    pub data: String,

    /// Deduplication tag; a new notification replaces any shown
    /// notification sharing the tag.
    #[serde(default)]
    pub tag: String,

    /// Action buttons.
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
}

/// A displayed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Display headline.
    pub title: String,

    /// Platform options.
    pub options: NotificationOptions,
}

impl Notification {
    /// Build the notification for an incoming push payload, applying the
    /// fixed defaults for every absent field.
    pub fn for_push(payload: &PushPayload) -> Self {
        let title = payload
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        let options = NotificationOptions {
            body: payload
                .body
                .clone()
                .unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: ICON_PATH.to_string(),
            badge: ICON_PATH.to_string(),
            vibrate: VIBRATE_PATTERN.to_vec(),
            data: payload
                .url
                .clone()
                .unwrap_or_else(|| ROOT_PATH.to_string()),
            tag: payload.id.clone().unwrap_or_else(|| DEFAULT_TAG.to_string()),
            actions: vec![
                NotificationAction::new(ACTION_VIEW, "View details"),
                NotificationAction::new(ACTION_CLOSE, "Dismiss"),
            ],
        };

        Self { title, options }
    }

    /// Deduplication tag.
    pub fn tag(&self) -> &str {
        &self.options.tag
    }

    /// Carried routing destination.
    pub fn data(&self) -> &str {
        &self.options.data
    }
}

// ==================== Notification Store ====================

/// Platform-owned registry of currently visible notifications, keyed by
/// dedup tag.
#[derive(Debug, Default)]
pub struct NotificationStore {
    shown: HashMap<String, Notification>,
}

impl NotificationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification, replacing any shown notification sharing
    /// its tag. Returns the replaced notification, if any.
    pub fn show(&mut self, notification: Notification) -> Option<Notification> {
        self.shown
            .insert(notification.tag().to_string(), notification)
    }

    /// Close the notification with the given tag.
    pub fn close(&mut self, tag: &str) -> Option<Notification> {
        self.shown.remove(tag)
    }

    /// Get a shown notification by tag.
    pub fn get(&self, tag: &str) -> Option<&Notification> {
        self.shown.get(tag)
    }

    /// Number of currently visible notifications.
    pub fn len(&self) -> usize {
        self.shown.len()
    }

    /// Whether no notification is visible.
    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

// ==================== Clients ====================

/// A client (open browsing context).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current address.
    pub url: String,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Whether controlled by the active worker.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Window,
    Worker,
    All,
}

impl Default for ClientType {
    fn default() -> Self {
        Self::Window
    }
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Registry of open browsing contexts. Queried for routing, never mutated
/// by the worker except through `open_window`, `focus` and `claim`.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Enumerate clients matching the given options.
    pub fn match_all(&self, options: ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| {
                if !options.include_uncontrolled && !c.controlled {
                    return false;
                }
                match options.client_type {
                    ClientType::All => true,
                    t => c.client_type == t,
                }
            })
            .collect()
    }

    /// Open a new window at the given address.
    pub fn open_window(&mut self, url: &str) -> Result<Client, SwError> {
        if url.is_empty() {
            return Err(SwError::NavigationFailed("empty target url".to_string()));
        }

        let client = Client {
            id: next_client_id(),
            url: url.to_string(),
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: true,
            controlled: false,
        };

        self.clients.insert(client.id.clone(), client.clone());
        Ok(client)
    }

    /// Bring a window client to the foreground.
    pub fn focus(&mut self, id: &str) -> Result<(), SwError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| SwError::NotFound(format!("client {id}")))?;

        if client.client_type != ClientType::Window {
            return Err(SwError::StateError(
                "can only focus window clients".to_string(),
            ));
        }

        client.focused = true;
        client.visibility_state = VisibilityState::Visible;
        Ok(())
    }

    /// Take control of every open client, including ones that loaded
    /// before this worker version became active.
    pub fn claim(&mut self) {
        for client in self.clients.values_mut() {
            client.controlled = true;
        }
    }

    /// Add a client (page opened outside the worker's control).
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client (page closed).
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Number of open clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is open.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ==================== Events ====================

/// A push event, carrying zero or one payload.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub payload: Option<Vec<u8>>,
}

impl PushEvent {
    /// Push with a payload.
    pub fn with_payload(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(raw.into()),
        }
    }
}

/// A notification click, identifying the clicked notification and, when
/// the click landed on a named button, the action.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    /// Dedup tag of the clicked notification.
    pub tag: String,

    /// Action identifier, `None` for a click on the notification body.
    pub action: Option<String>,
}

impl NotificationClickEvent {
    pub fn new(tag: &str, action: Option<&str>) -> Self {
        Self {
            tag: tag.to_string(),
            action: action.map(|a| a.to_string()),
        }
    }
}

/// A direct message from an active page (command channel).
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: JsonValue,
}

impl MessageEvent {
    pub fn new(data: JsonValue) -> Self {
        Self { data }
    }
}

/// Events dispatched to the worker by the host.
#[derive(Debug, Clone)]
pub enum SwEvent {
    Install,
    Activate,
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
    Message(MessageEvent),
}

/// Observable worker effects, advisory only.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Worker state changed.
    StateChange { new_state: WorkerState },
    /// A notification became visible.
    NotificationShown { tag: String },
    /// A notification was closed.
    NotificationClosed { tag: String },
    /// A new window was opened.
    WindowOpened { url: String },
    /// An existing window was brought to the foreground.
    WindowFocused { client_id: String },
}

// ==================== Notification Worker ====================

/// The worker global scope: bridges push delivery and page messaging into
/// visible notifications, and routes clicks back into the page context.
///
/// Each handler is async; the future returned by [`dispatch`] is the
/// event's lifetime extension. The host must await it before suspending
/// the worker, otherwise a display in flight is silently lost.
///
/// [`dispatch`]: NotificationWorker::dispatch
pub struct NotificationWorker {
    /// Worker state.
    state: RwLock<WorkerState>,

    /// Visible notifications, keyed by tag.
    pub notifications: Arc<RwLock<NotificationStore>>,

    /// Open browsing contexts.
    pub clients: Arc<RwLock<Clients>>,

    /// Observer stream.
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl NotificationWorker {
    /// Create a worker and its observer stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                state: RwLock::new(WorkerState::Parsed),
                notifications: Arc::new(RwLock::new(NotificationStore::new())),
                clients: Arc::new(RwLock::new(Clients::new())),
                event_tx,
            },
            event_rx,
        )
    }

    /// Current worker state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Run the two-step startup sequence: install (skip-waiting) then
    /// activate (claim all clients). Once per worker instance.
    pub async fn start(&self) -> Result<(), SwError> {
        self.dispatch(SwEvent::Install).await?;
        self.dispatch(SwEvent::Activate).await
    }

    /// Mark this instance as replaced by a newer worker version.
    pub async fn retire(&self) {
        self.set_state(WorkerState::Redundant).await;
    }

    /// Dispatch an event. The returned future completes only when the
    /// handler and its display/routing effects have settled.
    pub async fn dispatch(&self, event: SwEvent) -> Result<(), SwError> {
        match event {
            SwEvent::Install => self.handle_install().await,
            SwEvent::Activate => self.handle_activate().await,
            SwEvent::Push(event) => self.handle_push(event).await,
            SwEvent::NotificationClick(event) => self.handle_notification_click(event).await,
            SwEvent::Message(event) => self.handle_message(event).await,
        }
    }

    /// Display a notification, replacing any visible notification sharing
    /// its tag.
    pub async fn show_notification(&self, notification: Notification) -> Result<(), SwError> {
        if *self.state.read().await == WorkerState::Redundant {
            return Err(SwError::DisplayFailed(
                "worker is redundant".to_string(),
            ));
        }

        let tag = notification.tag().to_string();
        self.notifications.write().await.show(notification);
        let _ = self.event_tx.send(WorkerEvent::NotificationShown { tag });
        Ok(())
    }

    async fn set_state(&self, new_state: WorkerState) {
        *self.state.write().await = new_state;
        let _ = self.event_tx.send(WorkerEvent::StateChange { new_state });
    }

    /// Install: skip any waiting period so a freshly deployed worker takes
    /// effect without requiring all tabs to close first. Safe to force
    /// since the worker is stateless and idempotent to re-register.
    async fn handle_install(&self) -> Result<(), SwError> {
        debug!("install");
        self.set_state(WorkerState::Installing).await;
        self.set_state(WorkerState::Installed).await;
        Ok(())
    }

    /// Activate: claim every open client so in-page messaging works
    /// without a page reload.
    async fn handle_activate(&self) -> Result<(), SwError> {
        debug!("activate");
        self.set_state(WorkerState::Activating).await;
        self.clients.write().await.claim();
        self.set_state(WorkerState::Activated).await;
        Ok(())
    }

    /// Push received: parse (or default) the payload and display.
    async fn handle_push(&self, event: PushEvent) -> Result<(), SwError> {
        debug!(
            payload_len = event.payload.as_ref().map(|p| p.len()),
            "push received"
        );

        let payload = match event.payload {
            Some(raw) => PushPayload::parse(&raw),
            None => PushPayload::default(),
        };

        self.show_notification(Notification::for_push(&payload))
            .await
    }

    /// Notification clicked: close first, then route.
    async fn handle_notification_click(
        &self,
        event: NotificationClickEvent,
    ) -> Result<(), SwError> {
        let closed = self.notifications.write().await.close(&event.tag);
        if closed.is_some() {
            let _ = self.event_tx.send(WorkerEvent::NotificationClosed {
                tag: event.tag.clone(),
            });
        }

        let target = closed
            .map(|n| n.options.data)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| ROOT_PATH.to_string());

        // The attached buttons are identified as `view` and `close`; the
        // accept/decline identifiers below match the hosted web client, so
        // a `view` click falls through to the default routing.
        match event.action.as_deref() {
            Some(ACTION_ACCEPT) => {
                self.open_window(&format!("{target}?action=accept&id={}", event.tag))
                    .await
            }
            Some(ACTION_DECLINE) => {
                self.open_window(&format!("{target}?action=deny&id={}", event.tag))
                    .await
            }
            _ => self.focus_or_open(&target).await,
        }
    }

    /// Direct page message: recognized `SHOW_NOTIFICATION` commands display
    /// exactly the given title and options; anything else is ignored.
    async fn handle_message(&self, event: MessageEvent) -> Result<(), SwError> {
        let msg_type = event.data.get("type").and_then(|v| v.as_str());
        if msg_type != Some(MSG_SHOW_NOTIFICATION) {
            trace!(?msg_type, "ignoring unrecognized worker message");
            return Ok(());
        }

        let title = match event.data.get("title").and_then(|v| v.as_str()) {
            Some(title) => title.to_string(),
            None => {
                warn!("SHOW_NOTIFICATION message without a title");
                return Ok(());
            }
        };

        let options = match event.data.get("options") {
            Some(options) => options.clone(),
            None => {
                warn!("SHOW_NOTIFICATION message without options");
                return Ok(());
            }
        };

        match serde_json::from_value::<NotificationOptions>(options) {
            Ok(options) => self.show_notification(Notification { title, options }).await,
            Err(e) => {
                warn!(error = %e, "malformed SHOW_NOTIFICATION options");
                Ok(())
            }
        }
    }

    /// Default click routing: focus the first open window whose address
    /// contains the target, otherwise open a new window at the target.
    async fn focus_or_open(&self, target: &str) -> Result<(), SwError> {
        let matching = {
            let clients = self.clients.read().await;
            clients
                .match_all(ClientMatchOptions {
                    include_uncontrolled: true,
                    client_type: ClientType::Window,
                })
                .iter()
                .find(|c| c.url.contains(target))
                .map(|c| c.id.clone())
        };

        if let Some(client_id) = matching {
            self.clients.write().await.focus(&client_id)?;
            let _ = self.event_tx.send(WorkerEvent::WindowFocused { client_id });
            return Ok(());
        }

        self.open_window(target).await
    }

    async fn open_window(&self, url: &str) -> Result<(), SwError> {
        self.clients.write().await.open_window(url)?;
        let _ = self.event_tx.send(WorkerEvent::WindowOpened {
            url: url.to_string(),
        });
        Ok(())
    }
}

// ==================== Service Worker ====================

/// A registered service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: WorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: WorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: WorkerId::new(),
            script_url,
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Start installing a new worker version.
    pub fn update(&mut self, script_url: Url) {
        self.installing = Some(ServiceWorker::new(script_url));
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Installed);
            self.waiting = Some(worker);
        }
    }

    /// Activate the waiting worker, retiring any previous active worker.
    pub fn activate(&mut self) {
        if let Some(mut worker) = self.waiting.take() {
            worker.set_state(WorkerState::Activating);

            if let Some(mut old) = self.active.take() {
                old.set_state(WorkerState::Redundant);
            }

            worker.set_state(WorkerState::Activated);
            self.active = Some(worker);
        }
    }

    /// Skip waiting (force activate).
    pub fn skip_waiting(&mut self) {
        self.activate();
    }

    /// Unregister (retire every worker slot).
    pub fn unregister(&mut self) {
        for slot in [&mut self.active, &mut self.waiting, &mut self.installing] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(WorkerState::Redundant);
            }
        }
    }
}

// ==================== Service Worker Container ====================

/// Registration lifecycle events.
#[derive(Debug, Clone)]
pub enum RegistrationEvent {
    /// A new worker version started installing.
    UpdateFound { scope: String },
    /// A worker changed state.
    StateChange {
        scope: String,
        worker_id: WorkerId,
        new_state: WorkerState,
    },
}

/// Service worker container (navigator.serviceWorker). The host page
/// registers the worker script here; registration failure is the host's
/// to log, not the worker's.
pub struct ServiceWorkerContainer {
    /// Registrations by scope.
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,

    /// Event sender for registration changes.
    event_tx: mpsc::UnboundedSender<RegistrationEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container and its event stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RegistrationEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registrations: Arc::new(RwLock::new(HashMap::new())),
                event_tx,
            },
            event_rx,
        )
    }

    /// Register a service worker script. The scope defaults to the script's
    /// directory. Returns the registration scope.
    pub async fn register(&self, script_url: &str) -> Result<String, SwError> {
        let script_url = Url::parse(script_url)
            .map_err(|e| SwError::RegistrationFailed(e.to_string()))?;

        let mut scope = script_url.clone();
        scope.set_path(
            script_url
                .path()
                .rsplit_once('/')
                .map(|(p, _)| p)
                .unwrap_or("/"),
        );
        let scope_str = scope.to_string();

        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .entry(scope_str.clone())
            .or_insert_with(|| ServiceWorkerRegistration::new(scope));

        registration.update(script_url);
        if let Some(ref mut worker) = registration.installing {
            worker.set_state(WorkerState::Installing);
        }
        registration.install_complete();

        let _ = self.event_tx.send(RegistrationEvent::UpdateFound {
            scope: scope_str.clone(),
        });

        Ok(scope_str)
    }

    /// Get the registration scope controlling a URL.
    pub async fn get_registration(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let registrations = self.registrations.read().await;

        registrations
            .keys()
            .find(|scope| url.as_str().starts_with(scope.as_str()))
            .cloned()
    }

    /// Activate the waiting worker for a scope.
    pub async fn activate(&self, scope: &str) -> Result<(), SwError> {
        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .get_mut(scope)
            .ok_or_else(|| SwError::NotFound(scope.to_string()))?;

        registration.skip_waiting();

        if let Some(ref worker) = registration.active {
            let _ = self.event_tx.send(RegistrationEvent::StateChange {
                scope: scope.to_string(),
                worker_id: worker.id,
                new_state: WorkerState::Activated,
            });
        }

        Ok(())
    }

    /// Unregister a scope. Returns whether a registration existed.
    pub async fn unregister(&self, scope: &str) -> Result<bool, SwError> {
        let mut registrations = self.registrations.write().await;
        match registrations.remove(scope) {
            Some(mut registration) => {
                registration.unregister();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Default for ServiceWorkerContainer {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page_client(id: &str, url: &str) -> Client {
        Client {
            id: id.to_string(),
            url: url.to_string(),
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Hidden,
            focused: false,
            controlled: false,
        }
    }

    // ---------- payload parsing ----------

    #[test]
    fn test_payload_parse_json() {
        let payload = PushPayload::parse(br#"{"title":"T","body":"B","url":"/x","id":"k"}"#);

        assert_eq!(payload.title.as_deref(), Some("T"));
        assert_eq!(payload.body.as_deref(), Some("B"));
        assert_eq!(payload.url.as_deref(), Some("/x"));
        assert_eq!(payload.id.as_deref(), Some("k"));
    }

    #[test]
    fn test_payload_parse_unknown_keys_ignored() {
        let payload = PushPayload::parse(br#"{"title":"T","priority":"high"}"#);
        assert_eq!(payload.title.as_deref(), Some("T"));
    }

    #[test]
    fn test_payload_parse_plain_text_falls_back_to_body() {
        let payload = PushPayload::parse(b"maintenance tonight");

        assert_eq!(payload.body.as_deref(), Some("maintenance tonight"));
        assert!(payload.title.is_none());
        assert!(payload.url.is_none());
        assert!(payload.id.is_none());
    }

    #[test]
    fn test_payload_parse_malformed_json_falls_back() {
        let payload = PushPayload::parse(br#"{"title": "#);
        assert_eq!(payload.body.as_deref(), Some(r#"{"title": "#));
    }

    // ---------- push handling ----------

    #[tokio::test]
    async fn test_push_with_title_and_body() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(
                br#"{"title":"Booking","body":"New job nearby","id":"b42","url":"/jobs/42"}"#
                    .to_vec(),
            )))
            .await
            .unwrap();

        let store = worker.notifications.read().await;
        let n = store.get("b42").unwrap();
        assert_eq!(n.title, "Booking");
        assert_eq!(n.options.body, "New job nearby");
        assert_eq!(n.data(), "/jobs/42");
    }

    #[tokio::test]
    async fn test_push_without_payload_uses_defaults() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Push(PushEvent::default()))
            .await
            .unwrap();

        let store = worker.notifications.read().await;
        let n = store.get(DEFAULT_TAG).unwrap();
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.options.body, DEFAULT_BODY);
        assert_eq!(n.data(), ROOT_PATH);
        assert_eq!(n.options.icon, ICON_PATH);
        assert_eq!(n.options.badge, ICON_PATH);
        assert_eq!(n.options.vibrate, VIBRATE_PATTERN.to_vec());
    }

    #[tokio::test]
    async fn test_push_plain_text_shows_raw_body() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(
                b"nurse wanted".to_vec(),
            )))
            .await
            .unwrap();

        let store = worker.notifications.read().await;
        let n = store.get(DEFAULT_TAG).unwrap();
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.options.body, "nurse wanted");
    }

    #[tokio::test]
    async fn test_push_empty_title_uses_default() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(
                br#"{"title":"","body":"B"}"#.to_vec(),
            )))
            .await
            .unwrap();

        let store = worker.notifications.read().await;
        assert_eq!(store.get(DEFAULT_TAG).unwrap().title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn test_push_actions_are_view_and_close() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(b"{}".to_vec())))
            .await
            .unwrap();

        let store = worker.notifications.read().await;
        let actions = &store.get(DEFAULT_TAG).unwrap().options.actions;
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action, ACTION_VIEW);
        assert_eq!(actions[1].action, ACTION_CLOSE);
    }

    #[tokio::test]
    async fn test_push_same_id_replaces() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(
                br#"{"id":"b1","body":"first"}"#.to_vec(),
            )))
            .await
            .unwrap();
        worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(
                br#"{"id":"b1","body":"second"}"#.to_vec(),
            )))
            .await
            .unwrap();

        let store = worker.notifications.read().await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b1").unwrap().options.body, "second");
    }

    #[tokio::test]
    async fn test_push_on_redundant_worker_fails() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();
        worker.retire().await;

        let result = worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(b"{}".to_vec())))
            .await;

        assert!(matches!(result, Err(SwError::DisplayFailed(_))));
    }

    // ---------- click routing ----------

    async fn worker_with_booking() -> (NotificationWorker, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (worker, rx) = NotificationWorker::new();
        worker.start().await.unwrap();
        worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(
                br#"{"title":"Booking","body":"New job nearby","id":"b42","url":"/jobs/42"}"#
                    .to_vec(),
            )))
            .await
            .unwrap();
        (worker, rx)
    }

    #[tokio::test]
    async fn test_click_accept_opens_accept_url() {
        let (worker, _rx) = worker_with_booking().await;

        worker
            .dispatch(SwEvent::NotificationClick(NotificationClickEvent::new(
                "b42",
                Some(ACTION_ACCEPT),
            )))
            .await
            .unwrap();

        assert!(worker.notifications.read().await.is_empty());

        let clients = worker.clients.read().await;
        let opened = clients.match_all(ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        });
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].url, "/jobs/42?action=accept&id=b42");
    }

    #[tokio::test]
    async fn test_click_decline_opens_deny_url() {
        let (worker, _rx) = worker_with_booking().await;

        worker
            .dispatch(SwEvent::NotificationClick(NotificationClickEvent::new(
                "b42",
                Some(ACTION_DECLINE),
            )))
            .await
            .unwrap();

        let clients = worker.clients.read().await;
        let opened = clients.match_all(ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        });
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].url, "/jobs/42?action=deny&id=b42");
    }

    #[tokio::test]
    async fn test_default_click_focuses_matching_window() {
        let (worker, _rx) = worker_with_booking().await;
        worker
            .clients
            .write()
            .await
            .add(page_client("page-1", "https://carewave.example/jobs/42"));

        worker
            .dispatch(SwEvent::NotificationClick(NotificationClickEvent::new(
                "b42", None,
            )))
            .await
            .unwrap();

        let clients = worker.clients.read().await;
        assert_eq!(clients.len(), 1);
        let page = clients.get("page-1").unwrap();
        assert!(page.focused);
        assert_eq!(page.visibility_state, VisibilityState::Visible);
    }

    #[tokio::test]
    async fn test_default_click_opens_window_when_no_match() {
        let (worker, _rx) = worker_with_booking().await;
        worker
            .clients
            .write()
            .await
            .add(page_client("page-1", "https://carewave.example/profile"));

        worker
            .dispatch(SwEvent::NotificationClick(NotificationClickEvent::new(
                "b42", None,
            )))
            .await
            .unwrap();

        let clients = worker.clients.read().await;
        assert_eq!(clients.len(), 2);
        assert!(!clients.get("page-1").unwrap().focused);
    }

    #[tokio::test]
    async fn test_view_action_falls_through_to_default_routing() {
        let (worker, _rx) = worker_with_booking().await;
        worker
            .clients
            .write()
            .await
            .add(page_client("page-1", "https://carewave.example/jobs/42"));

        worker
            .dispatch(SwEvent::NotificationClick(NotificationClickEvent::new(
                "b42",
                Some(ACTION_VIEW),
            )))
            .await
            .unwrap();

        // `view` is not an accept/decline identifier, so no query-string
        // window is opened; the matching page is focused instead.
        let clients = worker.clients.read().await;
        assert_eq!(clients.len(), 1);
        assert!(clients.get("page-1").unwrap().focused);
    }

    #[tokio::test]
    async fn test_click_unknown_tag_routes_to_root() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::NotificationClick(NotificationClickEvent::new(
                "gone", None,
            )))
            .await
            .unwrap();

        let clients = worker.clients.read().await;
        let opened = clients.match_all(ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        });
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].url, ROOT_PATH);
    }

    // ---------- command channel ----------

    #[tokio::test]
    async fn test_message_show_notification_verbatim() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Message(MessageEvent::new(json!({
                "type": MSG_SHOW_NOTIFICATION,
                "title": "Direct",
                "options": { "body": "from the page", "tag": "direct-1" }
            }))))
            .await
            .unwrap();

        let store = worker.notifications.read().await;
        let n = store.get("direct-1").unwrap();
        assert_eq!(n.title, "Direct");
        assert_eq!(n.options.body, "from the page");
        // Verbatim: no push defaults are merged in.
        assert!(n.options.icon.is_empty());
        assert!(n.options.vibrate.is_empty());
        assert!(n.options.actions.is_empty());
    }

    #[tokio::test]
    async fn test_message_unknown_type_ignored() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Message(MessageEvent::new(json!({
                "type": "SYNC_BOOKINGS"
            }))))
            .await
            .unwrap();
        worker
            .dispatch(SwEvent::Message(MessageEvent::new(json!("ping"))))
            .await
            .unwrap();

        assert!(worker.notifications.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_message_missing_fields_ignored() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Message(MessageEvent::new(json!({
                "type": MSG_SHOW_NOTIFICATION,
                "title": "no options"
            }))))
            .await
            .unwrap();

        assert!(worker.notifications.read().await.is_empty());
    }

    // ---------- lifecycle ----------

    #[tokio::test]
    async fn test_start_claims_existing_clients() {
        let (worker, mut rx) = NotificationWorker::new();
        worker
            .clients
            .write()
            .await
            .add(page_client("page-1", "https://carewave.example/"));

        worker.start().await.unwrap();

        assert_eq!(worker.state().await, WorkerState::Activated);
        assert!(worker.clients.read().await.get("page-1").unwrap().controlled);

        // Installing, Installed, Activating, Activated.
        let mut states = Vec::new();
        while let Ok(WorkerEvent::StateChange { new_state }) = rx.try_recv() {
            states.push(new_state);
        }
        assert_eq!(
            states,
            vec![
                WorkerState::Installing,
                WorkerState::Installed,
                WorkerState::Activating,
                WorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_worker_events_for_push_and_click() {
        let (worker, mut rx) = worker_with_booking().await;

        // Drain lifecycle events.
        let mut shown = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, WorkerEvent::NotificationShown { ref tag } if tag == "b42") {
                shown = true;
            }
        }
        assert!(shown);

        worker
            .dispatch(SwEvent::NotificationClick(NotificationClickEvent::new(
                "b42", None,
            )))
            .await
            .unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(WorkerEvent::NotificationClosed { .. })
        ));
        assert!(matches!(rx.try_recv(), Ok(WorkerEvent::WindowOpened { .. })));
    }

    // ---------- registration ----------

    #[test]
    fn test_registration_lifecycle() {
        let scope = Url::parse("https://carewave.example/").unwrap();
        let mut registration = ServiceWorkerRegistration::new(scope);

        let script = Url::parse("https://carewave.example/sw.js").unwrap();
        registration.update(script);
        assert!(registration.installing.is_some());

        registration.install_complete();
        assert!(registration.waiting.is_some());
        assert!(registration.installing.is_none());

        registration.skip_waiting();
        assert!(registration.active.is_some());
        assert!(registration.waiting.is_none());
        assert!(registration.get_active().unwrap().is_active());
    }

    #[test]
    fn test_registration_activate_retires_old_worker() {
        let scope = Url::parse("https://carewave.example/").unwrap();
        let mut registration = ServiceWorkerRegistration::new(scope);
        let script = Url::parse("https://carewave.example/sw.js").unwrap();

        registration.update(script.clone());
        registration.install_complete();
        registration.activate();
        let first = registration.get_active().unwrap().id;

        registration.update(script);
        registration.install_complete();
        registration.activate();

        assert_ne!(registration.get_active().unwrap().id, first);
    }

    #[tokio::test]
    async fn test_container_register_and_activate() {
        let (container, mut rx) = ServiceWorkerContainer::new();

        let scope = container
            .register("https://carewave.example/carewave/sw.js")
            .await
            .unwrap();
        assert_eq!(scope, "https://carewave.example/carewave");

        assert!(matches!(
            rx.try_recv(),
            Ok(RegistrationEvent::UpdateFound { .. })
        ));

        container.activate(&scope).await.unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(RegistrationEvent::StateChange {
                new_state: WorkerState::Activated,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_container_get_registration() {
        let (container, _rx) = ServiceWorkerContainer::new();
        let scope = container
            .register("https://carewave.example/carewave/sw.js")
            .await
            .unwrap();

        let found = container
            .get_registration("https://carewave.example/carewave/jobs/42")
            .await;
        assert_eq!(found, Some(scope));

        let missing = container
            .get_registration("https://elsewhere.example/")
            .await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_container_unregister() {
        let (container, _rx) = ServiceWorkerContainer::new();
        let scope = container
            .register("https://carewave.example/carewave/sw.js")
            .await
            .unwrap();

        assert!(container.unregister(&scope).await.unwrap());
        assert!(!container.unregister(&scope).await.unwrap());
    }

    #[tokio::test]
    async fn test_container_bad_script_url() {
        let (container, _rx) = ServiceWorkerContainer::new();
        let result = container.register("not a url").await;
        assert!(matches!(result, Err(SwError::RegistrationFailed(_))));
    }

    // ---------- end to end ----------

    #[tokio::test]
    async fn test_booking_scenario_end_to_end() {
        let (worker, _rx) = NotificationWorker::new();
        worker.start().await.unwrap();

        worker
            .dispatch(SwEvent::Push(PushEvent::with_payload(
                br#"{"title":"Booking","body":"New job nearby","id":"b42","url":"/jobs/42"}"#
                    .to_vec(),
            )))
            .await
            .unwrap();

        {
            let store = worker.notifications.read().await;
            let n = store.get("b42").unwrap();
            assert_eq!(n.title, "Booking");
            assert_eq!(n.options.body, "New job nearby");
            assert_eq!(n.tag(), "b42");
            assert_eq!(n.data(), "/jobs/42");
        }

        worker
            .dispatch(SwEvent::NotificationClick(NotificationClickEvent::new(
                "b42",
                Some(ACTION_ACCEPT),
            )))
            .await
            .unwrap();

        assert!(worker.notifications.read().await.is_empty());
        let clients = worker.clients.read().await;
        let opened = clients.match_all(ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        });
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].url, "/jobs/42?action=accept&id=b42");
    }
}
