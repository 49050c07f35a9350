//! CareWave - Host Page Bootstrap
//!
//! Registers the notification service worker at the base-relative script
//! path, runs its startup sequence, and demonstrates the push and
//! command-channel paths end to end.

use carewave_app::{AppConfig, Storage};
use carewave_common::{init_logging, LogConfig, OptionExt};
use carewave_sw::{
    MessageEvent, NotificationWorker, PushEvent, ServiceWorkerContainer, SwEvent,
    MSG_SHOW_NOTIFICATION,
};
use serde_json::json;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging(LogConfig::default()) {
        eprintln!("logging init failed: {e}");
    }

    let config = AppConfig::default();
    info!(api = %config.api_base_url(), "starting CareWave host page");

    let mut storage = match Storage::at_default_path() {
        Ok(storage) => storage,
        Err(e) => {
            warn!(error = %e, "persistent storage unavailable, using memory");
            Storage::in_memory()
        }
    };
    if let Err(e) = storage.set_item("last_boot", env!("CARGO_PKG_VERSION"), true) {
        warn!(error = %e, "could not record boot marker");
    }

    // Register the worker at the base-relative script path. Failure is
    // logged here; the worker itself never sees it.
    let (container, _registration_events) = ServiceWorkerContainer::new();
    let scope = match container.register(&config.sw_script_url()).await {
        Ok(scope) => {
            info!(%scope, "service worker registered");
            scope
        }
        Err(e) => {
            error!(error = %e, "service worker registration failed");
            return;
        }
    };
    if let Err(e) = container.activate(&scope).await {
        error!(error = %e, "service worker activation failed");
        return;
    }

    let page_url = format!("{}{}", config.site_origin, config.base_path);
    match container.get_registration(&page_url).await.ok_or_not_found("registration") {
        Ok(scope) => info!(%scope, "page is controlled"),
        Err(e) => warn!(error = %e, "page is not controlled"),
    }

    let (worker, mut events) = NotificationWorker::new();
    if let Err(e) = worker.start().await {
        error!(error = %e, "worker startup failed");
        return;
    }

    // Demonstration: one push-delivered notification and one forced
    // through the command channel.
    let push = PushEvent::with_payload(
        br#"{"title":"Booking","body":"New job nearby","id":"b42","url":"/jobs/42"}"#.to_vec(),
    );
    if let Err(e) = worker.dispatch(SwEvent::Push(push)).await {
        error!(error = %e, "push dispatch failed");
    }

    let message = MessageEvent::new(json!({
        "type": MSG_SHOW_NOTIFICATION,
        "title": "Welcome back",
        "options": { "body": "You have unread care requests.", "tag": "welcome" }
    }));
    if let Err(e) = worker.dispatch(SwEvent::Message(message)).await {
        error!(error = %e, "message dispatch failed");
    }

    while let Ok(event) = events.try_recv() {
        info!(?event, "worker event");
    }
}
