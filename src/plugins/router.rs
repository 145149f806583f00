//! Event router - Wires a plugin's interests to one account's event stream

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::messaging::{dispatch, HostServices};
use crate::domain::entities::Event;
use crate::domain::traits::Session;
use crate::plugins::plugin::{EventInterest, ListenerContext, Plugin};

/// One live subscription task
pub struct Subscription {
    interest: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn interest(&self) -> &str {
        &self.interest
    }

    /// Stops delivery of further events. An event already being handled
    /// finishes normally.
    pub fn cancel(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Subscribes every interest of `plugin` to `session`'s event stream.
///
/// Receivers are created before this returns, so any event emitted after
/// `wire` is observed.
pub fn wire(plugin: &Arc<Plugin>, session: &Arc<dyn Session>, services: &Arc<HostServices>) -> Vec<Subscription> {
    plugin
        .interests()
        .into_iter()
        .map(|interest| subscribe(plugin.clone(), session.clone(), services.clone(), interest))
        .collect()
}

/// Cancels every subscription. Returns how many were removed.
pub fn unwire(subscriptions: Vec<Subscription>) -> usize {
    let count = subscriptions.len();
    for sub in subscriptions {
        sub.cancel();
    }
    count
}

fn subscribe(
    plugin: Arc<Plugin>,
    session: Arc<dyn Session>,
    services: Arc<HostServices>,
    interest: EventInterest,
) -> Subscription {
    let label = interest.label();
    let mut events = session.subscribe();
    let (stop, mut stopped) = watch::channel(false);

    let task_label = label.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = stopped.changed() => break,
                received = events.recv() => match received {
                    Ok(event) => deliver(&plugin, &session, &services, &interest, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(plugin = %plugin.name(), interest = %task_label, skipped, "Event subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!(plugin = %plugin.name(), interest = %task_label, account = %session.account_id(), "Subscription ended");
    });

    Subscription { interest: label, stop, handle }
}

async fn deliver(
    plugin: &Arc<Plugin>,
    session: &Arc<dyn Session>,
    services: &HostServices,
    interest: &EventInterest,
    event: Event,
) {
    match interest {
        EventInterest::Message => {
            if let Event::Message(message) = &event {
                dispatch(plugin, services, session, message).await;
            }
        }
        EventInterest::Raw { category, listener } => {
            if !event.matches_category(category) {
                return;
            }
            let ctx = ListenerContext {
                plugin: plugin.clone(),
                session: session.clone(),
            };
            match AssertUnwindSafe(listener(ctx, event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(plugin = %plugin.name(), interest = %category, error = %e, "Listener failed"),
                Err(_) => warn!(plugin = %plugin.name(), interest = %category, "Listener panicked"),
            }
        }
    }
}
