//! ChangeFeedSubscriber - owns at most one push channel at a time.
//!
//! Subscribing tears down the previous channel before the new one is opened,
//! so there is never more than one live subscription. A dropped connection is
//! re-established with exponential backoff; every reconnect after the first
//! is announced as a change, since events may have been missed meanwhile.

use marks_core::config::FeedSettings;
use marks_core::feed::{ChangeEvent, ChangeFeedTransport, ChangeKind, FeedFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// "Something changed for `owner_id`", delivered to the sync controller.
#[derive(Debug, Clone)]
pub struct FeedSignal {
    pub owner_id: String,
    pub event: ChangeEvent,
}

struct ActiveSubscription {
    owner_id: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    /// Cancels the channel and waits until the transport has let go of it.
    async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(
                "[ChangeFeedSubscriber] Feed task for owner {} ended abnormally: {}",
                self.owner_id,
                e
            );
        }
    }
}

/// Manages the single change-feed subscription.
pub struct ChangeFeedSubscriber {
    transport: Arc<dyn ChangeFeedTransport>,
    table: String,
    settings: FeedSettings,
    active: Mutex<Option<ActiveSubscription>>,
}

impl ChangeFeedSubscriber {
    pub fn new(
        transport: Arc<dyn ChangeFeedTransport>,
        table: impl Into<String>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            transport,
            table: table.into(),
            settings,
            active: Mutex::new(None),
        }
    }

    /// Opens a channel scoped to `owner_id`, replacing any existing one.
    ///
    /// The previous channel is fully torn down before this returns and
    /// before the new one connects.
    pub async fn subscribe(&self, owner_id: &str, on_change: mpsc::UnboundedSender<FeedSignal>) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            tracing::debug!(
                "[ChangeFeedSubscriber] Replacing channel for owner {}",
                previous.owner_id
            );
            previous.stop().await;
        }

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(feed_loop(
            self.transport.clone(),
            FeedFilter::new(self.table.clone(), owner_id),
            self.settings.clone(),
            on_change,
            shutdown.clone(),
        ));
        tracing::info!("[ChangeFeedSubscriber] Subscribed to changes for owner {}", owner_id);
        *active = Some(ActiveSubscription {
            owner_id: owner_id.to_string(),
            shutdown,
            task,
        });
    }

    /// Tears down the current channel, if any. Safe to call repeatedly.
    pub async fn unsubscribe(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            let owner_id = previous.owner_id.clone();
            previous.stop().await;
            tracing::info!("[ChangeFeedSubscriber] Unsubscribed owner {}", owner_id);
        }
    }

    pub async fn active_owner(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.owner_id.clone())
    }

    pub async fn is_subscribed(&self) -> bool {
        self.active.lock().await.is_some()
    }
}

/// Runs connections for one subscription until cancelled.
async fn feed_loop(
    transport: Arc<dyn ChangeFeedTransport>,
    filter: FeedFilter,
    settings: FeedSettings,
    on_change: mpsc::UnboundedSender<FeedSignal>,
    shutdown: CancellationToken,
) {
    let initial = Duration::from_millis(settings.reconnect_initial_ms);
    let max = Duration::from_millis(settings.reconnect_max_ms);
    let mut delay = initial;
    let mut connected_before = false;

    loop {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let run = transport.run(&filter, events_tx, shutdown.clone());
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = events.recv() => {
                    if !forward(&filter, &on_change, event, &mut connected_before, &mut delay, initial) {
                        return;
                    }
                }
            }
        };
        while let Ok(event) = events.try_recv() {
            if !forward(&filter, &on_change, event, &mut connected_before, &mut delay, initial) {
                return;
            }
        }

        if shutdown.is_cancelled() {
            return;
        }
        match result {
            Ok(()) => tracing::info!(
                "[ChangeFeedSubscriber] Channel for owner {} closed, reconnecting in {:?}",
                filter.owner_id,
                delay
            ),
            Err(e) => tracing::warn!(
                "[ChangeFeedSubscriber] Channel for owner {} failed: {}, reconnecting in {:?}",
                filter.owner_id,
                e,
                delay
            ),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(max);
    }
}

/// Forwards one transport event. Returns false once nobody listens anymore.
fn forward(
    filter: &FeedFilter,
    on_change: &mpsc::UnboundedSender<FeedSignal>,
    event: ChangeEvent,
    connected_before: &mut bool,
    delay: &mut Duration,
    initial: Duration,
) -> bool {
    if event.kind == ChangeKind::Resync {
        *delay = initial;
        if !*connected_before {
            // The first connect follows the reconciliation that opened the
            // subscription; nothing can have been missed yet.
            *connected_before = true;
            return true;
        }
        tracing::debug!(
            "[ChangeFeedSubscriber] Reconnected for owner {}, requesting catch-up",
            filter.owner_id
        );
    } else {
        tracing::debug!(
            "[ChangeFeedSubscriber] {:?} event for owner {}",
            event.kind,
            filter.owner_id
        );
    }

    on_change
        .send(FeedSignal {
            owner_id: filter.owner_id.clone(),
            event,
        })
        .is_ok()
}
