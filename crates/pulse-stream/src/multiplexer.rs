//! Many consumers, one push channel.
//!
//! Each consumer registers an interest set under its [`ConsumerId`]. The
//! multiplexer keeps the union of all interest sets (the combined topic set)
//! and tells the controller whenever it changes. Counting is by consumer, so
//! two consumers both holding `AAPL` keep it alive until both let go.
//!
//! Deliveries flow through a single dispatcher task, which preserves arrival
//! order per ticker.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pulse_core::{ConsumerId, PriceUpdate, SubscriptionError, normalize_tickers};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connector::StreamConnector;
use crate::controller::{ConnectionController, ConnectionSnapshot, ControllerConfig};
use crate::wire::StreamEvent;

/// Default per-consumer queue depth.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// What a consumer receives.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    /// A price tick.
    Price(PriceUpdate),
    /// The ticker is degraded; the connection is fine.
    TickerError(SubscriptionError),
}

impl Delivery {
    /// Ticker the delivery concerns.
    pub fn ticker(&self) -> &str {
        match self {
            Self::Price(update) => &update.ticker,
            Self::TickerError(err) => err.ticker(),
        }
    }
}

type Handler = Arc<dyn Fn(&Delivery) + Send + Sync>;

struct Entry {
    tickers: BTreeSet<String>,
    sender: mpsc::Sender<Delivery>,
    handle_id: u64,
}

#[derive(Default)]
struct Registry {
    consumers: HashMap<ConsumerId, Entry>,
    handlers: HashMap<ConsumerId, Vec<Handler>>,
    combined: BTreeSet<String>,
    degraded: BTreeSet<String>,
}

impl Registry {
    /// Recompute the union; returns it when it changed.
    fn recompute(&mut self) -> Option<BTreeSet<String>> {
        let combined: BTreeSet<String> = self
            .consumers
            .values()
            .flat_map(|e| e.tickers.iter().cloned())
            .collect();
        self.degraded.retain(|t| combined.contains(t));
        if combined == self.combined {
            return None;
        }
        self.combined = combined;
        Some(self.combined.clone())
    }

    /// Drop `consumer_id` and its handlers if `handle_id` still owns the entry.
    fn remove_owned(&mut self, consumer_id: &ConsumerId, handle_id: u64) -> bool {
        let owned = self
            .consumers
            .get(consumer_id)
            .is_some_and(|e| e.handle_id == handle_id);
        if owned {
            let _ = self.consumers.remove(consumer_id);
            let _ = self.handlers.remove(consumer_id);
        }
        owned
    }
}

struct Shared {
    registry: Mutex<Registry>,
    controller: ConnectionController,
    next_handle: AtomicU64,
    capacity: usize,
}

impl Shared {
    /// Apply `change` to the registry and push a changed union to the controller.
    ///
    /// The controller is told while the lock is held so concurrent changes
    /// reach it in the same order they were applied.
    fn update<R>(&self, change: impl FnOnce(&mut Registry) -> R) -> R {
        let mut registry = self.registry.lock();
        let result = change(&mut registry);
        if let Some(combined) = registry.recompute() {
            debug!(topics = combined.len(), "combined topic set changed");
            self.controller.set_topics(combined);
        }
        result
    }

    fn release(&self, consumer_id: &ConsumerId, handle_id: u64) {
        self.update(|registry| {
            if registry.remove_owned(consumer_id, handle_id) {
                debug!(consumer = %consumer_id, "consumer released");
            }
        });
    }

    /// Replace the interest of the entry `handle_id` owns.
    ///
    /// An empty set releases the consumer; returns whether that happened.
    fn set_interest(
        &self,
        consumer_id: &ConsumerId,
        handle_id: u64,
        tickers: &BTreeSet<String>,
    ) -> bool {
        self.update(|registry| {
            if tickers.is_empty() {
                return registry.remove_owned(consumer_id, handle_id);
            }
            if let Some(entry) = registry.consumers.get_mut(consumer_id) {
                if entry.handle_id == handle_id {
                    entry.tickers.clone_from(tickers);
                }
            }
            false
        })
    }

    /// Re-register a handle that released itself with an empty set.
    ///
    /// Fails if another handle has registered the consumer since.
    fn reattach(
        &self,
        consumer_id: &ConsumerId,
        handle_id: u64,
        tickers: &BTreeSet<String>,
        sender: mpsc::Sender<Delivery>,
    ) -> bool {
        self.update(|registry| {
            if registry.consumers.contains_key(consumer_id) {
                return false;
            }
            let _ = registry.consumers.insert(
                consumer_id.clone(),
                Entry {
                    tickers: tickers.clone(),
                    sender,
                    handle_id,
                },
            );
            true
        })
    }

    fn deliver(&self, event: StreamEvent) {
        let delivery = {
            let mut registry = self.registry.lock();
            match event {
                StreamEvent::Price(update) => {
                    let _ = registry.degraded.remove(&update.ticker);
                    Delivery::Price(update)
                }
                StreamEvent::TickerError(err) => {
                    if registry.combined.contains(err.ticker()) {
                        let _ = registry.degraded.insert(err.ticker().to_owned());
                        metrics::counter!("pulse_ticker_errors_total").increment(1);
                        warn!(ticker = %err.ticker(), error = %err, "ticker degraded");
                    }
                    Delivery::TickerError(err)
                }
            }
        };

        let mut handlers: Vec<Handler> = Vec::new();
        {
            let registry = self.registry.lock();
            for (consumer_id, entry) in &registry.consumers {
                if !entry.tickers.contains(delivery.ticker()) {
                    continue;
                }
                match entry.sender.try_send(delivery.clone()) {
                    Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(consumer = %consumer_id, ticker = %delivery.ticker(), "consumer queue full, dropping delivery");
                    }
                }
                if let Some(hs) = registry.handlers.get(consumer_id) {
                    handlers.extend(hs.iter().cloned());
                }
            }
        }
        // Handlers run outside the lock so they may (un)subscribe.
        for handler in handlers {
            handler(&delivery);
        }
    }
}

/// Fan-out of the single push channel to many consumers.
pub struct SubscriptionMultiplexer {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("consumers", &self.consumer_count())
            .field("combined_topics", &self.combined_topics())
            .finish_non_exhaustive()
    }
}

impl SubscriptionMultiplexer {
    /// Start the controller and dispatcher over `connector`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        config: ControllerConfig,
        channel_capacity: usize,
    ) -> Self {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let controller = ConnectionController::spawn(connector, config, events_tx);
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            controller,
            next_handle: AtomicU64::new(1),
            capacity: channel_capacity.max(1),
        });

        let weak = Arc::downgrade(&shared);
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(shared) = weak.upgrade() else { break };
                shared.deliver(event);
            }
        });

        Self { shared, dispatcher }
    }

    /// Register (or overwrite) `consumer_id`'s interest set.
    ///
    /// Tickers are normalised first; one bad symbol rejects the whole request
    /// and leaves the previous registration untouched. Overwriting invalidates
    /// the consumer's previous handle. An empty set removes the consumer (and
    /// its handlers) and returns a detached handle that yields nothing until
    /// [`SubscriptionHandle::set_tickers`] gives it a non-empty set.
    pub fn subscribe<I, S>(
        &self,
        consumer_id: ConsumerId,
        tickers: I,
    ) -> Result<SubscriptionHandle, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tickers = normalize_tickers(tickers)?;
        let handle_id = self.shared.next_handle.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.shared.capacity);

        self.shared.update(|registry| {
            if tickers.is_empty() {
                let _ = registry.consumers.remove(&consumer_id);
                let _ = registry.handlers.remove(&consumer_id);
            } else {
                let _ = registry.consumers.insert(
                    consumer_id.clone(),
                    Entry {
                        tickers: tickers.clone(),
                        sender,
                        handle_id,
                    },
                );
            }
        });
        debug!(consumer = %consumer_id, tickers = tickers.len(), "subscribed");

        Ok(SubscriptionHandle {
            consumer_id,
            handle_id,
            detached: tickers.is_empty(),
            tickers,
            receiver,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Release a subscription. Same as dropping the handle.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        drop(handle);
    }

    /// Call `handler` for every delivery in `consumer_id`'s current interest.
    ///
    /// May be registered before the consumer subscribes. Handlers are dropped
    /// when the consumer unsubscribes.
    pub fn on_update<F>(&self, consumer_id: &ConsumerId, handler: F)
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        self.shared
            .registry
            .lock()
            .handlers
            .entry(consumer_id.clone())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Union of all consumers' interest sets.
    pub fn combined_topics(&self) -> BTreeSet<String> {
        self.shared.registry.lock().combined.clone()
    }

    /// Tickers the server reported errors for and that have not ticked since.
    pub fn degraded_tickers(&self) -> BTreeSet<String> {
        self.shared.registry.lock().degraded.clone()
    }

    /// Number of registered consumers.
    pub fn consumer_count(&self) -> usize {
        self.shared.registry.lock().consumers.len()
    }

    /// Connection snapshot stream shared by every consumer.
    pub fn status(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.controller.watch()
    }

    /// Current connection snapshot.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.controller.snapshot()
    }

    /// Reopen the channel now (leaves `Offline`).
    pub fn reconnect(&self) {
        self.shared.controller.reconnect();
    }

    /// Close the channel and stop background tasks.
    pub async fn shutdown(&self) {
        self.shared.controller.shutdown().await;
        self.dispatcher.abort();
    }
}

impl Drop for SubscriptionMultiplexer {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// A consumer's live subscription.
///
/// Dropping it releases the consumer's interest synchronously.
pub struct SubscriptionHandle {
    consumer_id: ConsumerId,
    handle_id: u64,
    /// Released by an empty interest set; a non-empty one re-registers.
    detached: bool,
    tickers: BTreeSet<String>,
    receiver: mpsc::Receiver<Delivery>,
    shared: Weak<Shared>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("consumer_id", &self.consumer_id)
            .field("tickers", &self.tickers)
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    /// Owning consumer.
    pub fn consumer_id(&self) -> &ConsumerId {
        &self.consumer_id
    }

    /// Current interest set.
    pub fn tickers(&self) -> &BTreeSet<String> {
        &self.tickers
    }

    /// Change this handle's interest in place.
    ///
    /// Deliveries already queued for dropped tickers are discarded by
    /// [`Self::recv`]. An empty set releases the consumer and its handlers;
    /// a later non-empty set registers it again, unless another handle has
    /// claimed the consumer in between.
    pub fn set_tickers<I, S>(&mut self, tickers: I) -> Result<(), SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tickers = normalize_tickers(tickers)?;
        if let Some(shared) = self.shared.upgrade() {
            if !self.detached {
                self.detached = shared.set_interest(&self.consumer_id, self.handle_id, &tickers);
            } else if !tickers.is_empty() {
                let (sender, receiver) = mpsc::channel(shared.capacity);
                if shared.reattach(&self.consumer_id, self.handle_id, &tickers, sender) {
                    self.receiver = receiver;
                    self.detached = false;
                    debug!(consumer = %self.consumer_id, tickers = tickers.len(), "resubscribed");
                }
            }
        }
        self.tickers = tickers;
        Ok(())
    }

    /// Next delivery for a ticker in the current interest set.
    ///
    /// `None` once the subscription is released, overwritten, or the
    /// multiplexer is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            let delivery = self.receiver.recv().await?;
            if self.tickers.contains(delivery.ticker()) {
                return Some(delivery);
            }
        }
    }

    /// Non-blocking [`Self::recv`].
    pub fn try_recv(&mut self) -> Option<Delivery> {
        while let Ok(delivery) = self.receiver.try_recv() {
            if self.tickers.contains(delivery.ticker()) {
                return Some(delivery);
            }
        }
        None
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.release(&self.consumer_id, self.handle_id);
        }
    }
}
