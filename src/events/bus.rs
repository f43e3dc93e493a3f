//! # Typed publish/subscribe bus.
//!
//! [`EventBus`] routes messages by their concrete type to every live
//! [`Subscription`] registered for that type. Delivery is asynchronous: each
//! subscription owns a bounded queue drained by a dedicated worker task, so
//! publishing never blocks and never observes handler failures.
//!
//! ## Architecture
//! ```text
//! publish(SubmitPackageMessage)
//!     │
//!     ▼
//! routes[TypeId::of::<SubmitPackageMessage>()]
//!     ├──► [queue 1] ──► worker 1 ──► filter? ──► handler 1 ──► Err/panic → on_error
//!     └──► [queue 2] ──► worker 2 ──► filter? ──► handler 2
//!
//! routes[TypeId::of::<ShutdownMessage>()]
//!     └──► [queue 3] ──► worker 3 ──► handler 3
//! ```
//!
//! ## Rules
//! - **Non-blocking**: `publish()` uses `try_send` and returns immediately.
//! - **Typed routing**: a subscriber only ever sees messages of its own type.
//! - **Per-subscription FIFO**: one worker per subscription handles messages one at a time.
//! - **No cross-subscription ordering**: subscriber A may handle message N while B handles N+5.
//! - **Isolation**: a failing, panicking or slow handler only affects its own subscription.
//! - **Overflow**: a full queue drops the message for that subscription only and reports
//!   [`DeliveryError::Overflow`].
//! - **Dispose**: stops future deliveries; a delivery already running completes.
//! - **Pending**: a delivery counts as pending from a successful `try_send` until its
//!   handler returns (or the message is filtered out or discarded), see [`EventBus::pending`].
//!
//! Subscribing spawns the worker, so it must happen inside a Tokio runtime.
//!
//! **Warning**: `AssertUnwindSafe` is used around handlers, which can leave shared state
//! inconsistent if a handler panics while holding a lock.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{DeliveryError, TaskError};
use crate::events::message::Message;

/// Default per-subscription queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&DeliveryError) + Send + Sync>;
type AnyMessage = Arc<dyn Any + Send + Sync>;

/// Optional settings for [`EventBus::subscribe_with`].
pub struct SubscribeOptions<T> {
    filter: Option<Filter<T>>,
    on_error: Option<ErrorHandler>,
    queue_capacity: Option<usize>,
}

impl<T> Default for SubscribeOptions<T> {
    fn default() -> Self {
        Self {
            filter: None,
            on_error: None,
            queue_capacity: None,
        }
    }
}

impl<T: Message> SubscribeOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only deliver messages for which `filter` returns true.
    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Called with every delivery failure of this subscription.
    ///
    /// Replaces the bus-wide reporter for this subscription.
    pub fn with_error_handler(
        mut self,
        on_error: impl Fn(&DeliveryError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Overrides the bus queue capacity for this subscription (min 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
}

/// Marks one delivery as in flight until dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn start(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A queued message plus its in-flight marker.
struct Envelope<T> {
    message: Arc<T>,
    in_flight: InFlight,
}

/// Type-erased entry in the routing table.
trait Route: Send + Sync {
    fn id(&self) -> u64;
    fn offer(&self, message: &AnyMessage);
}

struct TypedRoute<T> {
    id: u64,
    sender: mpsc::Sender<Envelope<T>>,
    on_error: ErrorHandler,
    in_flight: Arc<AtomicUsize>,
}

impl<T: Message> Route for TypedRoute<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn offer(&self, message: &AnyMessage) {
        let Ok(message) = Arc::clone(message).downcast::<T>() else {
            return;
        };
        let envelope = Envelope {
            message,
            in_flight: InFlight::start(&self.in_flight),
        };
        match self.sender.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                report(&self.on_error, &DeliveryError::Overflow { message: T::KIND });
            }
            // Worker already gone: the subscription was disposed concurrently.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

struct BusInner {
    routes: RwLock<HashMap<TypeId, Vec<Arc<dyn Route>>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    reporter: ErrorHandler,
    in_flight: Arc<AtomicUsize>,
}

impl BusInner {
    fn remove(&self, type_id: TypeId, id: u64) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = routes.get_mut(&type_id) {
            list.retain(|r| r.id() != id);
            if list.is_empty() {
                routes.remove(&type_id);
            }
        }
    }
}

/// Typed publish/subscribe bus.
///
/// Cheap to clone; clones share the same routing table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus whose subscriptions swallow delivery errors after logging them.
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_reporter(queue_capacity, |_| {})
    }

    /// Creates a bus with a default error handler for subscriptions that set none.
    pub fn with_reporter(
        queue_capacity: usize,
        reporter: impl Fn(&DeliveryError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                routes: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
                reporter: Arc::new(reporter),
                in_flight: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Publishes `message` to every live subscription of type `T`.
    ///
    /// Publishing with no subscribers is a no-op.
    pub fn publish<T: Message>(&self, message: T) {
        let routes: Vec<Arc<dyn Route>> = {
            let routes = self
                .inner
                .routes
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match routes.get(&TypeId::of::<T>()) {
                Some(list) => list.clone(),
                None => Vec::new(),
            }
        };

        if routes.is_empty() {
            debug!(message = T::KIND, "no subscribers; message dropped");
            return;
        }
        debug!(message = T::KIND, subscribers = routes.len(), "publishing message");

        let message: AnyMessage = Arc::new(message);
        for route in &routes {
            route.offer(&message);
        }
    }

    /// Subscribes `handler` to messages of type `T` with default options.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn subscribe<T, F, Fut>(&self, handler: F) -> Subscription
    where
        T: Message,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.subscribe_with(handler, SubscribeOptions::default())
    }

    /// Subscribes `handler` to messages of type `T`.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn subscribe_with<T, F, Fut>(&self, handler: F, options: SubscribeOptions<T>) -> Subscription
    where
        T: Message,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let capacity = options
            .queue_capacity
            .unwrap_or(self.inner.queue_capacity)
            .max(1);
        let on_error = options
            .on_error
            .unwrap_or_else(|| Arc::clone(&self.inner.reporter));
        let live = Arc::new(AtomicBool::new(true));

        let (tx, rx) = mpsc::channel::<Envelope<T>>(capacity);
        tokio::spawn(deliver(
            rx,
            handler,
            options.filter,
            Arc::clone(&on_error),
            Arc::clone(&live),
        ));

        let route: Arc<dyn Route> = Arc::new(TypedRoute {
            id,
            sender: tx,
            on_error,
            in_flight: Arc::clone(&self.inner.in_flight),
        });
        self.inner
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(TypeId::of::<T>())
            .or_default()
            .push(route);

        debug!(message = T::KIND, subscription = id, "subscribed");
        Subscription {
            id,
            type_id: TypeId::of::<T>(),
            kind: T::KIND,
            bus: Arc::downgrade(&self.inner),
            live,
        }
    }

    /// Number of live subscriptions for `T`.
    pub fn subscriber_count<T: Message>(&self) -> usize {
        self.inner
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }

    /// Deliveries accepted by a queue whose handler has not finished yet.
    ///
    /// Covers queued messages and handlers still running, including those of
    /// subscriptions disposed mid-delivery.
    pub fn pending(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }
}

/// Worker loop of one subscription.
async fn deliver<T, F, Fut>(
    mut rx: mpsc::Receiver<Envelope<T>>,
    handler: F,
    filter: Option<Filter<T>>,
    on_error: ErrorHandler,
    live: Arc<AtomicBool>,
) where
    T: Message,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    while let Some(Envelope { message, in_flight }) = rx.recv().await {
        if !live.load(Ordering::Acquire) {
            break;
        }

        if let Some(filter) = &filter {
            match std::panic::catch_unwind(AssertUnwindSafe(|| filter(message.as_ref()))) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(panic) => {
                    let info = panic_info(panic.as_ref());
                    report(&on_error, &DeliveryError::HandlerPanicked { message: T::KIND, info });
                    continue;
                }
            }
        }

        let handled = AssertUnwindSafe(async { handler(message).await })
            .catch_unwind()
            .await;
        match handled {
            Ok(Ok(())) => {}
            Ok(Err(e)) => report(
                &on_error,
                &DeliveryError::HandlerFailed {
                    message: T::KIND,
                    error: e.to_string(),
                },
            ),
            Err(panic) => {
                let info = panic_info(panic.as_ref());
                report(&on_error, &DeliveryError::HandlerPanicked { message: T::KIND, info });
            }
        }
        drop(in_flight);
    }
    // Discard what is still queued so it stops counting as pending.
    rx.close();
    while rx.recv().await.is_some() {}
    debug!(message = T::KIND, "subscription worker finished");
}

/// Logs `err` and hands it to the subscription's error handler.
fn report(on_error: &ErrorHandler, err: &DeliveryError) {
    warn!(label = err.as_label(), error = %err, "message delivery failed");
    if std::panic::catch_unwind(AssertUnwindSafe(|| on_error(err))).is_err() {
        error!(label = err.as_label(), "delivery error handler panicked");
    }
}

fn panic_info(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a live subscription.
///
/// Dropping the handle disposes the subscription.
#[must_use = "dropping a Subscription disposes it"]
pub struct Subscription {
    id: u64,
    type_id: TypeId,
    kind: &'static str,
    bus: Weak<BusInner>,
    live: Arc<AtomicBool>,
}

impl Subscription {
    /// Stops future deliveries. Idempotent.
    pub fn dispose(&self) {
        if !self.live.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.type_id, self.id);
        }
        debug!(message = self.kind, subscription = self.id, "unsubscribed");
    }

    /// Returns false once disposed.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Kind of message this subscription receives.
    pub fn message_kind(&self) -> &'static str {
        self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}
