//! Typed in-process event bus.
//!
//! Single producer, many consumers. Handlers run synchronously in
//! registration order on every emit; async consumers get a per-subscriber
//! queue. Queues are unbounded: nothing is dropped and the producer never
//! blocks, at the cost of memory when a consumer stalls.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum Sink<T> {
    Handler(Handler<T>),
    Queue(mpsc::UnboundedSender<QueueItem<T>>),
}

enum QueueItem<T> {
    Event(T),
    Complete,
}

struct SubEntry<T> {
    id: u64,
    once: bool,
    sink: Sink<T>,
}

struct BusState<T> {
    next_id: u64,
    subscribers: Vec<SubEntry<T>>,
    history: Vec<T>,
    completed: bool,
}

/// A broadcaster for one event type.
///
/// Cloning shares the underlying bus. Events form a total order observed
/// identically by every subscriber.
pub struct EventBus<T> {
    state: Arc<Mutex<BusState<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered subscription; cancelling removes the handler synchronously.
pub struct Subscription<T> {
    id: u64,
    state: Arc<Mutex<BusState<T>>>,
}

impl<T> Subscription<T> {
    /// Remove the handler. No event emitted after this call reaches it.
    pub fn cancel(self) {
        self.state.lock().subscribers.retain(|s| s.id != self.id);
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_id: 0,
                subscribers: Vec::new(),
                history: Vec::new(),
                completed: false,
            })),
        }
    }

    /// Register a handler for every future event.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        self.register(Arc::new(handler), false)
    }

    /// Register a handler that fires for the next event only.
    pub fn once(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        self.register(Arc::new(handler), true)
    }

    fn register(&self, handler: Handler<T>, once: bool) -> Subscription<T> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(SubEntry {
            id,
            once,
            sink: Sink::Handler(handler),
        });
        Subscription { id, state: self.state.clone() }
    }

    /// Emit an event to every current subscriber, in registration order.
    ///
    /// Never blocks. A panicking handler is caught and logged; other handlers
    /// and the producer are unaffected.
    pub fn emit(&self, event: T) {
        let (handlers, queues) = {
            let mut state = self.state.lock();
            if state.completed {
                tracing::debug!("event emitted after completion; dropping");
                return;
            }
            state.history.push(event.clone());

            let mut handlers = Vec::new();
            let mut queues = Vec::new();
            for sub in &state.subscribers {
                match &sub.sink {
                    Sink::Handler(h) => handlers.push(h.clone()),
                    Sink::Queue(tx) => queues.push(tx.clone()),
                }
            }
            // One-shot handlers are removed before delivery so a re-entrant
            // emit cannot fire them twice.
            state.subscribers.retain(|s| !s.once);
            (handlers, queues)
        };

        for handler in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&event);
            }));
            if result.is_err() {
                tracing::error!("event handler panicked; continuing with remaining handlers");
            }
        }
        for queue in queues {
            let _ = queue.send(QueueItem::Event(event.clone()));
        }
    }

    /// Mark the bus complete. Idempotent; consumers end once their queues
    /// drain, and later emits are dropped.
    pub fn complete(&self) {
        let queues = {
            let mut state = self.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            state
                .subscribers
                .iter()
                .filter_map(|s| match &s.sink {
                    Sink::Queue(tx) => Some(tx.clone()),
                    Sink::Handler(_) => None,
                })
                .collect::<Vec<_>>()
        };
        for queue in queues {
            let _ = queue.send(QueueItem::Complete);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Async consumer of live events: yields every event emitted after this
    /// call, ending when the bus completes. Started after completion, it ends
    /// immediately.
    pub fn stream(&self) -> EventStream<T> {
        let mut state = self.state.lock();
        if state.completed {
            return EventStream { history: Vec::new().into_iter(), rx: None };
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(SubEntry {
            id,
            once: false,
            sink: Sink::Queue(tx),
        });
        EventStream { history: Vec::new().into_iter(), rx: Some(rx) }
    }

    /// Async consumer that first replays the buffered history, then yields
    /// live events. The switch is atomic: no event is lost or duplicated
    /// between the replayed prefix and the live suffix.
    pub fn replay_stream(&self) -> EventStream<T> {
        let mut state = self.state.lock();
        let history = state.history.clone();
        if state.completed {
            return EventStream { history: history.into_iter(), rx: None };
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push(SubEntry {
            id,
            once: false,
            sink: Sink::Queue(tx),
        });
        EventStream { history: history.into_iter(), rx: Some(rx) }
    }

    /// Number of events emitted so far.
    pub fn len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().history.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventStream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Async iterator over bus events: an optional history prefix, then live
/// events until completion.
pub struct EventStream<T> {
    history: std::vec::IntoIter<T>,
    rx: Option<mpsc::UnboundedReceiver<QueueItem<T>>>,
}

impl<T: Unpin> futures_core::Stream for EventStream<T> {
    type Item = T;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<T>> {
        let this = self.get_mut();
        if let Some(event) = this.history.next() {
            return std::task::Poll::Ready(Some(event));
        }
        let Some(rx) = this.rx.as_mut() else {
            return std::task::Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            std::task::Poll::Ready(Some(QueueItem::Event(event))) => {
                std::task::Poll::Ready(Some(event))
            }
            std::task::Poll::Ready(Some(QueueItem::Complete)) | std::task::Poll::Ready(None) => {
                this.rx = None;
                std::task::Poll::Ready(None)
            }
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}
