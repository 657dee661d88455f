mod handler;
mod inbox;

pub use handler::{ANY, FnHandler, Handler, HandlerError, HandlerKey, Handlers, handler_fn};

use handler::HandlerTable;
use inbox::{InboxReceiver, InboxSender, inbox};

use std::fmt::{self, Debug};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, trace};

use crate::config::SubscriberConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::topic::Topic;

/// Lifecycle of a subscriber. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberState {
    /// Created, inbox filling up but nothing consumed yet.
    Created,
    /// Consume task running.
    Listening,
    /// Inbox closed, remaining messages being dispatched.
    Draining,
    /// Consume task finished.
    Stopped,
}

/// Point-in-time dispatch counters of a subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Messages a handler processed successfully.
    pub handled: u64,
    /// Messages dropped because no handler matched.
    pub unhandled: u64,
    /// Messages whose handler returned an error or panicked.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    handled: AtomicU64,
    unhandled: AtomicU64,
    failed: AtomicU64,
}

/// Receives messages from the topics it joined and dispatches them to handlers
/// keyed by message type.
///
/// Messages queue up in the inbox from the moment the subscriber joins a topic;
/// they are consumed once [`Subscriber::listen`] has been called.
pub struct Subscriber {
    name: String,
    config: SubscriberConfig,
    inbox: InboxSender,
    receiver: Mutex<Option<InboxReceiver>>,
    handlers: Arc<RwLock<HandlerTable>>,
    subscriptions: RwLock<Vec<Weak<Topic>>>,
    state: Arc<Mutex<SubscriberState>>,
    counters: Arc<Counters>,
    stop_sender: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    /// Creates a subscriber with an unbounded inbox, registers `handlers` and
    /// joins every topic in `topics`.
    ///
    /// # Errors
    ///
    /// Returns `EmptyName` for an empty name, or the first error raised while
    /// registering a handler or joining a topic.
    pub fn new(
        name: impl Into<String>,
        handlers: Handlers,
        topics: &[Arc<Topic>],
    ) -> Result<Arc<Self>> {
        Self::with_config(name, SubscriberConfig::default(), handlers, topics)
    }

    /// Like [`Subscriber::new`] with an explicit configuration.
    ///
    /// # Errors
    ///
    /// See [`Subscriber::new`].
    pub fn with_config(
        name: impl Into<String>,
        config: SubscriberConfig,
        handlers: Handlers,
        topics: &[Arc<Topic>],
    ) -> Result<Arc<Self>> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        let (inbox, receiver) = inbox(config.inbox);
        let (stop_sender, _) = watch::channel(false);

        let subscriber = Arc::new(Self {
            name,
            config,
            inbox,
            receiver: Mutex::new(Some(receiver)),
            handlers: Arc::new(RwLock::new(HandlerTable::default())),
            subscriptions: RwLock::new(Vec::new()),
            state: Arc::new(Mutex::new(SubscriberState::Created)),
            counters: Arc::new(Counters::default()),
            stop_sender,
            task: Mutex::new(None),
        });

        for (key, handler) in handlers {
            subscriber.register_handler(key, handler)?;
        }
        for topic in topics {
            subscriber.subscribe(topic)?;
        }

        debug!(subscriber = %subscriber.name, "created subscriber");
        Ok(subscriber)
    }

    /// The subscriber's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The subscriber's configuration.
    #[must_use]
    pub const fn config(&self) -> SubscriberConfig {
        self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriberState {
        *self.state.lock()
    }

    /// Snapshot of the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> SubscriberStats {
        SubscriberStats {
            handled: self.counters.handled.load(Ordering::Relaxed),
            unhandled: self.counters.unhandled.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Number of registered handlers, the `any` handler included.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether the inbox stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Joins a topic.
    ///
    /// # Errors
    ///
    /// Propagates the topic's `AlreadyExists` error.
    pub fn subscribe(self: &Arc<Self>, topic: &Arc<Topic>) -> Result<()> {
        topic.add_subscriber(Arc::clone(self))?;

        let mut subscriptions = self.subscriptions.write();
        let topic = Arc::downgrade(topic);
        subscriptions.retain(|known| known.strong_count() > 0 && !known.ptr_eq(&topic));
        subscriptions.push(topic);
        Ok(())
    }

    /// Topics this subscriber joined that are still alive.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Arc<Topic>> {
        self.subscriptions
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Registers a handler, silently replacing any handler under the same key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the key names an empty type.
    pub fn register_handler(
        &self,
        key: impl Into<HandlerKey>,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        let key = key.into();
        if matches!(&key, HandlerKey::Type(name) if name.is_empty()) {
            return Err(Error::InvalidArgument(
                "handler key must name a type or 'any'".to_string(),
            ));
        }

        let replaced = self.handlers.write().insert(key.clone(), handler).is_some();
        debug!(subscriber = %self.name, %key, replaced, "registered handler");
        Ok(())
    }

    /// Starts consuming the inbox on a new task.
    ///
    /// Only the first call has an effect. Outside a tokio runtime the call is
    /// logged and ignored, leaving the subscriber in `Created`.
    pub fn listen(&self) {
        let Ok(runtime) = Handle::try_current() else {
            error!(subscriber = %self.name, "listen called outside a tokio runtime");
            return;
        };

        let mut receiver = self.receiver.lock();
        let Some(inbox) = receiver.take() else {
            debug!(subscriber = %self.name, "already listening or stopped, ignoring");
            return;
        };

        *self.state.lock() = SubscriberState::Listening;

        let consumer = Consumer {
            subscriber: self.name.clone(),
            handlers: Arc::clone(&self.handlers),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
        };
        let stop_receiver = self.stop_sender.subscribe();
        let span = info_span!("subscriber", name = %self.name);
        let task = runtime.spawn(consumer.run(inbox, stop_receiver).instrument(span));
        *self.task.lock() = Some(task);
        drop(receiver);

        debug!(subscriber = %self.name, "listening");
    }

    /// Stops the subscriber gracefully.
    ///
    /// The inbox is closed, messages already queued are dispatched, and the
    /// call returns once the consume task has finished. A subscriber that never
    /// listened drops its queued messages.
    pub async fn stop(&self) {
        let task = {
            let mut receiver = self.receiver.lock();
            if let Some(mut inbox) = receiver.take() {
                inbox.close();
                *self.state.lock() = SubscriberState::Stopped;
                debug!(subscriber = %self.name, dropped = inbox.len(), "stopped before listening");
                return;
            }
            self.task.lock().take()
        };

        self.stop_sender.send_replace(true);

        if let Some(task) = task {
            if let Err(error) = task.await {
                error!(subscriber = %self.name, %error, "consume task ended abnormally");
                *self.state.lock() = SubscriberState::Stopped;
            }
        }
    }

    /// Enqueues a message for this subscriber.
    pub(crate) fn deliver(&self, message: Message) -> Result<()> {
        self.inbox.push(&self.name, message)
    }
}

impl Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}

struct Consumer {
    subscriber: String,
    handlers: Arc<RwLock<HandlerTable>>,
    state: Arc<Mutex<SubscriberState>>,
    counters: Arc<Counters>,
}

impl Consumer {
    async fn run(self, mut receiver: InboxReceiver, mut stop_receiver: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = async { stop_receiver.wait_for(|stopped| *stopped).await.map(|_| ()) } => {
                    break;
                }
                message = receiver.recv() => {
                    match message {
                        Some(message) => self.dispatch(message).await,
                        None => break,
                    }
                }
            }
        }

        *self.state.lock() = SubscriberState::Draining;
        receiver.close();
        debug!(subscriber = %self.subscriber, pending = receiver.len(), "draining inbox");

        while let Some(message) = receiver.recv().await {
            self.dispatch(message).await;
        }

        *self.state.lock() = SubscriberState::Stopped;
        debug!(subscriber = %self.subscriber, "stopped");
    }

    async fn dispatch(&self, message: Message) {
        let handler = self.handlers.read().resolve(message.type_name());
        let Some(handler) = handler else {
            self.counters.unhandled.fetch_add(1, Ordering::Relaxed);
            let error = Error::NoHandlerFound {
                subscriber: self.subscriber.clone(),
                type_name: message.type_name().to_string(),
            };
            error!(message_id = %message.id(), "{error}");
            return;
        };

        let message_id = message.id();
        let type_name = message.type_name_arc();
        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(())) => {
                self.counters.handled.fetch_add(1, Ordering::Relaxed);
                trace!(subscriber = %self.subscriber, %message_id, "handled message");
            }
            Ok(Err(error)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    subscriber = %self.subscriber,
                    %message_id,
                    type_name = %type_name,
                    %error,
                    "handler failed"
                );
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    subscriber = %self.subscriber,
                    %message_id,
                    type_name = %type_name,
                    "handler panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::TopicConfig;
    use crate::publisher::Publisher;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Arc<dyn Handler> {
        let counter = Arc::clone(counter);
        handler_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_empty_name_rejected() {
        assert_matches!(Subscriber::new("", Handlers::new(), &[]), Err(Error::EmptyName));
    }

    #[test]
    fn test_register_handler_rejects_empty_type() {
        let subscriber = Subscriber::new("sub", Handlers::new(), &[]).unwrap();

        let result = subscriber.register_handler("", handler_fn(|_| Ok(())));

        assert_matches!(result, Err(Error::InvalidArgument(_)));
        assert_eq!(subscriber.handler_count(), 0);
    }

    #[test]
    fn test_register_handler_replaces_silently() {
        let subscriber = Subscriber::new("sub", Handlers::new(), &[]).unwrap();

        subscriber.register_handler("string", handler_fn(|_| Ok(()))).unwrap();
        subscriber.register_handler("string", handler_fn(|_| Ok(()))).unwrap();
        subscriber.register_handler(ANY, handler_fn(|_| Ok(()))).unwrap();

        assert_eq!(subscriber.handler_count(), 2);
    }

    #[test]
    fn test_new_joins_initial_topics() {
        let first = Topic::new("first", TopicConfig::default(), &[]).unwrap();
        let second = Topic::new("second", TopicConfig::default(), &[]).unwrap();

        let subscriber =
            Subscriber::new("sub", Handlers::new(), &[Arc::clone(&first), Arc::clone(&second)])
                .unwrap();

        assert_eq!(first.subscriber_names(), vec!["sub".to_string()]);
        assert_eq!(second.subscriber_names(), vec!["sub".to_string()]);
        assert_eq!(subscriber.subscriptions().len(), 2);
    }

    #[test]
    fn test_new_propagates_subscribe_error() {
        let topic = Topic::new("topic", TopicConfig::default(), &[]).unwrap();
        Subscriber::new("sub", Handlers::new(), &[Arc::clone(&topic)]).unwrap();

        let result = Subscriber::new("sub", Handlers::new(), &[topic]);

        assert_matches!(result, Err(Error::AlreadyExists { kind: "subscriber", .. }));
    }

    #[tokio::test]
    async fn test_dispatch_by_type_with_any_fallback() {
        let publisher = Publisher::new("pub").unwrap();
        let topic = Topic::new("topic", TopicConfig::default(), &[Arc::clone(&publisher)]).unwrap();

        let (typed_tx, mut typed_rx) = mpsc::unbounded_channel();
        let (any_tx, mut any_rx) = mpsc::unbounded_channel();
        let mut handlers = Handlers::new();
        handlers.insert(
            HandlerKey::of::<String>(),
            handler_fn(move |message| {
                typed_tx
                    .send(message.as_str().unwrap_or_default().to_string())
                    .map_err(|_| HandlerError::new("test receiver dropped"))
            }),
        );
        handlers.insert(
            HandlerKey::Any,
            handler_fn(move |message| {
                any_tx
                    .send(message.type_name().to_string())
                    .map_err(|_| HandlerError::new("test receiver dropped"))
            }),
        );

        let subscriber = Subscriber::new("sub", handlers, &[Arc::clone(&topic)]).unwrap();
        subscriber.listen();

        topic
            .publish(&publisher, [Message::new("hello"), Message::new(3_u16)])
            .unwrap();

        let typed = timeout(Duration::from_secs(1), typed_rx.recv()).await.unwrap();
        assert_eq!(typed.as_deref(), Some("hello"));
        let any = timeout(Duration::from_secs(1), any_rx.recv()).await.unwrap();
        assert_eq!(any.as_deref(), Some("uint16"));
    }

    #[tokio::test]
    async fn test_no_handler_does_not_stop_loop() {
        let publisher = Publisher::new("pub").unwrap();
        let topic = Topic::new("topic", TopicConfig::default(), &[Arc::clone(&publisher)]).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let subscriber = Subscriber::new("sub", Handlers::new(), &[Arc::clone(&topic)]).unwrap();
        subscriber
            .register_handler(HandlerKey::of::<i32>(), counting_handler(&counter))
            .unwrap();
        subscriber.listen();

        topic
            .publish(&publisher, [Message::new("unhandled"), Message::new(1_i32)])
            .unwrap();
        subscriber.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            subscriber.stats(),
            SubscriberStats {
                handled: 1,
                unhandled: 1,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unhandled_message_is_logged() {
        let publisher = Publisher::new("pub").unwrap();
        let topic = Topic::new("topic", TopicConfig::default(), &[Arc::clone(&publisher)]).unwrap();
        let subscriber = Subscriber::new("sub", Handlers::new(), &[Arc::clone(&topic)]).unwrap();
        subscriber.listen();

        topic.publish(&publisher, [1.5_f64]).unwrap();
        subscriber.stop().await;

        assert_eq!(subscriber.stats().unhandled, 1);
        assert!(logs_contain(
            "subscriber 'sub' has no handler for type 'float64' and no 'any' handler"
        ));
    }

    #[test]
    #[traced_test]
    fn test_listen_outside_runtime_is_ignored() {
        let publisher = Publisher::new("pub").unwrap();
        let topic = Topic::new("topic", TopicConfig::default(), &[Arc::clone(&publisher)]).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handlers = Handlers::new();
        handlers.insert(HandlerKey::Any, counting_handler(&counter));
        let subscriber = Subscriber::new("sub", handlers, &[Arc::clone(&topic)]).unwrap();
        topic.publish(&publisher, ["queued"]).unwrap();

        subscriber.listen();

        assert_eq!(subscriber.state(), SubscriberState::Created);
        assert!(!subscriber.is_closed());
        assert!(logs_contain("listen called outside a tokio runtime"));

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            subscriber.listen();
            subscriber.stop().await;
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(subscriber.state(), SubscriberState::Stopped);
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_are_contained() {
        let publisher = Publisher::new("pub").unwrap();
        let topic = Topic::new("topic", TopicConfig::default(), &[Arc::clone(&publisher)]).unwrap();

        let mut handlers = Handlers::new();
        handlers.insert(
            HandlerKey::Any,
            handler_fn(|message| match message.as_str() {
                Some("fail") => Err(HandlerError::new("refused")),
                Some("panic") => panic!("handler exploded"),
                _ => Ok(()),
            }),
        );
        let subscriber = Subscriber::new("sub", handlers, &[Arc::clone(&topic)]).unwrap();
        subscriber.listen();

        topic.publish(&publisher, ["fail", "panic", "fine"]).unwrap();
        subscriber.stop().await;

        assert_eq!(
            subscriber.stats(),
            SubscriberStats {
                handled: 1,
                unhandled: 0,
                failed: 2,
            }
        );
        assert_eq!(subscriber.state(), SubscriberState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_listen() {
        let publisher = Publisher::new("pub").unwrap();
        let topic = Topic::new("topic", TopicConfig::default(), &[Arc::clone(&publisher)]).unwrap();
        let subscriber = Subscriber::new("sub", Handlers::new(), &[Arc::clone(&topic)]).unwrap();
        assert_eq!(subscriber.state(), SubscriberState::Created);

        subscriber.stop().await;
        subscriber.listen();

        assert_eq!(subscriber.state(), SubscriberState::Stopped);
        assert!(subscriber.is_closed());
        let delivery = topic.publish(&publisher, ["late"]).unwrap();
        assert_eq!(delivery.inbox_closed, 1);
    }

    #[tokio::test]
    async fn test_subscribe_twice_with_override_tracks_topic_once() {
        let topic = Topic::new("topic", TopicConfig::default().allow_override(true), &[]).unwrap();
        let subscriber = Subscriber::new("sub", Handlers::new(), &[]).unwrap();

        subscriber.subscribe(&topic).unwrap();
        subscriber.subscribe(&topic).unwrap();

        assert_eq!(subscriber.subscriptions().len(), 1);
    }
}
