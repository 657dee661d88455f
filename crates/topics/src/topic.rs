//! Topics: authorization gate and fan-out for one named channel.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::config::TopicConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use crate::types::TypeAllowlist;

/// Outcome of a publish call.
///
/// Drops are reported here and through tracing; they never fail the publish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Messages in the batch.
    pub messages: usize,
    /// Successful enqueues, one per message and subscriber.
    pub enqueued: usize,
    /// Messages rejected by the type allowlist.
    pub rejected: usize,
    /// Enqueues dropped because a bounded inbox was full.
    pub inbox_full: usize,
    /// Enqueues dropped because the subscriber was stopped.
    pub inbox_closed: usize,
}

impl Delivery {
    /// Total number of dropped messages and enqueues.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.rejected + self.inbox_full + self.inbox_closed
    }
}

/// A named channel between publishers and subscribers.
pub struct Topic {
    name: RwLock<String>,
    config: RwLock<TopicConfig>,
    subscribers: RwLock<HashMap<String, Arc<Subscriber>>>,
    publishers: RwLock<HashMap<String, Arc<Publisher>>>,
}

impl Topic {
    /// Creates a topic whitelisting `publishers`.
    ///
    /// The initial publishers are accepted regardless of
    /// `allow_add_publisher`. A non-empty allowlist in `config` makes the topic
    /// type safe. The topic is not registered anywhere, so two topics may share
    /// a name and `DuplicateTopic` is never returned here; use
    /// [`TopicManager::create_topic`](crate::TopicManager::create_topic) to
    /// create and register in one step.
    ///
    /// # Errors
    ///
    /// Returns `EmptyName` if `name` is empty.
    pub fn new(
        name: impl Into<String>,
        mut config: TopicConfig,
        publishers: &[Arc<Publisher>],
    ) -> Result<Arc<Self>> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        if !config.types.is_empty() {
            config.type_safe = true;
        }

        let whitelist = publishers
            .iter()
            .map(|publisher| (publisher.name().to_string(), Arc::clone(publisher)))
            .collect();

        let topic = Arc::new(Self {
            name: RwLock::new(name),
            config: RwLock::new(config),
            subscribers: RwLock::new(HashMap::new()),
            publishers: RwLock::new(whitelist),
        });

        for publisher in publishers {
            publisher.track(&topic);
        }

        debug!(topic = %topic.name(), publishers = publishers.len(), "created topic");
        Ok(topic)
    }

    /// The topic's current name.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Snapshot of the topic's configuration.
    #[must_use]
    pub fn config(&self) -> TopicConfig {
        self.config.read().clone()
    }

    /// Publishes a batch of messages to every current subscriber.
    ///
    /// Messages are only enqueued; handlers run on the subscribers' own tasks.
    /// On a type safe topic, messages with a non-allowlisted type are dropped
    /// without affecting the rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns `UnauthorizedPublisher` if the publisher is not whitelisted and
    /// the topic does not accept all publishers.
    pub fn publish<I>(&self, publisher: &Publisher, messages: I) -> Result<Delivery>
    where
        I: IntoIterator,
        I::Item: Into<Message>,
    {
        let topic = self.name();
        if !self.is_authorized(publisher) {
            return Err(Error::UnauthorizedPublisher {
                publisher: publisher.name().to_string(),
                topic,
            });
        }

        let subscribers: Vec<Arc<Subscriber>> = self.subscribers.read().values().cloned().collect();
        let mut delivery = Delivery::default();

        for message in messages {
            let message = message.into();
            delivery.messages += 1;

            if !self.allows(&message) {
                delivery.rejected += 1;
                let error = Error::TypeNotAllowed {
                    topic: topic.clone(),
                    type_name: message.type_name().to_string(),
                };
                warn!(publisher = %publisher.name(), message_id = %message.id(), "{error}");
                continue;
            }

            for subscriber in &subscribers {
                match subscriber.deliver(message.clone()) {
                    Ok(()) => {
                        delivery.enqueued += 1;
                        trace!(
                            %topic,
                            subscriber = %subscriber.name(),
                            message_id = %message.id(),
                            "enqueued"
                        );
                    }
                    Err(error) => {
                        if matches!(error, Error::InboxFull(_)) {
                            delivery.inbox_full += 1;
                        } else {
                            delivery.inbox_closed += 1;
                        }
                        warn!(%topic, message_id = %message.id(), "{error}");
                    }
                }
            }
        }

        Ok(delivery)
    }

    fn is_authorized(&self, publisher: &Publisher) -> bool {
        self.config.read().allow_all_publishers
            || self.publishers.read().contains_key(publisher.name())
    }

    /// Whether a message passes the type check. Always true when the topic is
    /// not type safe.
    #[must_use]
    pub fn allows(&self, message: &Message) -> bool {
        let config = self.config.read();
        !config.type_safe || config.types.allows(message)
    }

    /// Adds a subscriber.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a subscriber with the same name is present
    /// and `allow_override` is disabled.
    pub fn add_subscriber(&self, subscriber: Arc<Subscriber>) -> Result<()> {
        let allow_override = self.config.read().allow_override;
        let name = subscriber.name().to_string();

        match self.subscribers.write().entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                if !allow_override {
                    return Err(Error::AlreadyExists {
                        kind: "subscriber",
                        name,
                        topic: self.name(),
                    });
                }
                entry.insert(subscriber);
                debug!(topic = %self.name(), subscriber = %name, "replaced subscriber");
            }
            Entry::Vacant(entry) => {
                entry.insert(subscriber);
                debug!(topic = %self.name(), subscriber = %name, "added subscriber");
            }
        }
        Ok(())
    }

    /// Removes a subscriber by name, returning it if it was present.
    pub fn remove_subscriber(&self, name: &str) -> Option<Arc<Subscriber>> {
        let removed = self.subscribers.write().remove(name);
        if removed.is_some() {
            debug!(topic = %self.name(), subscriber = %name, "removed subscriber");
        }
        removed
    }

    /// Whitelists a publisher.
    ///
    /// # Errors
    ///
    /// Returns `NotPermitted` if `allow_add_publisher` is disabled, or
    /// `AlreadyExists` if a publisher with the same name is whitelisted and
    /// `allow_override` is disabled.
    pub fn add_publisher(self: &Arc<Self>, publisher: Arc<Publisher>) -> Result<()> {
        let (allow_add, allow_override) = {
            let config = self.config.read();
            (config.allow_add_publisher, config.allow_override)
        };
        if !allow_add {
            return Err(self.not_permitted("add_publisher"));
        }

        let name = publisher.name().to_string();
        {
            let mut publishers = self.publishers.write();
            if publishers.contains_key(&name) && !allow_override {
                return Err(Error::AlreadyExists {
                    kind: "publisher",
                    name,
                    topic: self.name(),
                });
            }
            publishers.insert(name.clone(), Arc::clone(&publisher));
        }

        publisher.track(self);
        debug!(topic = %self.name(), publisher = %name, "added publisher");
        Ok(())
    }

    /// Renames the topic.
    ///
    /// A registered topic stays registered under its old name; use
    /// [`TopicManager::rename_topic`](crate::TopicManager::rename_topic) to
    /// move the registration as well.
    ///
    /// # Errors
    ///
    /// Returns `NotPermitted` if `allow_set_name` is disabled, or `EmptyName`
    /// if `name` is empty.
    pub fn rename(&self, name: impl Into<String>) -> Result<()> {
        if !self.config.read().allow_set_name {
            return Err(self.not_permitted("rename"));
        }
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        let previous = std::mem::replace(&mut *self.name.write(), name.clone());
        debug!(from = %previous, to = %name, "renamed topic");
        Ok(())
    }

    /// Merges `types` into the allowlist.
    ///
    /// # Errors
    ///
    /// Returns `NotPermitted` if `allow_set_types` is disabled, or `EmptyInput`
    /// if `types` is empty.
    pub fn set_types(&self, types: TypeAllowlist) -> Result<()> {
        let mut config = self.config.write();
        if !config.allow_set_types {
            drop(config);
            return Err(self.not_permitted("set_types"));
        }
        if types.is_empty() {
            return Err(Error::EmptyInput("set_types"));
        }

        config.types.merge(types);
        debug!(topic = %self.name(), types = config.types.len(), "extended type allowlist");
        Ok(())
    }

    /// Enables or disables type checking.
    ///
    /// # Errors
    ///
    /// Returns `NotPermitted` if `allow_set_type_safe` is disabled.
    pub fn set_type_safe(&self, type_safe: bool) -> Result<()> {
        let mut config = self.config.write();
        if !config.allow_set_type_safe {
            drop(config);
            return Err(self.not_permitted("set_type_safe"));
        }

        config.type_safe = type_safe;
        debug!(topic = %self.name(), type_safe, "changed type safety");
        Ok(())
    }

    /// Whether publish checks message types.
    #[must_use]
    pub fn is_type_safe(&self) -> bool {
        self.config.read().type_safe
    }

    /// Snapshot of the type allowlist.
    #[must_use]
    pub fn types(&self) -> TypeAllowlist {
        self.config.read().types.clone()
    }

    /// Names of the current subscribers, sorted.
    #[must_use]
    pub fn subscriber_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.subscribers.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// The subscriber registered under `name`.
    #[must_use]
    pub fn subscriber(&self, name: &str) -> Option<Arc<Subscriber>> {
        self.subscribers.read().get(name).cloned()
    }

    /// All current subscribers.
    #[must_use]
    pub fn subscribers(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.read().values().cloned().collect()
    }

    /// Names of the whitelisted publishers, sorted.
    #[must_use]
    pub fn publisher_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.publishers.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Whether a publisher with this name is whitelisted.
    #[must_use]
    pub fn has_publisher(&self, name: &str) -> bool {
        self.publishers.read().contains_key(name)
    }

    fn not_permitted(&self, operation: &'static str) -> Error {
        Error::NotPermitted {
            topic: self.name(),
            operation,
        }
    }
}

impl Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name())
            .field("config", &self.config())
            .field("subscribers", &self.subscriber_names())
            .field("publishers", &self.publisher_names())
            .finish()
    }
}
