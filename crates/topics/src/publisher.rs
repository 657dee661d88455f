use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::topic::{Delivery, Topic};

/// A named message source.
///
/// A publisher only sends to topics that whitelist it, or that accept all
/// publishers. It keeps weak references to the topics it was whitelisted on so
/// it can broadcast to all of them.
#[derive(Debug)]
pub struct Publisher {
    name: String,
    topics: RwLock<Vec<Weak<Topic>>>,
}

impl Publisher {
    /// Creates a publisher.
    ///
    /// # Errors
    ///
    /// Returns `EmptyName` if `name` is empty.
    pub fn new(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        Ok(Arc::new(Self {
            name,
            topics: RwLock::new(Vec::new()),
        }))
    }

    /// The publisher's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn track(&self, topic: &Arc<Topic>) {
        let topic = Arc::downgrade(topic);
        let mut topics = self.topics.write();
        topics.retain(|known| known.strong_count() > 0);
        if !topics.iter().any(|known| known.ptr_eq(&topic)) {
            topics.push(topic);
        }
    }

    /// Topics that whitelisted this publisher and are still alive.
    #[must_use]
    pub fn topics(&self) -> Vec<Arc<Topic>> {
        self.topics.read().iter().filter_map(Weak::upgrade).collect()
    }

    /// Publishes to a single topic. Shorthand for [`Topic::publish`].
    ///
    /// # Errors
    ///
    /// Returns `UnauthorizedPublisher` if the topic does not accept this publisher.
    pub fn publish<I>(&self, topic: &Topic, messages: I) -> Result<Delivery>
    where
        I: IntoIterator,
        I::Item: Into<Message>,
    {
        topic.publish(self, messages)
    }

    /// Publishes the same batch to every topic this publisher is whitelisted on.
    ///
    /// Returns one result per topic, keyed by the topic's current name.
    pub fn publish_all<I>(&self, messages: I) -> Vec<(String, Result<Delivery>)>
    where
        I: IntoIterator,
        I::Item: Into<Message>,
    {
        let messages: Vec<Message> = messages.into_iter().map(Into::into).collect();
        let topics = self.topics();
        debug!(
            publisher = %self.name,
            topics = topics.len(),
            messages = messages.len(),
            "broadcasting"
        );

        topics
            .into_iter()
            .map(|topic| {
                let result = topic.publish(self, messages.iter().cloned());
                (topic.name(), result)
            })
            .collect()
    }
}
