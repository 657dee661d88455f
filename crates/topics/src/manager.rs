use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::{TopicConfig, TopicManagerConfig};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use crate::topic::Topic;

/// Registry of topics by name.
///
/// The manager is an ordinary value: create one per application (or per test)
/// and share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct TopicManager {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    config: TopicManagerConfig,
}

impl TopicManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(config: TopicManagerConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// The manager's configuration.
    #[must_use]
    pub const fn config(&self) -> &TopicManagerConfig {
        &self.config
    }

    /// Registers a topic under its current name.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTopic` if the name is taken. The registered topic is
    /// left in place.
    pub fn register(&self, topic: Arc<Topic>) -> Result<()> {
        let name = topic.name();
        match self.topics.write().entry(name.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateTopic(name)),
            Entry::Vacant(entry) => {
                entry.insert(topic);
                debug!(topic = %name, "registered topic");
                Ok(())
            }
        }
    }

    /// Creates a topic and registers it.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Topic::new`] and [`TopicManager::register`].
    pub fn create_topic(
        &self,
        name: impl Into<String>,
        config: TopicConfig,
        publishers: &[Arc<Publisher>],
    ) -> Result<Arc<Topic>> {
        let topic = Topic::new(name, config, publishers)?;
        self.register(Arc::clone(&topic))?;
        Ok(topic)
    }

    /// Looks up a topic, creating it when auto-creation is enabled.
    pub fn lookup(&self, name: &str) -> Option<Arc<Topic>> {
        if let Some(topic) = self.topics.read().get(name) {
            return Some(Arc::clone(topic));
        }
        if !self.config.auto_create || name.is_empty() {
            return None;
        }

        let mut topics = self.topics.write();
        if let Some(topic) = topics.get(name) {
            return Some(Arc::clone(topic));
        }

        let topic = Topic::new(name, self.config.default_topic_config.clone(), &[]).ok()?;
        topics.insert(name.to_string(), Arc::clone(&topic));
        info!(topic = %name, "auto-created topic");
        Some(topic)
    }

    /// Looks up several topics. Unknown names are skipped and nothing is
    /// auto-created.
    pub fn lookup_many<I>(&self, names: I) -> Vec<Arc<Topic>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let topics = self.topics.read();
        names
            .into_iter()
            .filter_map(|name| topics.get(name.as_ref()).cloned())
            .collect()
    }

    /// Checks whether the named topic's allowlist contains the message's type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTopic` if no topic is registered under `name`.
    pub fn check_type(&self, name: &str, message: &Message) -> Result<bool> {
        let topic = self
            .topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTopic(name.to_string()))?;
        Ok(topic.types().allows(message))
    }

    /// Renames a registered topic and moves its registration to the new name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTopic` if `from` is not registered, `DuplicateTopic` if
    /// `to` is, or any error of [`Topic::rename`].
    pub fn rename_topic(&self, from: &str, to: &str) -> Result<()> {
        let mut topics = self.topics.write();
        let topic = topics
            .get(from)
            .cloned()
            .ok_or_else(|| Error::UnknownTopic(from.to_string()))?;
        if from == to {
            return Ok(());
        }
        if topics.contains_key(to) {
            return Err(Error::DuplicateTopic(to.to_string()));
        }

        topic.rename(to)?;
        topics.remove(from);
        topics.insert(to.to_string(), topic);
        Ok(())
    }

    /// Names of all registered topics, sorted.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.topics.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.read().len()
    }

    /// Whether no topic is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.read().is_empty()
    }

    /// Stops every subscriber of every registered topic, draining their inboxes.
    ///
    /// Topics stay registered.
    pub async fn shutdown(&self) {
        let topics: Vec<Arc<Topic>> = self.topics.read().values().cloned().collect();

        let mut subscribers: Vec<Arc<Subscriber>> = Vec::new();
        for subscriber in topics.iter().flat_map(|topic| topic.subscribers()) {
            if !subscribers.iter().any(|known| Arc::ptr_eq(known, &subscriber)) {
                subscribers.push(subscriber);
            }
        }

        info!(topics = topics.len(), subscribers = subscribers.len(), "shutting down");
        join_all(subscribers.iter().map(|subscriber| subscriber.stop())).await;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::subscriber::{Handlers, SubscriberState};
    use crate::types::TypeAllowlist;

    #[test]
    fn test_register_keeps_first_topic() {
        let manager = TopicManager::default();
        let first = Topic::new("orders", TopicConfig::default(), &[]).unwrap();
        let second = Topic::new("orders", TopicConfig::default(), &[]).unwrap();

        manager.register(Arc::clone(&first)).unwrap();
        let result = manager.register(second);

        assert_matches!(result, Err(Error::DuplicateTopic(name)) if name == "orders");
        assert!(Arc::ptr_eq(&manager.lookup("orders").unwrap(), &first));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_lookup_without_auto_create() {
        let manager = TopicManager::default();

        assert!(manager.lookup("missing").is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_lookup_auto_creates_once() {
        let manager = TopicManager::new(TopicManagerConfig::auto_create(
            TopicConfig::default().allow_all_publishers(true),
        ));

        let first = manager.lookup("events").unwrap();
        let second = manager.lookup("events").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.config().allow_all_publishers);
        assert!(manager.lookup("").is_none());
        assert_eq!(manager.topic_names(), vec!["events"]);
    }

    #[test]
    fn test_lookup_many_preserves_order() {
        let manager = TopicManager::new(TopicManagerConfig::auto_create(TopicConfig::default()));
        manager.create_topic("a", TopicConfig::default(), &[]).unwrap();
        manager.create_topic("b", TopicConfig::default(), &[]).unwrap();

        let topics = manager.lookup_many(["b", "missing", "a"]);

        let names: Vec<_> = topics.iter().map(|topic| topic.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_check_type() {
        let manager = TopicManager::default();
        manager
            .create_topic(
                "numbers",
                TopicConfig::default().types(TypeAllowlist::new().with::<i64>()),
                &[],
            )
            .unwrap();

        assert_eq!(manager.check_type("numbers", &Message::new(1_i64)), Ok(true));
        assert_eq!(manager.check_type("numbers", &Message::new("one")), Ok(false));
        assert_matches!(
            manager.check_type("missing", &Message::new(1_i64)),
            Err(Error::UnknownTopic(_))
        );
    }

    #[test]
    fn test_rename_topic_rekeys() {
        let manager = TopicManager::default();
        let topic = manager
            .create_topic("old", TopicConfig::default().allow_set_name(true), &[])
            .unwrap();
        manager.create_topic("taken", TopicConfig::default(), &[]).unwrap();

        assert_matches!(manager.rename_topic("old", "taken"), Err(Error::DuplicateTopic(_)));
        assert_matches!(manager.rename_topic("missing", "new"), Err(Error::UnknownTopic(_)));

        manager.rename_topic("old", "new").unwrap();

        assert_eq!(topic.name(), "new");
        assert!(manager.lookup("old").is_none());
        assert!(Arc::ptr_eq(&manager.lookup("new").unwrap(), &topic));
    }

    #[test]
    fn test_rename_topic_respects_policy() {
        let manager = TopicManager::default();
        manager.create_topic("fixed", TopicConfig::default(), &[]).unwrap();

        assert_matches!(manager.rename_topic("fixed", "other"), Err(Error::NotPermitted { .. }));
        assert_eq!(manager.topic_names(), vec!["fixed"]);
    }

    #[test]
    fn test_topic_rename_leaves_registration() {
        let manager = TopicManager::default();
        let topic = manager
            .create_topic("before", TopicConfig::default().allow_set_name(true), &[])
            .unwrap();

        topic.rename("after").unwrap();

        assert!(Arc::ptr_eq(&manager.lookup("before").unwrap(), &topic));
        assert!(manager.lookup("after").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_shared_subscribers_once() {
        let manager = TopicManager::default();
        let a = manager.create_topic("a", TopicConfig::default(), &[]).unwrap();
        let b = manager.create_topic("b", TopicConfig::default(), &[]).unwrap();
        let shared = Subscriber::new("shared", Handlers::new(), &[a, b]).unwrap();
        shared.listen();

        manager.shutdown().await;

        assert_eq!(shared.state(), SubscriberState::Stopped);
        assert_eq!(manager.len(), 2);
    }
}
