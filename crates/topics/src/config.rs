use crate::types::TypeAllowlist;

/// Policy for a single topic.
///
/// Everything is disabled by default: a default topic is not type safe, has
/// a fixed name and whitelist, and rejects duplicate member names.
#[derive(Clone, Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct TopicConfig {
    /// Allowlisted message types. A non-empty allowlist makes the topic type safe.
    pub types: TypeAllowlist,
    /// Reject messages whose type is not allowlisted.
    pub type_safe: bool,
    /// Allow extending the allowlist after creation.
    pub allow_set_types: bool,
    /// Allow toggling type safety after creation.
    pub allow_set_type_safe: bool,
    /// Allow renaming the topic.
    pub allow_set_name: bool,
    /// Replace subscribers and publishers registered under an existing name.
    pub allow_override: bool,
    /// Allow whitelisting publishers after creation.
    pub allow_add_publisher: bool,
    /// Accept messages from any publisher.
    pub allow_all_publishers: bool,
}

impl TopicConfig {
    /// Set the allowlisted types
    #[must_use]
    pub fn types(mut self, types: TypeAllowlist) -> Self {
        self.types = types;
        self
    }

    /// Set whether the topic is type safe
    #[must_use]
    pub const fn type_safe(mut self, type_safe: bool) -> Self {
        self.type_safe = type_safe;
        self
    }

    /// Set whether the allowlist can be extended
    #[must_use]
    pub const fn allow_set_types(mut self, allow: bool) -> Self {
        self.allow_set_types = allow;
        self
    }

    /// Set whether type safety can be toggled
    #[must_use]
    pub const fn allow_set_type_safe(mut self, allow: bool) -> Self {
        self.allow_set_type_safe = allow;
        self
    }

    /// Set whether the topic can be renamed
    #[must_use]
    pub const fn allow_set_name(mut self, allow: bool) -> Self {
        self.allow_set_name = allow;
        self
    }

    /// Set whether duplicate member names replace existing members
    #[must_use]
    pub const fn allow_override(mut self, allow: bool) -> Self {
        self.allow_override = allow;
        self
    }

    /// Set whether publishers can be whitelisted after creation
    #[must_use]
    pub const fn allow_add_publisher(mut self, allow: bool) -> Self {
        self.allow_add_publisher = allow;
        self
    }

    /// Set whether every publisher is accepted
    #[must_use]
    pub const fn allow_all_publishers(mut self, allow: bool) -> Self {
        self.allow_all_publishers = allow;
        self
    }
}

/// Capacity of a subscriber's inbox.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InboxCapacity {
    /// Publishing never fails for lack of room.
    #[default]
    Unbounded,

    /// At most this many queued messages; further deliveries are dropped
    /// and reported as `InboxFull`. Zero is treated as one.
    Bounded(usize),
}

/// Configuration for a subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubscriberConfig {
    /// Inbox capacity.
    pub inbox: InboxCapacity,
}

impl SubscriberConfig {
    /// Use a bounded inbox of the given capacity.
    #[must_use]
    pub const fn bounded(capacity: usize) -> Self {
        Self {
            inbox: InboxCapacity::Bounded(capacity),
        }
    }
}

/// Configuration for the topic manager
#[derive(Clone, Debug, Default)]
pub struct TopicManagerConfig {
    /// Create a topic on first lookup of an unknown name
    pub auto_create: bool,
    /// Config used for auto-created topics
    pub default_topic_config: TopicConfig,
}

impl TopicManagerConfig {
    /// Config with auto-creation enabled, using `default_topic_config` for new topics.
    #[must_use]
    pub const fn auto_create(default_topic_config: TopicConfig) -> Self {
        Self {
            auto_create: true,
            default_topic_config,
        }
    }
}
