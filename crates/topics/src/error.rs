use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur when working with topics, publishers and subscribers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A topic, publisher or subscriber was given an empty name.
    #[error("name must not be empty")]
    EmptyName,

    /// A topic with this name is already registered.
    #[error("topic '{0}' is already registered")]
    DuplicateTopic(String),

    /// No topic is registered under this name.
    #[error("topic '{0}' does not exist")]
    UnknownTopic(String),

    /// The publisher is not whitelisted and the topic does not accept all publishers.
    #[error("publisher '{publisher}' is not whitelisted for topic '{topic}'")]
    UnauthorizedPublisher {
        /// Name of the rejected publisher.
        publisher: String,
        /// Name of the topic.
        topic: String,
    },

    /// The topic's configuration does not allow this mutation.
    #[error("{operation} is not permitted on topic '{topic}'")]
    NotPermitted {
        /// Name of the topic.
        topic: String,
        /// The rejected operation.
        operation: &'static str,
    },

    /// A member with the same name exists and overriding is disabled.
    #[error("{kind} '{name}' already exists on topic '{topic}'")]
    AlreadyExists {
        /// Either `subscriber` or `publisher`.
        kind: &'static str,
        /// Name of the existing member.
        name: String,
        /// Name of the topic.
        topic: String,
    },

    /// A required argument was missing or blank.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation that needs at least one element received none.
    #[error("{0} requires at least one element")]
    EmptyInput(&'static str),

    /// Neither a typed nor an `any` handler matched an incoming message.
    #[error("subscriber '{subscriber}' has no handler for type '{type_name}' and no 'any' handler")]
    NoHandlerFound {
        /// Name of the subscriber.
        subscriber: String,
        /// Type tag of the dropped message.
        type_name: String,
    },

    /// A type safe topic rejected a message whose type is not allowlisted.
    #[error("type '{type_name}' is not allowed on topic '{topic}'")]
    TypeNotAllowed {
        /// Name of the topic.
        topic: String,
        /// Type tag of the rejected message.
        type_name: String,
    },

    /// A bounded inbox had no room for the message.
    #[error("inbox of subscriber '{0}' is full")]
    InboxFull(String),

    /// The subscriber was stopped and no longer accepts messages.
    #[error("inbox of subscriber '{0}' is closed")]
    InboxClosed(String),
}
