//! In-process publish/subscribe over named topics.
//!
//! Publishers send messages to [`Topic`]s, which check authorization and
//! message types before fanning out to every [`Subscriber`]. Each subscriber
//! owns an inbox drained by its own tokio task, dispatching messages to
//! handlers by type tag. A [`TopicManager`] keeps topics addressable by name.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod manager;
mod message;
mod publisher;
mod topic;
mod types;

/// Subscribers and the handlers they dispatch to.
pub mod subscriber;

pub use config::{InboxCapacity, SubscriberConfig, TopicConfig, TopicManagerConfig};
pub use error::{Error, Result};
pub use manager::TopicManager;
pub use message::{Message, MessageType, TypeName};
pub use publisher::Publisher;
pub use subscriber::{
    ANY, FnHandler, Handler, HandlerError, HandlerKey, Handlers, Subscriber, SubscriberState,
    SubscriberStats, handler_fn,
};
pub use topic::{Delivery, Topic};
pub use types::{TypeAllowlist, TypeDescriptor};
