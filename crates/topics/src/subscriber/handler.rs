use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Message, MessageType, TypeName};

/// Key of the fallback handler.
pub const ANY: &str = "any";

/// Error returned by a failing handler.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Processes messages dispatched by a subscriber.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles the given message.
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Handler backed by a synchronous closure. See [`handler_fn`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}

/// Wraps a closure into a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Selects which messages a handler receives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    /// Fallback for messages without a typed handler.
    Any,

    /// Messages published under this tag.
    Type(TypeName),
}

impl HandlerKey {
    /// Key for messages of type `T`.
    #[must_use]
    pub fn of<T: MessageType>() -> Self {
        Self::Type(T::TYPE_NAME.into())
    }
}

impl From<&str> for HandlerKey {
    fn from(key: &str) -> Self {
        if key == ANY {
            Self::Any
        } else {
            Self::Type(key.into())
        }
    }
}

impl From<String> for HandlerKey {
    fn from(key: String) -> Self {
        Self::from(key.as_str())
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(ANY),
            Self::Type(name) => f.write_str(name),
        }
    }
}

/// Handlers passed to a subscriber at construction.
pub type Handlers = HashMap<HandlerKey, Arc<dyn Handler>>;

#[derive(Default)]
pub(crate) struct HandlerTable {
    typed: HashMap<TypeName, Arc<dyn Handler>>,
    any: Option<Arc<dyn Handler>>,
}

impl HandlerTable {
    /// Returns the handler previously registered under `key`, if any.
    pub(crate) fn insert(
        &mut self,
        key: HandlerKey,
        handler: Arc<dyn Handler>,
    ) -> Option<Arc<dyn Handler>> {
        match key {
            HandlerKey::Any => self.any.replace(handler),
            HandlerKey::Type(name) => self.typed.insert(name, handler),
        }
    }

    pub(crate) fn resolve(&self, type_name: &str) -> Option<Arc<dyn Handler>> {
        self.typed
            .get(type_name)
            .or(self.any.as_ref())
            .map(Arc::clone)
    }

    pub(crate) fn len(&self) -> usize {
        self.typed.len() + usize::from(self.any.is_some())
    }
}
