use std::any::{self, Any};
use std::fmt::{self, Debug};
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

/// Canonical tag of a message type, used for handler dispatch and allowlists.
pub type TypeName = Arc<str>;

/// A value that can be published under a fixed type tag.
///
/// Tags are plain strings so that handlers and allowlists can be declared
/// without naming the Rust type, e.g. from configuration.
pub trait MessageType: Any + Send + Sync {
    /// The tag messages of this type are published under.
    const TYPE_NAME: &'static str;
}

macro_rules! impl_message_type {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl MessageType for $ty {
                const TYPE_NAME: &'static str = $name;
            }
        )*
    };
}

impl_message_type!(
    String => "string",
    &'static str => "string",
    bool => "bool",
    i8 => "int8",
    i16 => "int16",
    i32 => "int32",
    i64 => "int64",
    isize => "int",
    u8 => "uint8",
    u16 => "uint16",
    u32 => "uint32",
    u64 => "uint64",
    usize => "uint",
    f32 => "float32",
    f64 => "float64",
    Bytes => "bytes",
);

/// A type-erased message.
///
/// Cloning is cheap: every subscriber of a topic receives a clone sharing the
/// same payload.
#[derive(Clone)]
pub struct Message {
    id: Uuid,
    type_name: TypeName,
    rust_type: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Message {
    /// Wraps a value under its [`MessageType`] tag.
    pub fn new<T: MessageType>(value: T) -> Self {
        Self::tagged(T::TYPE_NAME, value)
    }

    /// Wraps any value under an explicit tag.
    pub fn tagged<T>(type_name: impl Into<TypeName>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            id: Uuid::new_v4(),
            type_name: type_name.into(),
            rust_type: any::type_name::<T>(),
            payload: Arc::new(value),
        }
    }

    /// Unique id of this message. Clones share the id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The tag the message was published under.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub(crate) fn type_name_arc(&self) -> TypeName {
        Arc::clone(&self.type_name)
    }

    /// Name of the Rust type wrapped by this message.
    #[must_use]
    pub const fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    /// Returns the payload if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.payload).downcast_ref::<T>()
    }

    /// Whether the payload is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        (*self.payload).is::<T>()
    }

    /// Returns the payload as a string slice if it is a `String` or `&'static str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.downcast_ref::<&'static str>().copied())
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("rust_type", &self.rust_type)
            .finish_non_exhaustive()
    }
}

impl<T: MessageType> From<T> for Message {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
