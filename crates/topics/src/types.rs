//! Type allowlists for type safe topics.

use std::any;
use std::collections::HashMap;

use crate::message::{Message, MessageType, TypeName};

/// Describes an allowlisted message type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: TypeName,
    rust_type: &'static str,
}

impl TypeDescriptor {
    /// Descriptor for a [`MessageType`].
    #[must_use]
    pub fn of<T: MessageType>() -> Self {
        Self {
            name: T::TYPE_NAME.into(),
            rust_type: any::type_name::<T>(),
        }
    }

    /// Descriptor taken from a sample message.
    #[must_use]
    pub fn from_sample(sample: &Message) -> Self {
        Self {
            name: sample.type_name_arc(),
            rust_type: sample.rust_type(),
        }
    }

    /// The type tag.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The Rust type the descriptor was built from.
    #[must_use]
    pub const fn rust_type(&self) -> &'static str {
        self.rust_type
    }
}

/// Set of message type tags a type safe topic accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeAllowlist {
    types: HashMap<TypeName, TypeDescriptor>,
}

impl TypeAllowlist {
    /// Creates an empty allowlist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an allowlist from representative messages.
    ///
    /// Samples sharing a tag overwrite each other, the last one wins.
    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let mut allowlist = Self::new();
        for sample in samples {
            allowlist.insert_descriptor(TypeDescriptor::from_sample(sample));
        }
        allowlist
    }

    /// Adds `T` and returns the allowlist, for chaining.
    #[must_use]
    pub fn with<T: MessageType>(mut self) -> Self {
        self.insert::<T>();
        self
    }

    /// Adds `T`.
    pub fn insert<T: MessageType>(&mut self) {
        self.insert_descriptor(TypeDescriptor::of::<T>());
    }

    /// Adds a descriptor, replacing any previous one with the same tag.
    pub fn insert_descriptor(&mut self, descriptor: TypeDescriptor) {
        self.types.insert(descriptor.name.clone(), descriptor);
    }

    /// Merges every entry of `other` into this allowlist.
    pub fn merge(&mut self, other: Self) {
        self.types.extend(other.types);
    }

    /// Whether the tag is allowlisted.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Whether the message's tag is allowlisted.
    #[must_use]
    pub fn allows(&self, message: &Message) -> bool {
        self.contains(message.type_name())
    }

    /// Looks up the descriptor for a tag.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.types.get(type_name)
    }

    /// Iterates over the allowlisted tags.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(|name| &**name)
    }

    /// Number of allowlisted tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether nothing is allowlisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
