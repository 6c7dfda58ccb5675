//! Serialization contexts for the object fallback.
//!
//! A context is the set of type definitions a serializer can reconstruct from
//! a fallback-encoded payload. Types join a context by implementing
//! [`Portable`], which gives them a stable wire name, and being registered with
//! [`SerializationContextBuilder::register`].

use crate::{AnyValue, Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A type that can travel through the object fallback.
pub trait Portable: Serialize + DeserializeOwned + Any + Send + Sync {
    /// Stable name written to the stream to identify the type.
    const TYPE_NAME: &'static str;
}

impl Portable for Vec<String> {
    const TYPE_NAME: &'static str = "std.list.string";
}

impl Portable for Vec<i64> {
    const TYPE_NAME: &'static str = "std.list.long";
}

impl Portable for BTreeMap<String, String> {
    const TYPE_NAME: &'static str = "std.map.string";
}

type EncodeFn = fn(&dyn Any) -> Option<serde_json::Result<Vec<u8>>>;
type DecodeFn = fn(&[u8]) -> serde_json::Result<AnyValue>;

#[derive(Clone, Copy)]
pub(crate) struct PortableType {
    pub(crate) name: &'static str,
    pub(crate) encode: EncodeFn,
    pub(crate) decode: DecodeFn,
}

fn encode_portable<T: Portable>(value: &dyn Any) -> Option<serde_json::Result<Vec<u8>>> {
    value.downcast_ref::<T>().map(serde_json::to_vec)
}

fn decode_portable<T: Portable>(bytes: &[u8]) -> serde_json::Result<AnyValue> {
    serde_json::from_slice::<T>(bytes).map(|value| Box::new(value) as AnyValue)
}

/// Named set of types loadable by the object fallback.
pub struct SerializationContext {
    name: String,
    by_name: BTreeMap<&'static str, PortableType>,
    by_type: HashMap<TypeId, &'static str>,
}

impl SerializationContext {
    /// Start building a context with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SerializationContextBuilder {
        SerializationContextBuilder {
            context: Self {
                name: name.into(),
                by_name: BTreeMap::new(),
                by_type: HashMap::new(),
            },
        }
    }

    /// The context a serializer binds when none is supplied.
    ///
    /// Holds the portable standard collection types of this crate.
    #[must_use]
    pub fn builtin() -> Arc<Self> {
        let mut context = Self::builder("builtin").context;
        context.insert::<Vec<String>>();
        context.insert::<Vec<i64>>();
        context.insert::<BTreeMap<String, String>>();
        Arc::new(context)
    }

    fn insert<T: Portable>(&mut self) {
        self.by_name.insert(
            T::TYPE_NAME,
            PortableType {
                name: T::TYPE_NAME,
                encode: encode_portable::<T>,
                decode: decode_portable::<T>,
            },
        );
        self.by_type.insert(TypeId::of::<T>(), T::TYPE_NAME);
    }

    /// Name of this context.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable names of every type this context can load, sorted.
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_name.keys().copied()
    }

    /// Whether a portable type with the given name can be loaded.
    #[must_use]
    pub fn resolves(&self, type_name: &str) -> bool {
        self.by_name.contains_key(type_name)
    }

    /// Look up the portable type a value belongs to.
    pub(crate) fn portable_for(&self, value: &dyn Any) -> Option<PortableType> {
        let name = self.by_type.get(&value.type_id())?;
        self.by_name.get(name).copied()
    }

    /// Look up a portable type by its wire name.
    pub(crate) fn resolve(&self, type_name: &str) -> Option<PortableType> {
        self.by_name.get(type_name).copied()
    }
}

impl PartialEq for SerializationContext {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.by_name.keys().eq(other.by_name.keys())
    }
}

impl Eq for SerializationContext {}

impl Hash for SerializationContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        for name in self.by_name.keys() {
            name.hash(state);
        }
    }
}

impl fmt::Debug for SerializationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializationContext")
            .field("name", &self.name)
            .field("types", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`SerializationContext`].
pub struct SerializationContextBuilder {
    context: SerializationContext,
}

impl SerializationContextBuilder {
    /// Make `T` loadable by the context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateType`] if `T`, or another type with the same
    /// wire name, is already registered.
    pub fn register<T: Portable>(mut self) -> Result<Self> {
        if self.context.by_name.contains_key(T::TYPE_NAME)
            || self.context.by_type.contains_key(&TypeId::of::<T>())
        {
            return Err(Error::DuplicateType {
                type_name: T::TYPE_NAME,
            });
        }
        self.context.insert::<T>();
        Ok(self)
    }

    /// Include every type of another context.
    #[must_use]
    pub fn include(mut self, other: &SerializationContext) -> Self {
        for (name, portable) in &other.by_name {
            self.context.by_name.insert(*name, *portable);
        }
        for (type_id, name) in &other.by_type {
            self.context.by_type.insert(*type_id, *name);
        }
        self
    }

    /// Finish the context.
    #[must_use]
    pub fn build(self) -> Arc<SerializationContext> {
        Arc::new(self.context)
    }
}
