//! Codec registry keyed by runtime type and by wire tag.
//!
//! A registry is assembled once with [`CodecRegistryBuilder`] and is immutable
//! afterwards, so lookups from many threads need no locking.

use crate::codec::{
    BoolCodec, ByteCodec, BytesCodec, Codec, DoubleCodec, ErasedCodec, FloatCodec, IntCodec,
    LongCodec, PathCodec, ShortCodec, StringCodec, TypedCodec,
};
use crate::{Error, Result};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Tag written in place of a codec tag when a value has no registered codec.
pub const FALLBACK_TAG: u8 = 0xFF;

/// Wire tags of the well-known types. These values are part of the stream
/// format and must never be renumbered.
pub mod tags {
    /// `String`
    pub const STRING: u8 = 0;
    /// `bool`
    pub const BOOL: u8 = 1;
    /// `i8`
    pub const BYTE: u8 = 2;
    /// `i16`
    pub const SHORT: u8 = 3;
    /// `i32`
    pub const INT: u8 = 4;
    /// `i64`
    pub const LONG: u8 = 5;
    /// `f32`
    pub const FLOAT: u8 = 6;
    /// `f64`
    pub const DOUBLE: u8 = 7;
    /// `PathBuf`
    pub const PATH: u8 = 8;
    /// `Vec<u8>`
    pub const BYTES: u8 = 9;
    /// First tag free for codecs registered on top of the well-known set.
    pub const FIRST_CUSTOM: u8 = 10;
}

/// Immutable mapping between value types, wire tags and codecs.
pub struct CodecRegistry {
    by_tag: BTreeMap<u8, Arc<dyn ErasedCodec>>,
    by_type: HashMap<TypeId, u8>,
}

impl CodecRegistry {
    /// Start an empty registry.
    #[must_use]
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder {
            registry: Self {
                by_tag: BTreeMap::new(),
                by_type: HashMap::new(),
            },
        }
    }

    /// Start a registry seeded with the well-known types.
    #[must_use]
    pub fn well_known_builder() -> CodecRegistryBuilder {
        let mut builder = Self::builder();
        builder.insert::<String, _>(tags::STRING, StringCodec);
        builder.insert::<bool, _>(tags::BOOL, BoolCodec);
        builder.insert::<i8, _>(tags::BYTE, ByteCodec);
        builder.insert::<i16, _>(tags::SHORT, ShortCodec);
        builder.insert::<i32, _>(tags::INT, IntCodec);
        builder.insert::<i64, _>(tags::LONG, LongCodec);
        builder.insert::<f32, _>(tags::FLOAT, FloatCodec);
        builder.insert::<f64, _>(tags::DOUBLE, DoubleCodec);
        builder.insert::<std::path::PathBuf, _>(tags::PATH, PathCodec);
        builder.insert::<Vec<u8>, _>(tags::BYTES, BytesCodec);
        builder
    }

    /// Registry holding exactly the well-known types.
    #[must_use]
    pub fn well_known() -> Arc<Self> {
        Self::well_known_builder().build()
    }

    /// Tag for the runtime type of `value`, or [`FALLBACK_TAG`] if the type
    /// has no codec.
    #[must_use]
    pub fn lookup_by_type(&self, value: &dyn Any) -> u8 {
        self.by_type
            .get(&value.type_id())
            .copied()
            .unwrap_or(FALLBACK_TAG)
    }

    /// Codec registered under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTag`] if nothing is registered under `tag`,
    /// including the fallback tag itself.
    pub fn lookup_by_tag(&self, tag: u8) -> Result<&dyn ErasedCodec> {
        self.by_tag
            .get(&tag)
            .map(|codec| codec.as_ref())
            .ok_or(Error::UnknownTag { tag })
    }

    /// Whether `T` has a registered codec.
    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Registered tags in ascending order.
    pub fn tags(&self) -> impl Iterator<Item = u8> + '_ {
        self.by_tag.keys().copied()
    }

    /// Number of registered codecs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    /// Whether the registry has no codecs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

impl PartialEq for CodecRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.by_tag.len() == other.by_tag.len()
            && self
                .by_tag
                .iter()
                .zip(&other.by_tag)
                .all(|((ta, a), (tb, b))| ta == tb && a.value_type() == b.value_type())
    }
}

impl Eq for CodecRegistry {}

impl Hash for CodecRegistry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (tag, codec) in &self.by_tag {
            tag.hash(state);
            codec.value_type().hash(state);
        }
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.by_tag
                    .iter()
                    .map(|(tag, codec)| (tag, codec.value_type_name())),
            )
            .finish()
    }
}

/// Builder for [`CodecRegistry`].
pub struct CodecRegistryBuilder {
    registry: CodecRegistry,
}

impl CodecRegistryBuilder {
    fn insert<T, C>(&mut self, tag: u8, codec: C)
    where
        T: Any + Send + Sync,
        C: Codec<T> + 'static,
    {
        self.registry
            .by_tag
            .insert(tag, Arc::new(TypedCodec::<T, C>::new(codec)));
        self.registry.by_type.insert(TypeId::of::<T>(), tag);
    }

    /// Register `codec` for values of type `T` under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedTag`] for [`FALLBACK_TAG`],
    /// [`Error::DuplicateTag`] if `tag` is taken and [`Error::DuplicateType`]
    /// if `T` already has a codec.
    pub fn register<T, C>(mut self, tag: u8, codec: C) -> Result<Self>
    where
        T: Any + Send + Sync,
        C: Codec<T> + 'static,
    {
        if tag == FALLBACK_TAG {
            return Err(Error::ReservedTag { tag });
        }
        if let Some(existing) = self.registry.by_tag.get(&tag) {
            return Err(Error::DuplicateTag {
                tag,
                existing: existing.value_type_name(),
            });
        }
        if self.registry.by_type.contains_key(&TypeId::of::<T>()) {
            return Err(Error::DuplicateType {
                type_name: std::any::type_name::<T>(),
            });
        }
        self.insert::<T, C>(tag, codec);
        Ok(self)
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> Arc<CodecRegistry> {
        Arc::new(self.registry)
    }
}
