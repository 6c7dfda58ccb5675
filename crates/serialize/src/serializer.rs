//! Tag-dispatching serializer for arbitrary values.
//!
//! Every value is written as a one-byte tag followed by its payload. Values
//! whose type has a codec in the [`CodecRegistry`] use that codec; anything
//! else is written under [`FALLBACK_TAG`] through the object fallback of the
//! bound [`SerializationContext`]:
//!
//! ```text
//! [0xFF][type name: u32 len + UTF-8][body: u32 len + JSON]
//! ```
//!
//! Reading is asymmetric with writing. A fallback payload that is
//! truncated or otherwise unreadable decodes to `None`, while every failure on
//! the write path is returned to the caller unchanged.

use crate::context::SerializationContext;
use crate::registry::{CodecRegistry, FALLBACK_TAG};
use crate::{AnyValue, Decoder, Encoder, Error, Result};
use std::any::{Any, type_name};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, trace};

/// Serializer over a codec registry with an object fallback.
#[derive(Clone, Debug)]
pub struct ChannelSerializer {
    registry: Arc<CodecRegistry>,
    context: Arc<SerializationContext>,
}

impl ChannelSerializer {
    /// Create a serializer bound to [`SerializationContext::builtin`].
    #[must_use]
    pub fn new(registry: Arc<CodecRegistry>) -> Self {
        Self::with_context(registry, None)
    }

    /// Create a serializer bound to `context`, or to the builtin context
    /// when `None`.
    #[must_use]
    pub fn with_context(
        registry: Arc<CodecRegistry>,
        context: Option<Arc<SerializationContext>>,
    ) -> Self {
        Self {
            registry,
            context: context.unwrap_or_else(SerializationContext::builtin),
        }
    }

    /// The codec registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    /// The currently bound serialization context.
    #[must_use]
    pub fn context(&self) -> &Arc<SerializationContext> {
        &self.context
    }

    /// Bind a different serialization context for subsequent reads and writes.
    pub fn rebind_context(&mut self, context: Arc<SerializationContext>) {
        debug!(
            from = self.context.name(),
            to = context.name(),
            "Rebinding serialization context"
        );
        self.context = context;
    }

    /// Write a tagged value.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, [`Error::UnsupportedType`] if the
    /// value has neither a codec nor a portable registration in the bound
    /// context, or [`Error::Object`] if the object encoder fails.
    pub fn write(&self, encoder: &mut Encoder<'_>, value: &dyn Any) -> Result<()> {
        self.write_named(encoder, value, None)
    }

    /// Write a value of a statically known type.
    ///
    /// Unlike [`Self::write`], unsupported types are reported with their Rust
    /// type name.
    ///
    /// # Errors
    ///
    /// See [`Self::write`].
    pub fn write_value<T: Any>(&self, encoder: &mut Encoder<'_>, value: &T) -> Result<()> {
        self.write_named(encoder, value, Some(type_name::<T>()))
    }

    fn write_named(
        &self,
        encoder: &mut Encoder<'_>,
        value: &dyn Any,
        name: Option<&'static str>,
    ) -> Result<()> {
        let tag = self.registry.lookup_by_type(value);
        if tag != FALLBACK_TAG {
            trace!(tag, "Writing registered value");
            encoder.write_u8(tag)?;
            return self.registry.lookup_by_tag(tag)?.encode_any(encoder, value);
        }

        let portable = self
            .context
            .portable_for(value)
            .ok_or_else(|| Error::UnsupportedType {
                type_name: name.map_or_else(
                    || {
                        format!(
                            "unnamed type {:?} (written through `dyn Any`; use write_value for the type name)",
                            value.type_id()
                        )
                    },
                    str::to_string,
                ),
                context: self.context.name().to_string(),
            })?;
        let body = (portable.encode)(value)
            .ok_or(Error::TypeMismatch {
                expected: portable.name,
            })?
            .map_err(|e| Error::Object {
                message: e.to_string(),
            })?;

        trace!(type_name = portable.name, len = body.len(), "Writing fallback value");
        encoder.write_u8(FALLBACK_TAG)?;
        encoder.write_string(portable.name)?;
        encoder.write_bytes(&body)
    }

    /// Read a tagged value.
    ///
    /// Returns `Ok(None)` when a fallback payload is structurally invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag cannot be read, names no codec, a
    /// registered codec fails, or the fallback payload names a type the bound
    /// context cannot resolve.
    pub fn read(&self, decoder: &mut Decoder<'_>) -> Result<Option<AnyValue>> {
        let tag = decoder.read_u8()?;
        self.read_tagged(tag, decoder)
    }

    /// Read a value of a statically known type.
    ///
    /// # Errors
    ///
    /// See [`Self::read`]; additionally returns [`Error::TypeMismatch`] when
    /// the stream holds a value of another type.
    pub fn read_value<T: Any>(&self, decoder: &mut Decoder<'_>) -> Result<Option<T>> {
        match self.read(decoder)? {
            None => Ok(None),
            Some(value) => value
                .downcast::<T>()
                .map(|boxed| Some(*boxed))
                .map_err(|_| Error::TypeMismatch {
                    expected: type_name::<T>(),
                }),
        }
    }

    /// Encode a single value into a new buffer.
    ///
    /// # Errors
    ///
    /// See [`Self::write`].
    pub fn to_bytes(&self, value: &dyn Any) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write(&mut Encoder::new(&mut buf), value)?;
        Ok(buf)
    }

    /// Decode a single value from a buffer.
    ///
    /// # Errors
    ///
    /// See [`Self::read`].
    pub fn from_bytes(&self, mut bytes: &[u8]) -> Result<Option<AnyValue>> {
        self.read(&mut Decoder::new(&mut bytes))
    }

    pub(crate) fn read_tagged(&self, tag: u8, decoder: &mut Decoder<'_>) -> Result<Option<AnyValue>> {
        if tag == FALLBACK_TAG {
            return self.read_object(decoder);
        }
        self.registry
            .lookup_by_tag(tag)?
            .decode_any(decoder)
            .map(Some)
    }

    fn read_object(&self, decoder: &mut Decoder<'_>) -> Result<Option<AnyValue>> {
        let Some(type_name) = tolerate_corruption(decoder.read_string())? else {
            return Ok(None);
        };
        let Some(body) = tolerate_corruption(decoder.read_bytes())? else {
            return Ok(None);
        };
        let portable = self
            .context
            .resolve(&type_name)
            .ok_or_else(|| Error::UnresolvedType {
                type_name: type_name.clone(),
                context: self.context.name().to_string(),
            })?;
        match (portable.decode)(&body) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(type_name = %type_name, error = %e, "Discarding unreadable fallback payload");
                Ok(None)
            }
        }
    }
}

/// Map stream corruption on the fallback path to `None`.
fn tolerate_corruption<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_unexpected_eof() || matches!(e, Error::Malformed { .. }) => {
            debug!(error = %e, "Discarding corrupted fallback payload");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl PartialEq for ChannelSerializer {
    fn eq(&self, other: &Self) -> bool {
        self.registry == other.registry && self.context == other.context
    }
}

impl Eq for ChannelSerializer {}

impl Hash for ChannelSerializer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.registry.hash(state);
        self.context.hash(state);
    }
}
