//! Codecs for individual value types.
//!
//! A [`Codec`] is statically typed. The registry stores codecs behind the
//! object-safe [`ErasedCodec`] so that values can be dispatched by their
//! runtime type; [`TypedCodec`] bridges the two.

use crate::{AnyValue, Decoder, Encoder, Error, Result};
use std::any::{Any, TypeId, type_name};
use std::marker::PhantomData;
use std::path::PathBuf;

/// Paired encode/decode functions for values of type `T`.
pub trait Codec<T>: Send + Sync {
    /// Write `value` to the encoder.
    fn encode(&self, encoder: &mut Encoder<'_>, value: &T) -> Result<()>;

    /// Read a value from the decoder.
    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<T>;
}

/// Type-erased codec stored in a [`CodecRegistry`](crate::CodecRegistry).
pub trait ErasedCodec: Send + Sync {
    /// `TypeId` of the values this codec handles.
    fn value_type(&self) -> TypeId;

    /// Rust type name of the values this codec handles.
    fn value_type_name(&self) -> &'static str;

    /// Encode a value whose concrete type must be [`Self::value_type`].
    fn encode_any(&self, encoder: &mut Encoder<'_>, value: &dyn Any) -> Result<()>;

    /// Decode a value into a boxed [`AnyValue`].
    fn decode_any(&self, decoder: &mut Decoder<'_>) -> Result<AnyValue>;
}

/// Adapter from a typed [`Codec`] to an [`ErasedCodec`].
pub struct TypedCodec<T, C> {
    codec: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> TypedCodec<T, C> {
    /// Wrap a typed codec.
    pub const fn new(codec: C) -> Self {
        Self {
            codec,
            _marker: PhantomData,
        }
    }
}

impl<T, C> ErasedCodec for TypedCodec<T, C>
where
    T: Any + Send + Sync,
    C: Codec<T>,
{
    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn value_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn encode_any(&self, encoder: &mut Encoder<'_>, value: &dyn Any) -> Result<()> {
        let value = value.downcast_ref::<T>().ok_or(Error::TypeMismatch {
            expected: type_name::<T>(),
        })?;
        self.codec.encode(encoder, value)
    }

    fn decode_any(&self, decoder: &mut Decoder<'_>) -> Result<AnyValue> {
        Ok(Box::new(self.codec.decode(decoder)?))
    }
}

/// Length-prefixed UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, encoder: &mut Encoder<'_>, value: &String) -> Result<()> {
        encoder.write_string(value)
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<String> {
        decoder.read_string()
    }
}

/// Single-byte booleans.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl Codec<bool> for BoolCodec {
    fn encode(&self, encoder: &mut Encoder<'_>, value: &bool) -> Result<()> {
        encoder.write_bool(*value)
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<bool> {
        decoder.read_bool()
    }
}

/// Declares a codec for a fixed-width numeric type backed by an
/// `Encoder::write_*` / `Decoder::read_*` pair.
macro_rules! numeric_codec {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $write:ident, $read:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Codec<$ty> for $name {
            fn encode(&self, encoder: &mut Encoder<'_>, value: &$ty) -> Result<()> {
                encoder.$write(*value)
            }

            fn decode(&self, decoder: &mut Decoder<'_>) -> Result<$ty> {
                decoder.$read()
            }
        }
    };
}

numeric_codec!(
    /// Signed bytes.
    ByteCodec, i8, write_i8, read_i8
);
numeric_codec!(
    /// Big-endian `i16`.
    ShortCodec, i16, write_i16, read_i16
);
numeric_codec!(
    /// Big-endian `i32`.
    IntCodec, i32, write_i32, read_i32
);
numeric_codec!(
    /// Big-endian `i64`.
    LongCodec, i64, write_i64, read_i64
);
numeric_codec!(
    /// Big-endian `f32`.
    FloatCodec, f32, write_f32, read_f32
);
numeric_codec!(
    /// Big-endian `f64`.
    DoubleCodec, f64, write_f64, read_f64
);

/// Filesystem paths, encoded as UTF-8 strings.
///
/// Paths that are not valid UTF-8 cannot be encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathCodec;

impl Codec<PathBuf> for PathCodec {
    fn encode(&self, encoder: &mut Encoder<'_>, value: &PathBuf) -> Result<()> {
        let path = value.to_str().ok_or_else(|| {
            Error::malformed(format!("path {} is not valid UTF-8", value.display()))
        })?;
        encoder.write_string(path)
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<PathBuf> {
        decoder.read_string().map(PathBuf::from)
    }
}

/// Length-prefixed byte arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, encoder: &mut Encoder<'_>, value: &Vec<u8>) -> Result<()> {
        encoder.write_bytes(value)
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<Vec<u8>> {
        decoder.read_bytes()
    }
}
