//! Binary channel serialization for kiln
//!
//! This crate provides the encoding layer used for fingerprints, cache entries
//! and messages exchanged between processes:
//! - Big-endian primitive [`Encoder`] and [`Decoder`]
//! - A [`CodecRegistry`] mapping value types to stable one-byte wire tags
//! - A [`ChannelSerializer`] that writes `[tag][payload]` records and falls
//!   back to an object encoding for types without a codec
//! - [`ChannelWriter`] and [`ChannelReader`] for record streams
//!
//! # Wire format
//!
//! ```text
//! record   := tag payload
//! tag      := u8            (0..=0xFE registered codec, 0xFF fallback)
//! fallback := string bytes  (portable type name, JSON body)
//! string   := u32-be length, UTF-8 bytes
//! bytes    := u32-be length, raw bytes
//! ```
//!
//! New tags may be added in later versions. A reader rejects tags it does not
//! know, but streams written by older versions always stay readable.
//!
//! # Fallback
//!
//! Values without a codec are written through the [`SerializationContext`]
//! bound to the serializer. Only types registered in that context as
//! [`Portable`] can be written or read back this way.

mod channel;
mod codec;
mod context;
mod encoding;
mod error;
mod registry;
mod serializer;

pub use channel::{ChannelReader, ChannelWriter, Record};
pub use codec::{
    BoolCodec, ByteCodec, BytesCodec, Codec, DoubleCodec, ErasedCodec, FloatCodec, IntCodec,
    LongCodec, PathCodec, ShortCodec, StringCodec, TypedCodec,
};
pub use context::{Portable, SerializationContext, SerializationContextBuilder};
pub use encoding::{Decoder, Encoder};
pub use error::{Error, Result};
pub use registry::{CodecRegistry, CodecRegistryBuilder, FALLBACK_TAG, tags};
pub use serializer::ChannelSerializer;

/// A decoded value of any type.
pub type AnyValue = Box<dyn std::any::Any + Send + Sync>;
