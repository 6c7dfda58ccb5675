//! Record streams over a [`ChannelSerializer`].
//!
//! A channel is a sequence of tagged records written back to back with no
//! outer framing. The end of the underlying stream at a record boundary is the
//! end of the channel.

use crate::{AnyValue, ChannelSerializer, Decoder, Encoder, Result};
use std::any::Any;
use std::fmt;
use std::io::{Read, Write};

/// One record read from a channel.
pub enum Record {
    /// A decoded value.
    Value(AnyValue),
    /// A fallback payload that could not be read.
    Absent,
}

impl Record {
    /// The decoded value, if any.
    #[must_use]
    pub fn into_value(self) -> Option<AnyValue> {
        match self {
            Self::Value(value) => Some(value),
            Self::Absent => None,
        }
    }

    /// Borrow the value as `T`, if the record holds a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Value(value) => value.downcast_ref::<T>(),
            Self::Absent => None,
        }
    }

    /// Whether the record is [`Record::Absent`].
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Record::Value(..)"),
            Self::Absent => f.write_str("Record::Absent"),
        }
    }
}

/// Writes records to a byte stream.
#[derive(Debug)]
pub struct ChannelWriter<W> {
    inner: W,
    serializer: ChannelSerializer,
    records: u64,
}

impl<W: Write> ChannelWriter<W> {
    /// Create a writer.
    pub const fn new(inner: W, serializer: ChannelSerializer) -> Self {
        Self {
            inner,
            serializer,
            records: 0,
        }
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// See [`ChannelSerializer::write`].
    pub fn write(&mut self, value: &dyn Any) -> Result<()> {
        self.serializer
            .write(&mut Encoder::new(&mut self.inner), value)?;
        self.records += 1;
        Ok(())
    }

    /// Flush the underlying stream.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn flush(&mut self) -> Result<()> {
        Encoder::new(&mut self.inner).flush()
    }

    /// Number of records written so far.
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads records from a byte stream.
#[derive(Debug)]
pub struct ChannelReader<R> {
    inner: R,
    serializer: ChannelSerializer,
}

impl<R: Read> ChannelReader<R> {
    /// Create a reader.
    pub const fn new(inner: R, serializer: ChannelSerializer) -> Self {
        Self { inner, serializer }
    }

    /// Read the next record, or `None` at the end of the channel.
    ///
    /// # Errors
    ///
    /// See [`ChannelSerializer::read`].
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let mut decoder = Decoder::new(&mut self.inner);
        let Some(tag) = decoder.try_read_u8()? else {
            return Ok(None);
        };
        let record = match self.serializer.read_tagged(tag, &mut decoder)? {
            Some(value) => Record::Value(value),
            None => Record::Absent,
        };
        Ok(Some(record))
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for ChannelReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
