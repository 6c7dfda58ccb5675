//! Primitive encoder and decoder.
//!
//! All fixed-width numerics are written big-endian. Strings and byte arrays
//! carry a `u32` big-endian length prefix.

use crate::{Error, Result};
use std::io::{self, Read, Write};

/// Writes primitive values to a byte stream.
pub struct Encoder<'a> {
    writer: &'a mut dyn Write,
}

impl<'a> Encoder<'a> {
    /// Wrap a writer.
    pub fn new(writer: &'a mut dyn Write) -> Self {
        Self { writer }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .map_err(|e| Error::io(e, "write"))
    }

    /// Write a single unsigned byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.put(&[value])
    }

    /// Write a single signed byte.
    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    /// Write a boolean as `0` or `1`.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Write a big-endian `i16`.
    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    /// Write a big-endian `i32`.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    /// Write a big-endian `u32`.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    /// Write a big-endian `i64`.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    /// Write a big-endian IEEE-754 `f32`.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    /// Write a big-endian IEEE-754 `f64`.
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.put(&value.to_be_bytes())
    }

    /// Write a length-prefixed byte array.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| Error::malformed(format!("block of {} bytes is too large", value.len())))?;
        self.write_u32(len)?;
        self.put(value)
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write bytes with no framing.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.put(value)
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| Error::io(e, "flush"))
    }

    /// The underlying writer, for encoders that produce their own framing.
    pub fn writer(&mut self) -> &mut dyn Write {
        &mut *self.writer
    }
}

impl std::fmt::Debug for Encoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder").finish_non_exhaustive()
    }
}

/// Reads primitive values from a byte stream.
pub struct Decoder<'a> {
    reader: &'a mut dyn Read,
}

impl<'a> Decoder<'a> {
    /// Wrap a reader.
    pub fn new(reader: &'a mut dyn Read) -> Self {
        Self { reader }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader
            .read_exact(&mut buf)
            .map_err(|e| Error::io(e, "read"))?;
        Ok(buf)
    }

    /// Read one byte, or `None` on a clean end of stream.
    pub fn try_read_u8(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::io(e, "read")),
            }
        }
    }

    /// Read exactly `N` bytes with no length prefix.
    pub fn read_raw<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.take()
    }

    /// Read a single unsigned byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a single signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.take()?))
    }

    /// Read a boolean; any byte other than `0` or `1` is malformed.
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::malformed(format!("invalid boolean byte {other:#04x}"))),
        }
    }

    /// Read a big-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    /// Read a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    /// Read a big-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take()?))
    }

    /// Read a big-endian `f64`.
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take()?))
    }

    /// Read a length-prefixed byte array.
    ///
    /// The buffer grows with the data actually present, so a corrupt length
    /// prefix cannot force a huge allocation up front.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()?;
        let mut buf = Vec::new();
        let read = (&mut *self.reader)
            .take(u64::from(len))
            .read_to_end(&mut buf)
            .map_err(|e| Error::io(e, "read"))?;
        if read != len as usize {
            return Err(Error::io(
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected {len} bytes, stream ended after {read}"),
                ),
                "read",
            ));
        }
        Ok(buf)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| Error::malformed(format!("invalid UTF-8: {e}")))
    }

    /// The underlying reader, for decoders that consume their own framing.
    pub fn reader(&mut self) -> &mut dyn Read {
        &mut *self.reader
    }
}

impl std::fmt::Debug for Decoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder").finish_non_exhaustive()
    }
}
