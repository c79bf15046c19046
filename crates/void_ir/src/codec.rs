//! Binary wire format
//!
//! Every persisted component uses the same framing:
//!
//! ```text
//! u32 magic | u32 format_version | payload
//! ```
//!
//! Payload fields are little-endian. Strings are `u32` length-prefixed,
//! byte blobs are `u64` length-prefixed, `bool` is a single byte and enum
//! discriminants are a single `u8`. Decoders never panic: a truncated buffer,
//! a bad discriminant or a magic/version mismatch yields `None`.

/// Maximum nesting depth accepted when decoding recursive values
pub const MAX_DECODE_DEPTH: usize = 64;

/// Declares a fieldless enum together with its one-byte wire tag
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $tag:literal,)+
        }
    ) => {
        $(#[$meta])*
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub(crate) fn tag(self) -> u8 {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }

            pub(crate) fn from_tag(tag: u8) -> Option<Self> {
                match tag {
                    $($tag => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use wire_enum;

/// Append-only little-endian writer
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Write the `magic | version` header
    pub fn write_header(&mut self, magic: [u8; 4], version: u32) {
        self.buf.extend_from_slice(&magic);
        self.write_u32(version);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a `u32` length-prefixed UTF-8 string
    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Write a `u64` length-prefixed byte blob
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_u64(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    /// Write an optional value as a presence byte followed by the value
    pub fn write_option<T>(&mut self, value: Option<&T>, write: impl FnOnce(&mut Self, &T)) {
        match value {
            Some(v) => {
                self.write_bool(true);
                write(self, v);
            }
            None => self.write_bool(false),
        }
    }

    /// Write a `u32` element count followed by every element
    pub fn write_seq<'a, T: 'a, I>(&mut self, items: I, mut write: impl FnMut(&mut Self, &T))
    where
        I: IntoIterator<Item = &'a T>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = items.into_iter();
        self.write_u32(iter.len() as u32);
        for item in iter {
            write(self, item);
        }
    }

    /// Current encoded length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked little-endian reader
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.remaining() {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Some(out)
    }

    /// Read the header, returning the version if the magic matches and the
    /// version is within `1..=max_version`
    pub fn read_header(&mut self, magic: [u8; 4], max_version: u32) -> Option<u32> {
        let found: [u8; 4] = self.take_array()?;
        if found != magic {
            log::debug!(
                "wire magic mismatch: expected {:?}, found {:?}",
                String::from_utf8_lossy(&magic),
                String::from_utf8_lossy(&found)
            );
            return None;
        }
        let version = self.read_u32()?;
        if version == 0 || version > max_version {
            log::debug!("unsupported wire version {} (max {})", version, max_version);
            return None;
        }
        Some(version)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_bool(&mut self) -> Option<bool> {
        match self.read_u8()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.take_array().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.take_array().map(i32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.take_array().map(u64::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Option<i64> {
        self.take_array().map(i64::from_le_bytes)
    }

    pub fn read_f64(&mut self) -> Option<f64> {
        self.take_array().map(f64::from_le_bytes)
    }

    pub fn read_string(&mut self) -> Option<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    pub fn read_bytes(&mut self) -> Option<Vec<u8>> {
        let len = usize::try_from(self.read_u64()?).ok()?;
        self.take(len).map(<[u8]>::to_vec)
    }

    pub fn read_option<T>(&mut self, read: impl FnOnce(&mut Self) -> Option<T>) -> Option<Option<T>> {
        if self.read_bool()? {
            read(self).map(Some)
        } else {
            Some(None)
        }
    }

    /// Read a `u32` element count followed by every element
    pub fn read_seq<T>(&mut self, mut read: impl FnMut(&mut Self) -> Option<T>) -> Option<Vec<T>> {
        let count = self.read_u32()? as usize;
        // Every element occupies at least one byte, so a count larger than
        // the remaining input is corrupt.
        if count > self.remaining() {
            return None;
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read(self)?);
        }
        Some(out)
    }
}

/// Types with a framed binary representation
pub trait WireFormat: Sized {
    /// Four-byte ASCII magic identifying the type
    const MAGIC: [u8; 4];
    /// Current format version written by `to_bytes`
    const VERSION: u32 = 1;

    /// Encode the payload (no header)
    fn encode_payload(&self, w: &mut ByteWriter);

    /// Decode the payload written by a producer at `version`
    fn decode_payload(r: &mut ByteReader<'_>, version: u32) -> Option<Self>;

    /// Encode with the `magic | version` header
    fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_header(Self::MAGIC, Self::VERSION);
        self.encode_payload(&mut w);
        w.into_bytes()
    }

    /// Decode a framed buffer; trailing bytes are rejected
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut r = ByteReader::new(bytes);
        let version = r.read_header(Self::MAGIC, Self::VERSION)?;
        let value = Self::decode_payload(&mut r, version)?;
        r.is_exhausted().then_some(value)
    }
}
