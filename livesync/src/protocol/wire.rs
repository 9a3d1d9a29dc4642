//! Little-endian byte writer and reader, and the payload codecs built on them.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::descriptor::PayloadKind;
use super::layout::{FixedLayout, ensure_len, fnv1a};
use super::{ProtocolError, WireError};

/// Appends little-endian fields to a byte buffer.
pub struct WireWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> WireWriter<'a> {
    /// Writes after whatever `buf` already holds.
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a `u32` length followed by the UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// [`WireError::LengthOverflow`] for strings longer than `u32::MAX`.
    pub fn put_str(&mut self, s: &str) -> Result<(), WireError> {
        let len = u32::try_from(s.len()).map_err(|_| WireError::LengthOverflow)?;
        self.put_u32(len);
        self.put_bytes(s.as_bytes());
        Ok(())
    }

    /// Reserves a `u32` length field and returns its position for
    /// [`patch_len`](Self::patch_len).
    pub fn begin_len(&mut self) -> usize {
        let at = self.buf.len();
        self.put_u32(0);
        at
    }

    /// Fills the field reserved at `at` with the number of bytes written since.
    ///
    /// # Errors
    ///
    /// [`WireError::LengthOverflow`] if more than `u32::MAX` bytes followed.
    pub fn patch_len(&mut self, at: usize) -> Result<(), WireError> {
        let written = self.buf.len() - at - 4;
        let len = u32::try_from(written).map_err(|_| WireError::LengthOverflow)?;
        self.buf[at..at + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Consumes little-endian fields from a byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> WireReader<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.cursor
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        ensure_len(self.remaining(), N)?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(&self.buf[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(raw)
    }

    /// # Errors
    ///
    /// [`WireError::BufferTooSmall`] when the input is exhausted; the same
    /// applies to every `take_*` method.
    pub fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn take_u16(&mut self) -> Result<u16, WireError> {
        self.take().map(u16::from_le_bytes)
    }

    pub fn take_u32(&mut self) -> Result<u32, WireError> {
        self.take().map(u32::from_le_bytes)
    }

    pub fn take_u64(&mut self) -> Result<u64, WireError> {
        self.take().map(u64::from_le_bytes)
    }

    pub fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        ensure_len(self.remaining(), len)?;
        let slice = &self.buf[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(slice)
    }

    /// Reads a `u32`-length-prefixed block.
    pub fn take_len_prefixed(&mut self) -> Result<&'a [u8], WireError> {
        let len = usize::try_from(self.take_u32()?).map_err(|_| WireError::LengthOverflow)?;
        self.take_bytes(len)
    }

    /// Reads a string written by [`WireWriter::put_str`].
    ///
    /// # Errors
    ///
    /// Also [`WireError::InvalidUtf8`] when the bytes are not UTF-8.
    pub fn take_str(&mut self) -> Result<&'a str, WireError> {
        let bytes = self.take_len_prefixed()?;
        std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)
    }

    /// Skips to `position`, which must not be before the cursor.
    pub fn seek(&mut self, position: usize) -> Result<(), WireError> {
        ensure_len(self.buf.len(), position)?;
        self.cursor = position.max(self.cursor);
        Ok(())
    }
}

/// How a data payload is turned into bytes and back.
pub trait Codec: 'static {
    type Value: Send + 'static;

    const KIND: PayloadKind;

    /// Name recorded in the message table.
    fn type_name() -> &'static str;

    /// Hash compared against the remote's during lookup.
    fn layout_hash() -> u64;

    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the value cannot be encoded.
    fn encode(value: &Self::Value, out: &mut Vec<u8>) -> Result<(), ProtocolError>;

    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when `bytes` is not a valid encoding.
    fn decode(bytes: &[u8]) -> Result<Self::Value, ProtocolError>;
}

/// Last path segment of a type name, so both ends can define the payload
/// type in their own crate.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(at) => &full[at + 2..],
        None => full,
    }
}

/// Fixed-layout struct payload.
pub struct Binary<T>(PhantomData<fn() -> T>);

impl<T: FixedLayout + Send + 'static> Codec for Binary<T> {
    type Value = T;

    const KIND: PayloadKind = PayloadKind::Binary;

    fn type_name() -> &'static str {
        short_type_name::<T>()
    }

    fn layout_hash() -> u64 {
        T::LAYOUT_HASH
    }

    fn encode(value: &T, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let start = out.len();
        out.resize(start + T::SIZE, 0);
        value.write_to(&mut out[start..])?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<T, ProtocolError> {
        Ok(T::read_from(bytes)?)
    }
}

/// JSON-encoded payload for variable-shaped descriptors.
pub struct Json<T>(PhantomData<fn() -> T>);

impl<T: Serialize + DeserializeOwned + Send + 'static> Codec for Json<T> {
    type Value = T;

    const KIND: PayloadKind = PayloadKind::Json;

    fn type_name() -> &'static str {
        short_type_name::<T>()
    }

    fn layout_hash() -> u64 {
        fnv1a(short_type_name::<T>().as_bytes())
    }

    fn encode(value: &T, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        serde_json::to_writer(out, value)?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Length-prefixed UTF-8 payload.
pub struct Text;

impl Codec for Text {
    type Value = String;

    const KIND: PayloadKind = PayloadKind::Text;

    fn type_name() -> &'static str {
        "String"
    }

    fn layout_hash() -> u64 {
        fnv1a(b"String")
    }

    fn encode(value: &String, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        WireWriter::new(out).put_str(value)?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<String, ProtocolError> {
        Ok(WireReader::new(bytes).take_str()?.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn strings_are_length_prefixed() {
        let mut buf = Vec::new();
        WireWriter::new(&mut buf).put_str("take").unwrap();
        assert_eq!(buf, [4, 0, 0, 0, b't', b'a', b'k', b'e']);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.take_str().unwrap(), "take");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn truncated_string_is_rejected() {
        let buf = [9u8, 0, 0, 0, b'x'];
        assert_eq!(
            WireReader::new(&buf).take_str(),
            Err(WireError::BufferTooSmall { need: 9, have: 1 })
        );
        let bad = [2u8, 0, 0, 0, 0xff, 0xfe];
        assert_eq!(WireReader::new(&bad).take_str(), Err(WireError::InvalidUtf8));
    }

    #[test]
    fn patched_length_covers_block() {
        let mut buf = vec![0xaa];
        let mut writer = WireWriter::new(&mut buf);
        let at = writer.begin_len();
        writer.put_u16(7);
        writer.put_u8(1);
        writer.patch_len(at).unwrap();

        let mut reader = WireReader::new(&buf);
        reader.take_u8().unwrap();
        assert_eq!(reader.take_len_prefixed().unwrap(), &[7, 0, 1]);
    }

    #[test]
    fn short_names_drop_module_path() {
        assert_eq!(short_type_name::<String>(), "String");
        assert_eq!(short_type_name::<u32>(), "u32");
        assert_eq!(Binary::<f64>::type_name(), "f64");
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Slate {
        scene: u32,
        shot: String,
    }

    #[test]
    fn json_codec_rejects_garbage() {
        let mut out = Vec::new();
        let slate = Slate {
            scene: 4,
            shot: "A".into(),
        };
        Json::<Slate>::encode(&slate, &mut out).unwrap();
        assert_eq!(Json::<Slate>::decode(&out).unwrap(), slate);
        assert!(matches!(
            Json::<Slate>::decode(b"{\"scene\":"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn binary_codec_needs_full_layout() {
        assert!(matches!(
            Binary::<u32>::decode(&[1, 2]),
            Err(ProtocolError::Malformed(WireError::BufferTooSmall { need: 4, have: 2 }))
        ));
    }
}
