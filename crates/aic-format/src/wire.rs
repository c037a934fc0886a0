//! Tagged field encoding.
//!
//! Documents are records: a field count followed by fields, each carrying
//! its own tag, kind and length. Readers can therefore walk and verify any
//! record without knowing its schema, and skip fields added by newer
//! writers.
//!
//! ```text
//! record := count:u32 field*
//! field  := tag:u16 kind:u8 0:u8 len:u32 data[len]
//! ```
//!
//! All integers are little-endian. List kinds start with an element count;
//! string and record list elements are each prefixed with their length.

use crate::error::{FormatError, Result};

/// Bytes of a field header.
pub const FIELD_HEADER_SIZE: usize = 8;

const WHAT: &str = "record";

/// Encoding of a field's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    /// Unsigned byte
    U8 = 1,
    /// Unsigned 16-bit integer
    U16 = 2,
    /// Unsigned 32-bit integer
    U32 = 3,
    /// Unsigned 64-bit integer
    U64 = 4,
    /// Single byte, 0 or 1
    Bool = 5,
    /// UTF-8 text
    Str = 6,
    /// Opaque bytes
    Bytes = 7,
    /// Counted list of `u32`
    U32List = 8,
    /// Counted list of length-prefixed strings
    StrList = 9,
    /// Nested record
    Record = 10,
    /// Counted list of length-prefixed records
    RecordList = 11,
}

impl Kind {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::U8,
            2 => Self::U16,
            3 => Self::U32,
            4 => Self::U64,
            5 => Self::Bool,
            6 => Self::Str,
            7 => Self::Bytes,
            8 => Self::U32List,
            9 => Self::StrList,
            10 => Self::Record,
            11 => Self::RecordList,
            _ => return None,
        })
    }

    fn fixed_len(self) -> Option<usize> {
        match self {
            Self::U8 | Self::Bool => Some(1),
            Self::U16 => Some(2),
            Self::U32 => Some(4),
            Self::U64 => Some(8),
            _ => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn len32(len: usize) -> [u8; 4] {
    debug_assert!(u32::try_from(len).is_ok());
    (len as u32).to_le_bytes()
}

/// Builds one record.
#[derive(Debug, Clone, Default)]
pub struct RecordWriter {
    count: u32,
    body: Vec<u8>,
}

impl RecordWriter {
    /// Start an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn field(&mut self, tag: u16, kind: Kind, data: &[u8]) -> &mut Self {
        self.body.extend_from_slice(&tag.to_le_bytes());
        self.body.push(kind as u8);
        self.body.push(0);
        self.body.extend_from_slice(&len32(data.len()));
        self.body.extend_from_slice(data);
        self.count += 1;
        self
    }

    /// Append a `u8` field.
    pub fn u8(&mut self, tag: u16, v: u8) -> &mut Self {
        self.field(tag, Kind::U8, &[v])
    }

    /// Append a `u16` field.
    pub fn u16(&mut self, tag: u16, v: u16) -> &mut Self {
        self.field(tag, Kind::U16, &v.to_le_bytes())
    }

    /// Append a `u32` field.
    pub fn u32(&mut self, tag: u16, v: u32) -> &mut Self {
        self.field(tag, Kind::U32, &v.to_le_bytes())
    }

    /// Append a `u64` field.
    pub fn u64(&mut self, tag: u16, v: u64) -> &mut Self {
        self.field(tag, Kind::U64, &v.to_le_bytes())
    }

    /// Append a boolean field.
    pub fn bool(&mut self, tag: u16, v: bool) -> &mut Self {
        self.field(tag, Kind::Bool, &[u8::from(v)])
    }

    /// Append a string field.
    pub fn str(&mut self, tag: u16, v: &str) -> &mut Self {
        self.field(tag, Kind::Str, v.as_bytes())
    }

    /// Append an opaque byte field.
    pub fn bytes(&mut self, tag: u16, v: &[u8]) -> &mut Self {
        self.field(tag, Kind::Bytes, v)
    }

    /// Append a list of `u32`.
    pub fn u32_list(&mut self, tag: u16, v: &[u32]) -> &mut Self {
        let mut data = Vec::with_capacity(4 + v.len() * 4);
        data.extend_from_slice(&len32(v.len()));
        for x in v {
            data.extend_from_slice(&x.to_le_bytes());
        }
        self.field(tag, Kind::U32List, &data)
    }

    /// Append a list of strings.
    pub fn str_list<S: AsRef<str>>(&mut self, tag: u16, v: &[S]) -> &mut Self {
        let mut data = Vec::new();
        data.extend_from_slice(&len32(v.len()));
        for s in v {
            let s = s.as_ref().as_bytes();
            data.extend_from_slice(&len32(s.len()));
            data.extend_from_slice(s);
        }
        self.field(tag, Kind::StrList, &data)
    }

    /// Append a nested record.
    pub fn record(&mut self, tag: u16, v: RecordWriter) -> &mut Self {
        let data = v.finish();
        self.field(tag, Kind::Record, &data)
    }

    /// Append a list of nested records.
    pub fn record_list<I>(&mut self, tag: u16, v: I) -> &mut Self
    where
        I: IntoIterator<Item = RecordWriter>,
    {
        let records: Vec<Vec<u8>> = v.into_iter().map(RecordWriter::finish).collect();
        let mut data = Vec::new();
        data.extend_from_slice(&len32(records.len()));
        for r in &records {
            data.extend_from_slice(&len32(r.len()));
            data.extend_from_slice(r);
        }
        self.field(tag, Kind::RecordList, &data)
    }

    /// Encode the record.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.body.len());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Little-endian cursor over a byte slice.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self::of(WHAT, buf)
    }

    /// Cursor whose errors name `what`.
    pub(crate) fn of(what: &'static str, buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, what }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(FormatError::malformed(
                self.what,
                format!("need {n} bytes at offset {}, have {}", self.pos, self.remaining()),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut w = [0u8; 8];
        w.copy_from_slice(b);
        Ok(u64::from_le_bytes(w))
    }

    /// Length-prefixed slice.
    fn chunk(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

/// A verified field.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    /// Field tag
    pub tag: u16,
    /// Data encoding
    pub kind: Kind,
    /// Raw data
    pub data: &'a [u8],
}

fn kind_error(tag: u16, want: Kind, got: Kind) -> FormatError {
    FormatError::malformed(WHAT, format!("field {tag}: expected {want:?}, found {got:?}"))
}

impl<'a> Field<'a> {
    fn expect(&self, kind: Kind) -> Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(kind_error(self.tag, kind, self.kind))
        }
    }

    /// Check the data against the kind's own encoding rules.
    fn check(&self) -> Result<()> {
        if let Some(len) = self.kind.fixed_len() {
            if self.data.len() != len {
                return Err(FormatError::malformed(
                    WHAT,
                    format!("field {}: {:?} with length {}", self.tag, self.kind, self.data.len()),
                ));
            }
        }
        match self.kind {
            Kind::Bool if self.data[0] > 1 => Err(FormatError::malformed(
                WHAT,
                format!("field {}: boolean value {}", self.tag, self.data[0]),
            )),
            Kind::Str => self.as_str().map(|_| ()),
            Kind::U32List => self.as_u32_list().map(|_| ()),
            Kind::StrList => self.as_str_list().map(|_| ()),
            Kind::Record => self.as_record().map(|_| ()),
            Kind::RecordList => self.as_records().map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Read a `u8`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn as_u8(&self) -> Result<u8> {
        self.expect(Kind::U8)?;
        Ok(Cursor::new(self.data).take(1)?[0])
    }

    /// Read a `u16`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn as_u16(&self) -> Result<u16> {
        self.expect(Kind::U16)?;
        Cursor::new(self.data).u16()
    }

    /// Read a `u32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn as_u32(&self) -> Result<u32> {
        self.expect(Kind::U32)?;
        Cursor::new(self.data).u32()
    }

    /// Read a `u64`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn as_u64(&self) -> Result<u64> {
        self.expect(Kind::U64)?;
        Cursor::new(self.data).u64()
    }

    /// Read a boolean.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn as_bool(&self) -> Result<bool> {
        self.expect(Kind::Bool)?;
        Ok(Cursor::new(self.data).take(1)?[0] != 0)
    }

    /// Read a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind or is not UTF-8.
    pub fn as_str(&self) -> Result<&'a str> {
        self.expect(Kind::Str)?;
        std::str::from_utf8(self.data)
            .map_err(|e| FormatError::malformed(WHAT, format!("field {}: {e}", self.tag)))
    }

    /// Read opaque bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        self.expect(Kind::Bytes)?;
        Ok(self.data)
    }

    /// Read a list of `u32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind or a bad length.
    pub fn as_u32_list(&self) -> Result<Vec<u32>> {
        self.expect(Kind::U32List)?;
        let mut c = Cursor::new(self.data);
        let n = c.u32()? as usize;
        if c.remaining() != n * 4 {
            return Err(FormatError::malformed(
                WHAT,
                format!("field {}: {n} words in {} bytes", self.tag, c.remaining()),
            ));
        }
        (0..n).map(|_| c.u32()).collect()
    }

    /// Read a list of strings.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind or bad contents.
    pub fn as_str_list(&self) -> Result<Vec<&'a str>> {
        self.expect(Kind::StrList)?;
        let mut c = Cursor::new(self.data);
        let n = c.u32()?;
        let mut out = Vec::new();
        for _ in 0..n {
            let s = std::str::from_utf8(c.chunk()?)
                .map_err(|e| FormatError::malformed(WHAT, format!("field {}: {e}", self.tag)))?;
            out.push(s);
        }
        trailing(self.tag, &c)?;
        Ok(out)
    }

    /// Read a nested record.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind or bad contents.
    pub fn as_record(&self) -> Result<Record<'a>> {
        self.expect(Kind::Record)?;
        Record::parse(self.data)
    }

    /// Read a list of nested records.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind or bad contents.
    pub fn as_records(&self) -> Result<Vec<Record<'a>>> {
        self.expect(Kind::RecordList)?;
        let mut c = Cursor::new(self.data);
        let n = c.u32()?;
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(Record::parse(c.chunk()?)?);
        }
        trailing(self.tag, &c)?;
        Ok(out)
    }
}

fn trailing(tag: u16, c: &Cursor<'_>) -> Result<()> {
    if c.remaining() == 0 {
        Ok(())
    } else {
        Err(FormatError::malformed(
            WHAT,
            format!("field {tag}: {} trailing bytes", c.remaining()),
        ))
    }
}

/// A parsed record. Parsing verifies the whole tree structurally.
#[derive(Debug, Clone)]
pub struct Record<'a> {
    fields: Vec<Field<'a>>,
}

impl<'a> Record<'a> {
    /// Parse and verify a record that spans all of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Malformed`] if any field, at any depth, is
    /// truncated, has an unknown kind or breaks its kind's encoding.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let mut c = Cursor::new(buf);
        let count = c.u32()?;
        // A field needs at least a header, which bounds a hostile count.
        if count as usize > c.remaining() / FIELD_HEADER_SIZE {
            return Err(FormatError::malformed(
                WHAT,
                format!("{count} fields cannot fit in {} bytes", c.remaining()),
            ));
        }
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = c.u16()?;
            let kind_byte = c.take(1)?[0];
            let kind = Kind::from_u8(kind_byte).ok_or_else(|| {
                FormatError::malformed(WHAT, format!("field {tag}: unknown kind {kind_byte}"))
            })?;
            c.take(1)?;
            let data = c.chunk()?;
            let field = Field { tag, kind, data };
            field.check()?;
            fields.push(field);
        }
        if c.remaining() != 0 {
            return Err(FormatError::malformed(
                WHAT,
                format!("{} trailing bytes after {count} fields", c.remaining()),
            ));
        }
        Ok(Self { fields })
    }

    /// All fields in encoding order.
    #[must_use]
    pub fn fields(&self) -> &[Field<'a>] {
        &self.fields
    }

    /// First field with `tag`.
    #[must_use]
    pub fn get(&self, tag: u16) -> Option<&Field<'a>> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// `u8` field, 0 when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn u8(&self, tag: u16) -> Result<u8> {
        self.get(tag).map_or(Ok(0), Field::as_u8)
    }

    /// `u16` field, 0 when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn u16(&self, tag: u16) -> Result<u16> {
        self.get(tag).map_or(Ok(0), Field::as_u16)
    }

    /// `u32` field, 0 when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn u32(&self, tag: u16) -> Result<u32> {
        self.get(tag).map_or(Ok(0), Field::as_u32)
    }

    /// `u64` field, 0 when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn u64(&self, tag: u16) -> Result<u64> {
        self.get(tag).map_or(Ok(0), Field::as_u64)
    }

    /// Boolean field, false when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn bool(&self, tag: u16) -> Result<bool> {
        self.get(tag).map_or(Ok(false), Field::as_bool)
    }

    /// String field, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn str(&self, tag: u16) -> Result<&'a str> {
        self.get(tag).map_or(Ok(""), Field::as_str)
    }

    /// Byte field, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn bytes(&self, tag: u16) -> Result<&'a [u8]> {
        self.get(tag).map_or(Ok(&[][..]), Field::as_bytes)
    }

    /// `u32` list, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn u32_list(&self, tag: u16) -> Result<Vec<u32>> {
        self.get(tag).map_or(Ok(Vec::new()), Field::as_u32_list)
    }

    /// String list, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn str_list(&self, tag: u16) -> Result<Vec<&'a str>> {
        self.get(tag).map_or(Ok(Vec::new()), Field::as_str_list)
    }

    /// Nested record, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn record(&self, tag: u16) -> Result<Option<Record<'a>>> {
        self.get(tag).map(Field::as_record).transpose()
    }

    /// Record list, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the field has another kind.
    pub fn records(&self, tag: u16) -> Result<Vec<Record<'a>>> {
        self.get(tag).map_or(Ok(Vec::new()), Field::as_records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut inner = RecordWriter::new();
        inner.u32(1, 0xdead_beef).bool(2, true);
        let mut w = RecordWriter::new();
        w.u16(1, 7)
            .u64(2, u64::MAX)
            .str(3, "net")
            .u32_list(4, &[1, 2, 3])
            .str_list(5, &["a", "bc"])
            .record(6, inner.clone())
            .record_list(7, vec![inner.clone(), inner]);
        w.finish()
    }

    #[test]
    fn reads_back_fields() {
        let buf = sample();
        let r = Record::parse(&buf).unwrap();
        assert_eq!(r.fields().len(), 7);
        assert_eq!(r.u16(1).unwrap(), 7);
        assert_eq!(r.u64(2).unwrap(), u64::MAX);
        assert_eq!(r.str(3).unwrap(), "net");
        assert_eq!(r.u32_list(4).unwrap(), vec![1, 2, 3]);
        assert_eq!(r.str_list(5).unwrap(), vec!["a", "bc"]);
        let inner = r.record(6).unwrap().unwrap();
        assert_eq!(inner.u32(1).unwrap(), 0xdead_beef);
        assert!(inner.bool(2).unwrap());
        assert_eq!(r.records(7).unwrap().len(), 2);
    }

    #[test]
    fn absent_fields_default() {
        let buf = RecordWriter::new().finish();
        let r = Record::parse(&buf).unwrap();
        assert_eq!(r.u32(9).unwrap(), 0);
        assert_eq!(r.str(9).unwrap(), "");
        assert!(r.record(9).unwrap().is_none());
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let mut w = RecordWriter::new();
        w.u32(1, 5);
        let buf = w.finish();
        let r = Record::parse(&buf).unwrap();
        assert!(matches!(r.u64(1), Err(FormatError::Malformed { .. })));
    }

    #[test]
    fn truncation_is_rejected() {
        let buf = sample();
        for cut in [1, 5, buf.len() / 2, buf.len() - 1] {
            assert!(Record::parse(&buf[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn nested_corruption_is_rejected() {
        let mut inner = RecordWriter::new();
        inner.bool(1, true);
        let mut w = RecordWriter::new();
        w.record(1, inner);
        let mut buf = w.finish();
        // Last byte is the nested boolean.
        *buf.last_mut().unwrap() = 7;
        assert!(Record::parse(&buf).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut w = RecordWriter::new();
        w.u8(1, 0);
        let mut buf = w.finish();
        buf[6] = 99;
        assert!(Record::parse(&buf).is_err());
    }
}
