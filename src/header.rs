//! Container header codec.
//!
//! All integers are little-endian. The header starts with a fixed 64-byte
//! preamble followed by variable-length sections:
//!
//! ```text
//! 0   magic               [u8; 8]
//! 8   format version      u16
//! 10  flags               u16 (reserved, zero)
//! 12  crc32               u32 over [0, header_len) with this field zeroed
//! 16  header_len          u64
//! 24  record_size         u64
//! 32  record_area_offset  u64 = align_up(header_len, 64)
//! 40  epoch               i64 days since 1970-01-01
//! 48  ticks_per_day       i64
//! 56  field_count         u32
//! 60  time_field          u32 index into the field table
//! 64  field table         per field: u8 code, [0; 3], u32 offset, u32 size,
//!                         u32 name_len, name
//! ..  content             u32 len, UTF-8 bytes
//! ..  name values         u32 count, per entry: u32 name_len, name, u8 kind,
//!                         i64 | f64 | (u32 len, UTF-8 bytes)
//! ```
//!
//! Bytes between `header_len` and `record_area_offset` are zero.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::schema::{FieldType, Schema};
use crate::timescale::TimeScale;
use crate::{Error, Result};

pub const MAGIC: [u8; 8] = *b"\x89TSF\r\n\x1a\n";
pub const FORMAT_VERSION: u16 = 1;
pub const FIXED_HEADER_SIZE: usize = 64;
pub const RECORD_AREA_ALIGN: usize = 64;

pub const VERSION_OFFSET: usize = 8;
pub const FLAGS_OFFSET: usize = 10;
pub const CRC_OFFSET: usize = 12;
pub const HEADER_LEN_OFFSET: usize = 16;
pub const RECORD_SIZE_OFFSET: usize = 24;
pub const RECORD_AREA_OFFSET_OFFSET: usize = 32;
pub const EPOCH_DAYS_OFFSET: usize = 40;
pub const TICKS_PER_DAY_OFFSET: usize = 48;
pub const FIELD_COUNT_OFFSET: usize = 56;
pub const TIME_FIELD_OFFSET: usize = 60;

const FIELD_ENTRY_FIXED: usize = 16;

const KIND_INT64: u8 = 1;
const KIND_FLOAT64: u8 = 2;
const KIND_TEXT: u8 = 3;

/// Aligns a value up to the nearest multiple of `align`.
#[inline]
pub fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetaValue {
    Int64(i64),
    Float64(f64),
    Text(String),
}

/// Free-form metadata entry stored after the content description.
#[derive(Clone, Debug, PartialEq)]
pub struct NameValue {
    pub name: String,
    pub value: MetaValue,
}

impl NameValue {
    pub fn new(name: impl Into<String>, value: MetaValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    fn encoded_len(&self) -> usize {
        let value_len = match &self.value {
            MetaValue::Int64(_) | MetaValue::Float64(_) => 8,
            MetaValue::Text(text) => 4 + text.len(),
        };
        4 + self.name.len() + 1 + value_len
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContainerHeader {
    content_description: String,
    schema: Schema,
    time_scale: TimeScale,
    time_field: usize,
    name_values: Vec<NameValue>,
    header_len: usize,
    record_area_offset: usize,
}

impl ContainerHeader {
    pub fn new(content_description: impl Into<String>, schema: Schema, time_scale: TimeScale) -> Result<Self> {
        Self::with_name_values(content_description, schema, time_scale, Vec::new())
    }

    pub fn with_name_values(
        content_description: impl Into<String>,
        schema: Schema,
        time_scale: TimeScale,
        name_values: Vec<NameValue>,
    ) -> Result<Self> {
        let content_description = content_description.into();
        let time_field = schema.time_field()?;
        check_len("content description", content_description.len())?;
        let mut seen = HashSet::new();
        for entry in &name_values {
            check_len("name", entry.name.len())?;
            if let MetaValue::Text(text) = &entry.value {
                check_len("text value", text.len())?;
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(Error::Format(format!("duplicate name value '{}'", entry.name)));
            }
        }
        for field in schema.fields() {
            check_len("field name", field.name.len())?;
        }

        let header_len = FIXED_HEADER_SIZE
            + schema
                .fields()
                .iter()
                .map(|f| FIELD_ENTRY_FIXED + f.name.len())
                .sum::<usize>()
            + 4
            + content_description.len()
            + 4
            + name_values.iter().map(NameValue::encoded_len).sum::<usize>();

        Ok(Self {
            content_description,
            schema,
            time_scale,
            time_field,
            name_values,
            header_len,
            record_area_offset: align_up(header_len, RECORD_AREA_ALIGN),
        })
    }

    pub fn content_description(&self) -> &str {
        &self.content_description
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn time_scale(&self) -> TimeScale {
        self.time_scale
    }

    pub fn time_field(&self) -> usize {
        self.time_field
    }

    pub fn name_values(&self) -> &[NameValue] {
        &self.name_values
    }

    pub fn name_value(&self, name: &str) -> Option<&MetaValue> {
        self.name_values
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.value)
    }

    pub fn record_size(&self) -> usize {
        self.schema.record_size()
    }

    /// Length of the encoded header, excluding alignment padding.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn record_area_offset(&self) -> usize {
        self.record_area_offset
    }

    pub fn padding_len(&self) -> usize {
        self.record_area_offset - self.header_len
    }

    /// Serializes the header including the zero padding up to the record area.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.record_area_offset);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(self.header_len as u64).to_le_bytes());
        buf.extend_from_slice(&(self.record_size() as u64).to_le_bytes());
        buf.extend_from_slice(&(self.record_area_offset as u64).to_le_bytes());
        buf.extend_from_slice(&self.time_scale.epoch_days().to_le_bytes());
        buf.extend_from_slice(&self.time_scale.ticks_per_day().to_le_bytes());
        buf.extend_from_slice(&(self.schema.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.time_field as u32).to_le_bytes());
        debug_assert_eq!(buf.len(), FIXED_HEADER_SIZE);

        for field in self.schema.fields() {
            buf.push(field.field_type.code() as u8);
            buf.extend_from_slice(&[0u8; 3]);
            buf.extend_from_slice(&(field.offset as u32).to_le_bytes());
            buf.extend_from_slice(&(field.size as u32).to_le_bytes());
            put_str(&mut buf, &field.name);
        }
        put_str(&mut buf, &self.content_description);
        buf.extend_from_slice(&(self.name_values.len() as u32).to_le_bytes());
        for entry in &self.name_values {
            put_str(&mut buf, &entry.name);
            match &entry.value {
                MetaValue::Int64(v) => {
                    buf.push(KIND_INT64);
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                MetaValue::Float64(v) => {
                    buf.push(KIND_FLOAT64);
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                MetaValue::Text(text) => {
                    buf.push(KIND_TEXT);
                    put_str(&mut buf, text);
                }
            }
        }
        debug_assert_eq!(buf.len(), self.header_len);

        let crc = header_crc(&buf);
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        buf.resize(self.record_area_offset, 0);
        buf
    }

    /// Parses and validates a header. `bytes` may extend past the header; any
    /// padding it covers must be zero.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_HEADER_SIZE {
            return Err(Error::CorruptHeader("input shorter than fixed header"));
        }
        if bytes[0..8] != MAGIC {
            return Err(Error::CorruptHeader("bad magic"));
        }
        let version = u16::from_le_bytes(
            bytes[VERSION_OFFSET..VERSION_OFFSET + 2]
                .try_into()
                .expect("slice length"),
        );
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let header_len = to_usize(read_u64(bytes, HEADER_LEN_OFFSET))?;
        if header_len < FIXED_HEADER_SIZE {
            return Err(Error::CorruptHeader("declared header length too small"));
        }
        if bytes.len() < header_len {
            return Err(Error::CorruptHeader("input shorter than declared header length"));
        }
        let stored_crc = u32::from_le_bytes(
            bytes[CRC_OFFSET..CRC_OFFSET + 4]
                .try_into()
                .expect("slice length"),
        );
        if header_crc(&bytes[..header_len]) != stored_crc {
            return Err(Error::CorruptHeader("header checksum mismatch"));
        }

        let record_size = to_usize(read_u64(bytes, RECORD_SIZE_OFFSET))?;
        let record_area_offset = to_usize(read_u64(bytes, RECORD_AREA_OFFSET_OFFSET))?;
        if record_area_offset != align_up(header_len, RECORD_AREA_ALIGN) {
            return Err(Error::CorruptHeader("record area offset is not the aligned header end"));
        }
        let padding_end = bytes.len().min(record_area_offset);
        if bytes[header_len..padding_end].iter().any(|b| *b != 0) {
            return Err(Error::CorruptHeader("non-zero header padding"));
        }

        let epoch_days = read_u64(bytes, EPOCH_DAYS_OFFSET) as i64;
        let ticks_per_day = read_u64(bytes, TICKS_PER_DAY_OFFSET) as i64;
        let time_scale = TimeScale::from_epoch_days(epoch_days, ticks_per_day)
            .map_err(|_| Error::CorruptHeader("invalid time scale"))?;
        let field_count = read_u32(bytes, FIELD_COUNT_OFFSET) as usize;
        let time_field = read_u32(bytes, TIME_FIELD_OFFSET) as usize;

        let mut cursor = Cursor::new(&bytes[..header_len], FIXED_HEADER_SIZE);
        let mut columns = Vec::new();
        let mut expected_offset = 0usize;
        for _ in 0..field_count {
            let code = cursor.u8()?;
            let field_type = FieldType::from_code(code as char)
                .ok_or(Error::CorruptHeader("unknown field type code"))?;
            if cursor.take(3)? != [0u8; 3] {
                return Err(Error::CorruptHeader("non-zero field reserved bytes"));
            }
            let offset = cursor.u32()? as usize;
            let size = cursor.u32()? as usize;
            if size != field_type.size() {
                return Err(Error::CorruptHeader("field size does not match its type"));
            }
            if offset != expected_offset {
                return Err(Error::CorruptHeader("field offsets are not contiguous"));
            }
            expected_offset += size;
            columns.push((cursor.string()?, field_type));
        }
        if expected_offset != record_size {
            return Err(Error::CorruptHeader("field sizes do not sum to record size"));
        }
        let schema =
            Schema::from_columns(columns).map_err(|_| Error::CorruptHeader("invalid field table"))?;
        if schema.time_field().ok() != Some(time_field) {
            return Err(Error::CorruptHeader("invalid time field"));
        }

        let content_description = cursor.string()?;
        let entry_count = cursor.u32()? as usize;
        let mut name_values = Vec::new();
        for _ in 0..entry_count {
            let name = cursor.string()?;
            let value = match cursor.u8()? {
                KIND_INT64 => MetaValue::Int64(cursor.u64()? as i64),
                KIND_FLOAT64 => MetaValue::Float64(f64::from_bits(cursor.u64()?)),
                KIND_TEXT => MetaValue::Text(cursor.string()?),
                _ => return Err(Error::CorruptHeader("unknown name value kind")),
            };
            name_values.push(NameValue { name, value });
        }
        if cursor.pos != header_len {
            return Err(Error::CorruptHeader("header length does not match contents"));
        }

        let header =
            Self::with_name_values(content_description, schema, time_scale, name_values)
                .map_err(|_| Error::CorruptHeader("inconsistent header fields"))?;
        debug_assert_eq!(header.header_len, header_len);
        Ok(header)
    }
}

/// Reads and validates the header of the container at `path`.
pub fn read_header(path: &Path) -> Result<ContainerHeader> {
    let mut file = File::open(path)?;
    let mut fixed = [0u8; FIXED_HEADER_SIZE];
    file.read_exact(&mut fixed).map_err(|err| match err.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::CorruptHeader("file shorter than fixed header"),
        _ => Error::Io(err),
    })?;
    if fixed[0..8] != MAGIC {
        return Err(Error::CorruptHeader("bad magic"));
    }
    let header_len = to_usize(read_u64(&fixed, HEADER_LEN_OFFSET))?;
    let file_len = file.metadata()?.len();
    if (header_len as u64) > file_len {
        return Err(Error::CorruptHeader("file shorter than declared header length"));
    }
    let mut buf = fixed.to_vec();
    if header_len > FIXED_HEADER_SIZE {
        buf.resize(header_len, 0);
        file.read_exact(&mut buf[FIXED_HEADER_SIZE..])?;
    }
    ContainerHeader::decode(&buf)
}

fn header_crc(header: &[u8]) -> u32 {
    use crc32fast::Hasher;
    let mut hasher = Hasher::new();
    hasher.update(&header[..CRC_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&header[CRC_OFFSET + 4..]);
    hasher.finalize()
}

fn check_len(what: &str, len: usize) -> Result<()> {
    if len > u32::MAX as usize {
        return Err(Error::Format(format!("{what} longer than {} bytes", u32::MAX)));
    }
    Ok(())
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().expect("slice length"))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("slice length"))
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::CorruptHeader("length exceeds address space"))
}

/// Bounds-checked reader over the variable part of a header.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(Error::CorruptHeader("header section overruns header length"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(read_u32(self.take(4)?, 0))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(read_u64(self.take(8)?, 0))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::CorruptHeader("string is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timescale::TimeScaleTable;

    fn sample_header() -> ContainerHeader {
        let schema =
            Schema::parse("Time Open High Low Close Volume OpenInt", "qddddqq").expect("schema");
        let scale = TimeScaleTable::standard().lookup("unix-min").expect("scale");
        ContainerHeader::with_name_values(
            "rb1505",
            schema,
            scale,
            vec![
                NameValue::new("decimals", MetaValue::Int64(2)),
                NameValue::new("tick size", MetaValue::Float64(0.5)),
                NameValue::new("exchange", MetaValue::Text("SHFE".to_string())),
            ],
        )
        .expect("header")
    }

    #[test]
    fn encode_decode_round_trip() {
        let header = sample_header();
        let bytes = header.encode();
        assert_eq!(bytes.len(), header.record_area_offset());
        assert_eq!(bytes.len() % RECORD_AREA_ALIGN, 0);
        assert!(bytes[header.header_len()..].iter().all(|b| *b == 0));

        let decoded = ContainerHeader::decode(&bytes).expect("decode");
        assert_eq!(decoded, header);
        assert_eq!(decoded.record_size(), 56);
        assert_eq!(decoded.name_value("exchange"), Some(&MetaValue::Text("SHFE".to_string())));
    }

    #[test]
    fn fixed_fields_sit_at_documented_offsets() {
        let header = sample_header();
        let bytes = header.encode();
        assert_eq!(&bytes[0..8], &MAGIC);
        assert_eq!(read_u64(&bytes, HEADER_LEN_OFFSET), header.header_len() as u64);
        assert_eq!(read_u64(&bytes, RECORD_SIZE_OFFSET), 56);
        assert_eq!(
            read_u64(&bytes, RECORD_AREA_OFFSET_OFFSET),
            header.record_area_offset() as u64
        );
        assert_eq!(read_u64(&bytes, EPOCH_DAYS_OFFSET), 0);
        assert_eq!(read_u64(&bytes, TICKS_PER_DAY_OFFSET), 1_440);
        assert_eq!(read_u32(&bytes, FIELD_COUNT_OFFSET), 7);
        assert_eq!(read_u32(&bytes, TIME_FIELD_OFFSET), 0);
        assert_eq!(bytes[FIXED_HEADER_SIZE], b'q');
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(sample_header().encode(), sample_header().encode());
    }

    #[test]
    fn decode_accepts_header_without_padding() {
        let header = sample_header();
        let bytes = header.encode();
        let decoded = ContainerHeader::decode(&bytes[..header.header_len()]).expect("decode");
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_header().encode();
        bytes[0] = b'X';
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(Error::CorruptHeader("bad magic"))
        ));
    }

    #[test]
    fn rejects_truncated_input() {
        let header = sample_header();
        let bytes = header.encode();
        assert!(matches!(
            ContainerHeader::decode(&bytes[..header.header_len() - 1]),
            Err(Error::CorruptHeader(_))
        ));
        assert!(matches!(
            ContainerHeader::decode(&bytes[..10]),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = sample_header().encode();
        bytes[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&9u16.to_le_bytes());
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(Error::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn rejects_flipped_byte() {
        let header = sample_header();
        let mut bytes = header.encode();
        let last = header.header_len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(Error::CorruptHeader("header checksum mismatch"))
        ));
    }

    fn with_crc(mut bytes: Vec<u8>, header_len: usize) -> Vec<u8> {
        let crc = header_crc(&bytes[..header_len]);
        bytes[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn rejects_record_size_inconsistent_with_fields() {
        let header = sample_header();
        let mut bytes = header.encode();
        bytes[RECORD_SIZE_OFFSET..RECORD_SIZE_OFFSET + 8].copy_from_slice(&64u64.to_le_bytes());
        let bytes = with_crc(bytes, header.header_len());
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(Error::CorruptHeader("field sizes do not sum to record size"))
        ));
    }

    #[test]
    fn rejects_misaligned_record_area() {
        let header = sample_header();
        let mut bytes = header.encode();
        let offset = header.header_len() as u64;
        bytes[RECORD_AREA_OFFSET_OFFSET..RECORD_AREA_OFFSET_OFFSET + 8]
            .copy_from_slice(&offset.to_le_bytes());
        let bytes = with_crc(bytes, header.header_len());
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(Error::CorruptHeader(_))
        ));
    }

    #[test]
    fn rejects_dirty_padding() {
        let header = sample_header();
        assert!(header.padding_len() > 0);
        let mut bytes = header.encode();
        let last = bytes.len() - 1;
        bytes[last] = 1;
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(Error::CorruptHeader("non-zero header padding"))
        ));
    }

    #[test]
    fn rejects_duplicate_name_values() {
        let schema = Schema::parse("time v", "qd").expect("schema");
        let scale = TimeScaleTable::standard().lookup("unix-s").expect("scale");
        let err = ContainerHeader::with_name_values(
            "",
            schema,
            scale,
            vec![
                NameValue::new("a", MetaValue::Int64(1)),
                NameValue::new("a", MetaValue::Int64(2)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
