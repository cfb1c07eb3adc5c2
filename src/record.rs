//! Packed little-endian record encoding.

use std::fmt;

use crate::schema::{FieldDescriptor, FieldType, Schema};
use crate::{Error, Result};

/// One field value as submitted by a caller or decoded from a record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            Value::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "signed integer",
            Value::UInt(_) => "unsigned integer",
            Value::Float(_) => "float",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value as f64)
    }
}

/// Encodes `values` into `buf`, which must be exactly one record long.
///
/// Validation happens field by field before anything is returned, so a
/// mismatch never leaves the caller with a half-valid record.
pub fn encode_into(schema: &Schema, values: &[Value], buf: &mut [u8]) -> Result<()> {
    if values.len() != schema.len() {
        return Err(Error::FieldTypeMismatch(format!(
            "expected {} values, got {}",
            schema.len(),
            values.len()
        )));
    }
    if buf.len() != schema.record_size() {
        return Err(Error::FieldTypeMismatch(format!(
            "record buffer is {} bytes, schema needs {}",
            buf.len(),
            schema.record_size()
        )));
    }
    for (field, value) in schema.fields().iter().zip(values) {
        let dst = &mut buf[field.offset..field.offset + field.size];
        encode_field(field, value, dst)?;
    }
    Ok(())
}

pub fn encode(schema: &Schema, values: &[Value]) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; schema.record_size()];
    encode_into(schema, values, &mut buf)?;
    Ok(buf)
}

fn encode_field(field: &FieldDescriptor, value: &Value, dst: &mut [u8]) -> Result<()> {
    let mismatch = || {
        Error::FieldTypeMismatch(format!(
            "field '{}' ('{}') cannot hold {} {}",
            field.name,
            field.field_type.code(),
            value.kind(),
            value
        ))
    };
    match (field.field_type, *value) {
        (FieldType::Float64, Value::Float(v)) => dst.copy_from_slice(&v.to_le_bytes()),
        (FieldType::Float32, Value::Float(v)) => {
            let narrowed = v as f32;
            if v.is_finite() && narrowed.is_infinite() {
                return Err(mismatch());
            }
            dst.copy_from_slice(&narrowed.to_le_bytes())
        }
        (_, Value::Float(_)) => return Err(mismatch()),
        (ty, _) if ty.is_float() => return Err(mismatch()),
        (ty, Value::Int(v)) => encode_int(ty, v as i128, dst).ok_or_else(mismatch)?,
        (ty, Value::UInt(v)) => encode_int(ty, v as i128, dst).ok_or_else(mismatch)?,
    }
    Ok(())
}

fn encode_int(ty: FieldType, v: i128, dst: &mut [u8]) -> Option<()> {
    match ty {
        FieldType::Int8 => dst.copy_from_slice(&i8::try_from(v).ok()?.to_le_bytes()),
        FieldType::UInt8 => dst.copy_from_slice(&u8::try_from(v).ok()?.to_le_bytes()),
        FieldType::Int16 => dst.copy_from_slice(&i16::try_from(v).ok()?.to_le_bytes()),
        FieldType::UInt16 => dst.copy_from_slice(&u16::try_from(v).ok()?.to_le_bytes()),
        FieldType::Int32 => dst.copy_from_slice(&i32::try_from(v).ok()?.to_le_bytes()),
        FieldType::UInt32 => dst.copy_from_slice(&u32::try_from(v).ok()?.to_le_bytes()),
        FieldType::Int64 => dst.copy_from_slice(&i64::try_from(v).ok()?.to_le_bytes()),
        FieldType::UInt64 => dst.copy_from_slice(&u64::try_from(v).ok()?.to_le_bytes()),
        FieldType::Float32 | FieldType::Float64 => return None,
    }
    Some(())
}

/// Decodes one record. `bytes` must be exactly `schema.record_size()` long.
pub fn decode(schema: &Schema, bytes: &[u8]) -> Result<Vec<Value>> {
    if bytes.len() != schema.record_size() {
        return Err(Error::Corrupt("record length does not match schema"));
    }
    Ok(schema
        .fields()
        .iter()
        .map(|field| decode_field(field.field_type, &bytes[field.offset..field.offset + field.size]))
        .collect())
}

/// Reads a single field out of a record.
pub fn decode_field(ty: FieldType, src: &[u8]) -> Value {
    match ty {
        FieldType::Int8 => Value::Int(src[0] as i8 as i64),
        FieldType::UInt8 => Value::UInt(src[0] as u64),
        FieldType::Int16 => Value::Int(i16::from_le_bytes([src[0], src[1]]) as i64),
        FieldType::UInt16 => Value::UInt(u16::from_le_bytes([src[0], src[1]]) as u64),
        FieldType::Int32 => Value::Int(i32::from_le_bytes(array4(src)) as i64),
        FieldType::UInt32 => Value::UInt(u32::from_le_bytes(array4(src)) as u64),
        FieldType::Float32 => Value::Float(f32::from_le_bytes(array4(src)) as f64),
        FieldType::Int64 => Value::Int(i64::from_le_bytes(array8(src))),
        FieldType::UInt64 => Value::UInt(u64::from_le_bytes(array8(src))),
        FieldType::Float64 => Value::Float(f64::from_le_bytes(array8(src))),
    }
}

fn array4(src: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&src[..4]);
    out
}

fn array8(src: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&src[..8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_schema() -> Schema {
        Schema::parse("Time Open High Low Close Volume OpenInt", "qddddqq").expect("schema")
    }

    #[test]
    fn encodes_fields_at_declared_offsets() {
        let schema = bar_schema();
        let values = [
            Value::Int(24_293_370),
            Value::Float(10.1),
            Value::Float(10.3),
            Value::Float(10.0),
            Value::Float(10.2),
            Value::Int(12_000),
            Value::Int(500),
        ];
        let bytes = encode(&schema, &values).expect("encode");
        assert_eq!(bytes.len(), 56);
        assert_eq!(&bytes[0..8], &24_293_370i64.to_le_bytes());
        assert_eq!(&bytes[8..16], &10.1f64.to_le_bytes());
        assert_eq!(&bytes[48..56], &500i64.to_le_bytes());
        assert_eq!(decode(&schema, &bytes).expect("decode"), values.to_vec());
    }

    #[test]
    fn narrow_fields_keep_their_width() {
        let schema = Schema::parse("time a b c", "qhBf").expect("schema");
        let values = [Value::Int(1), Value::Int(-2), Value::UInt(255), Value::Float(1.5)];
        let bytes = encode(&schema, &values).expect("encode");
        assert_eq!(bytes.len(), 15);
        let decoded = decode(&schema, &bytes).expect("decode");
        assert_eq!(decoded[1], Value::Int(-2));
        assert_eq!(decoded[2], Value::UInt(255));
        assert_eq!(decoded[3], Value::Float(1.5));
    }

    #[test]
    fn rejects_wrong_arity() {
        let schema = bar_schema();
        let err = encode(&schema, &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, Error::FieldTypeMismatch(_)));
    }

    #[test]
    fn rejects_float_in_integer_field() {
        let schema = bar_schema();
        let mut values = vec![Value::Int(0); 1];
        values.extend([Value::Float(1.0); 4]);
        values.push(Value::Float(12_000.0));
        values.push(Value::Int(1));
        let err = encode(&schema, &values).unwrap_err();
        assert!(matches!(err, Error::FieldTypeMismatch(msg) if msg.contains("Volume")));
    }

    #[test]
    fn rejects_integer_in_float_field() {
        let schema = Schema::parse("time px", "qd").expect("schema");
        let err = encode(&schema, &[Value::Int(0), Value::Int(3)]).unwrap_err();
        assert!(matches!(err, Error::FieldTypeMismatch(_)));
    }

    #[test]
    fn rejects_out_of_range_integers() {
        let schema = Schema::parse("time small unsigned", "qbQ").expect("schema");
        let too_big = encode(&schema, &[Value::Int(0), Value::Int(128), Value::UInt(0)]);
        assert!(matches!(too_big, Err(Error::FieldTypeMismatch(_))));
        let negative = encode(&schema, &[Value::Int(0), Value::Int(0), Value::Int(-1)]);
        assert!(matches!(negative, Err(Error::FieldTypeMismatch(_))));
        let ok = encode(&schema, &[Value::Int(0), Value::Int(-128), Value::Int(7)]);
        assert!(ok.is_ok());
    }

    #[test]
    fn rejects_floats_beyond_single_precision() {
        let schema = Schema::parse("time px", "qf").expect("schema");
        let huge = encode(&schema, &[Value::Int(0), Value::Float(1e39)]);
        assert!(matches!(huge, Err(Error::FieldTypeMismatch(_))));
        let negative = encode(&schema, &[Value::Int(0), Value::Float(-1e39)]);
        assert!(matches!(negative, Err(Error::FieldTypeMismatch(_))));

        let bytes = encode(&schema, &[Value::Int(0), Value::Float(f64::INFINITY)]).expect("inf");
        assert_eq!(&bytes[8..12], &f32::INFINITY.to_le_bytes());
        assert!(encode(&schema, &[Value::Int(0), Value::Float(f64::NAN)]).is_ok());
        assert!(encode(&schema, &[Value::Int(0), Value::Float(3.0e38)]).is_ok());
    }
}
