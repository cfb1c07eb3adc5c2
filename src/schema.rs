//! Field descriptor model.
//!
//! A schema is parsed once from a whitespace-delimited name list and a format
//! string of single-character type codes. Records are packed: each field
//! starts where the previous one ends, so the record size is the sum of the
//! field widths.

use std::collections::HashSet;

use crate::{Error, Result};

/// Closed set of primitive encodings a field may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl FieldType {
    pub const ALL: [FieldType; 10] = [
        FieldType::Int8,
        FieldType::UInt8,
        FieldType::Int16,
        FieldType::UInt16,
        FieldType::Int32,
        FieldType::UInt32,
        FieldType::Int64,
        FieldType::UInt64,
        FieldType::Float32,
        FieldType::Float64,
    ];

    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'b' => FieldType::Int8,
            'B' => FieldType::UInt8,
            'h' => FieldType::Int16,
            'H' => FieldType::UInt16,
            'i' => FieldType::Int32,
            'I' => FieldType::UInt32,
            'q' => FieldType::Int64,
            'Q' => FieldType::UInt64,
            'f' => FieldType::Float32,
            'd' => FieldType::Float64,
            _ => return None,
        })
    }

    pub fn code(self) -> char {
        match self {
            FieldType::Int8 => 'b',
            FieldType::UInt8 => 'B',
            FieldType::Int16 => 'h',
            FieldType::UInt16 => 'H',
            FieldType::Int32 => 'i',
            FieldType::UInt32 => 'I',
            FieldType::Int64 => 'q',
            FieldType::UInt64 => 'Q',
            FieldType::Float32 => 'f',
            FieldType::Float64 => 'd',
        }
    }

    /// Width in bytes.
    pub fn size(self) -> usize {
        match self {
            FieldType::Int8 | FieldType::UInt8 => 1,
            FieldType::Int16 | FieldType::UInt16 => 2,
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float32 => 4,
            FieldType::Int64 | FieldType::UInt64 | FieldType::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, FieldType::Float32 | FieldType::Float64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub offset: usize,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    record_size: usize,
}

impl Schema {
    /// Parses a name list such as `"Time Open High Low Close"` against a
    /// format string such as `"qdddd"`.
    pub fn parse(names: &str, format: &str) -> Result<Self> {
        let names: Vec<&str> = names.split_whitespace().collect();
        let codes: Vec<char> = format.chars().filter(|c| !c.is_whitespace()).collect();
        if names.len() != codes.len() {
            return Err(Error::Format(format!(
                "{} field names but {} type codes",
                names.len(),
                codes.len()
            )));
        }
        let mut columns = Vec::with_capacity(names.len());
        for (name, code) in names.into_iter().zip(codes) {
            let field_type = FieldType::from_code(code)
                .ok_or_else(|| Error::Format(format!("unknown type code '{code}'")))?;
            columns.push((name.to_string(), field_type));
        }
        Self::from_columns(columns)
    }

    /// Lays out columns back to back in declaration order.
    pub fn from_columns<I>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, FieldType)>,
    {
        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        let mut offset = 0usize;
        for (name, field_type) in columns {
            if name.is_empty() {
                return Err(Error::Format("empty field name".to_string()));
            }
            if !seen.insert(name.clone()) {
                return Err(Error::Format(format!("duplicate field name '{name}'")));
            }
            let size = field_type.size();
            fields.push(FieldDescriptor {
                name,
                field_type,
                offset,
                size,
            });
            offset += size;
        }
        if fields.is_empty() {
            return Err(Error::Format("schema has no fields".to_string()));
        }
        Ok(Self {
            fields,
            record_size: offset,
        })
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Format string reconstructed from the field types.
    pub fn format_string(&self) -> String {
        self.fields.iter().map(|f| f.field_type.code()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Index of the time column: the first field named `time` (any case),
    /// otherwise the first field. The column must be `Int64`.
    pub fn time_field(&self) -> Result<usize> {
        let index = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case("time"))
            .unwrap_or(0);
        let field = &self.fields[index];
        if field.field_type != FieldType::Int64 {
            return Err(Error::Format(format!(
                "time field '{}' must be 'q', got '{}'",
                field.name,
                field.field_type.code()
            )));
        }
        Ok(index)
    }
}
