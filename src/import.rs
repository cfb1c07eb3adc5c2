//! Delimited-text import.
//!
//! Each input row becomes one record. The input is a single file or a
//! directory of files imported in name order into one container. The timestamp is assembled from one or
//! more columns joined with a space (e.g. a `Date` and a `Time` column) and
//! parsed with a `time` format description; every other field is read from
//! its own column.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use time::format_description::{self, BorrowedFormatItem};
use time::{Date, PrimitiveDateTime};

use crate::header::{MetaValue, NameValue};
use crate::record::Value;
use crate::schema::{FieldDescriptor, FieldType, Schema};
use crate::timescale::TimeScaleSpec;
use crate::writer::{ContainerWriter, WriterConfig};

pub const DEFAULT_NAMES: &str = "Time Open High Low Close Volume OpenInt";
pub const DEFAULT_FORMAT: &str = "qddddqq";
pub const DEFAULT_TIME_SCALE: &str = "unix-ms";
pub const DEFAULT_DATETIME_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Whitespace-separated field names.
    pub names: String,
    /// One type code per field.
    pub format: String,
    /// Content description stored in the header.
    pub content: String,
    /// Preset id or `YYYY-MM-DD:TICKS_PER_DAY`.
    pub time_scale: String,
    pub datetime_format: String,
    /// Columns joined with a space to form the timestamp text.
    pub time_columns: Vec<String>,
    /// Columns for the non-time fields, in field order. Defaults to the field
    /// names themselves.
    pub field_columns: Option<Vec<String>>,
    pub delimiter: char,
    pub has_headers: bool,
    pub overwrite: bool,
    /// Stored as text name values in the header.
    pub name_values: BTreeMap<String, String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            names: DEFAULT_NAMES.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            content: String::new(),
            time_scale: DEFAULT_TIME_SCALE.to_string(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            time_columns: vec!["Date".to_string(), "Time".to_string()],
            field_columns: None,
            delimiter: ',',
            has_headers: true,
            overwrite: false,
            name_values: BTreeMap::new(),
        }
    }
}

impl ImportOptions {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parse config {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct ImportStats {
    pub output: PathBuf,
    pub rows: u64,
    pub bytes: u64,
    pub first: Option<PrimitiveDateTime>,
    pub last: Option<PrimitiveDateTime>,
    /// Rows whose timestamp is earlier than the previous row's.
    pub out_of_order: u64,
    /// Rows taken from each input file, in import order.
    pub files: Vec<FileStats>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub path: PathBuf,
    pub rows: u64,
}

/// A column given by header name (case-insensitive) or zero-based index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl ColumnRef {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<usize>() {
            Ok(index) => ColumnRef::Index(index),
            Err(_) => ColumnRef::Name(value.to_string()),
        }
    }

    fn resolve(&self, headers: Option<&StringRecord>) -> Result<usize> {
        match self {
            ColumnRef::Index(index) => Ok(*index),
            ColumnRef::Name(name) => {
                let headers =
                    headers.ok_or_else(|| anyhow!("column '{name}' needs a header row"))?;
                headers
                    .iter()
                    .position(|h| h.eq_ignore_ascii_case(name))
                    .ok_or_else(|| anyhow!("missing csv column: {name}"))
            }
        }
    }
}

/// Imports `input` into a new container at `output`.
///
/// `input` is a single CSV (or CSV.GZ) file, or a directory whose regular
/// files are imported in file-name order into the one container. Every file
/// must carry the columns the options refer to. On any error the output is
/// removed.
pub fn import_csv(input: &Path, output: &Path, options: &ImportOptions) -> Result<ImportStats> {
    let time_scale: TimeScaleSpec = options.time_scale.parse()?;
    let datetime_format = format_description::parse(&options.datetime_format)
        .map_err(|err| anyhow!("invalid datetime format '{}': {err}", options.datetime_format))?;
    let delimiter = u8::try_from(options.delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| anyhow!("delimiter must be a single ASCII character"))?;

    let schema = Schema::parse(&options.names, &options.format)?;
    let time_field = schema.time_field()?;
    let value_fields: Vec<FieldDescriptor> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != time_field)
        .map(|(_, field)| field.clone())
        .collect();

    let time_columns: Vec<ColumnRef> = options
        .time_columns
        .iter()
        .map(|col| ColumnRef::parse(col))
        .collect();
    if time_columns.is_empty() {
        bail!("at least one time column is required");
    }
    let field_columns: Vec<ColumnRef> = match &options.field_columns {
        Some(columns) => columns.iter().map(|col| ColumnRef::parse(col)).collect(),
        None => value_fields
            .iter()
            .map(|field| ColumnRef::Name(field.name.clone()))
            .collect(),
    };
    if field_columns.len() != value_fields.len() {
        bail!(
            "{} field columns given for {} non-time fields",
            field_columns.len(),
            value_fields.len()
        );
    }
    let plan = RowPlan {
        time_columns,
        field_columns,
        value_fields,
        datetime_format,
        delimiter,
        has_headers: options.has_headers,
    };

    let inputs = input_files(input)?;
    // Every input is checked against the options before the output exists.
    for path in &inputs {
        plan.open(path)?;
    }

    let config = WriterConfig {
        overwrite: options.overwrite,
        name_values: options
            .name_values
            .iter()
            .map(|(name, value)| NameValue::new(name.clone(), MetaValue::Text(value.clone())))
            .collect(),
        ..WriterConfig::default()
    };
    let mut writer = ContainerWriter::create_with_config(
        output,
        &options.content,
        &options.names,
        &options.format,
        time_scale,
        config,
    )
    .with_context(|| format!("create container {}", output.display()))?;

    let mut stats = ImportStats {
        output: output.to_path_buf(),
        rows: 0,
        bytes: writer.len(),
        first: None,
        last: None,
        out_of_order: 0,
        files: Vec::with_capacity(inputs.len()),
    };
    for path in &inputs {
        let result = plan.open(path).and_then(|(mut csv, columns)| {
            write_rows(&mut csv, &plan, &columns, &mut writer, &mut stats)
                .with_context(|| format!("import {}", path.display()))
        });
        match result {
            Ok(rows) => {
                log::debug!("imported {rows} rows from {}", path.display());
                stats.files.push(FileStats {
                    path: path.clone(),
                    rows,
                });
            }
            Err(err) => {
                // A failed import leaves no container behind.
                drop(writer);
                if let Err(cleanup) = std::fs::remove_file(output) {
                    log::warn!("failed to remove {}: {cleanup}", output.display());
                }
                return Err(err);
            }
        }
    }

    let closed = writer.close()?;
    stats.bytes = closed.len;
    if stats.out_of_order > 0 {
        log::warn!(
            "{} rows in {} are out of time order",
            stats.out_of_order,
            input.display()
        );
    }
    log::info!(
        "imported {} rows from {} file(s) in {} into {}",
        stats.rows,
        stats.files.len(),
        input.display(),
        output.display()
    );
    Ok(stats)
}

struct RowPlan<'a> {
    time_columns: Vec<ColumnRef>,
    field_columns: Vec<ColumnRef>,
    value_fields: Vec<FieldDescriptor>,
    datetime_format: Vec<BorrowedFormatItem<'a>>,
    delimiter: u8,
    has_headers: bool,
}

/// Column positions resolved against one input's header row.
struct Columns {
    time: Vec<usize>,
    fields: Vec<usize>,
}

impl RowPlan<'_> {
    fn open(&self, path: &Path) -> Result<(csv::Reader<Box<dyn Read>>, Columns)> {
        let mut csv = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            .trim(Trim::All)
            .flexible(true)
            .from_reader(open_input(path)?);
        let headers = if self.has_headers {
            Some(csv.headers()?.clone())
        } else {
            None
        };
        let resolve = |refs: &[ColumnRef]| {
            refs.iter()
                .map(|col| col.resolve(headers.as_ref()))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("columns of {}", path.display()))
        };
        let columns = Columns {
            time: resolve(&self.time_columns)?,
            fields: resolve(&self.field_columns)?,
        };
        Ok((csv, columns))
    }
}

/// A file is imported as is; a directory contributes its regular files in
/// file-name order.
fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(input)
        .with_context(|| format!("read input directory {}", input.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    if files.is_empty() {
        bail!("no input files in {}", input.display());
    }
    files.sort();
    Ok(files)
}

fn write_rows<R: Read>(
    csv: &mut csv::Reader<R>,
    plan: &RowPlan<'_>,
    columns: &Columns,
    writer: &mut ContainerWriter,
    stats: &mut ImportStats,
) -> Result<u64> {
    let mut values = Vec::with_capacity(plan.value_fields.len());
    let mut rows = 0u64;
    for record in csv.records() {
        let record = record?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);

        let mut time_text = String::new();
        for (i, &col) in columns.time.iter().enumerate() {
            if i > 0 {
                time_text.push(' ');
            }
            time_text.push_str(cell(&record, col, line)?);
        }
        let timestamp = parse_timestamp(&time_text, &plan.datetime_format)
            .with_context(|| format!("line {line}: invalid timestamp '{time_text}'"))?;

        values.clear();
        for (field, &col) in plan.value_fields.iter().zip(&columns.fields) {
            let text = cell(&record, col, line)?;
            let value = parse_value(field.field_type, text).with_context(|| {
                format!("line {line}: invalid value '{text}' for field {}", field.name)
            })?;
            values.push(value);
        }

        writer
            .append_at(timestamp, &values)
            .with_context(|| format!("line {line}: append failed"))?;

        if stats.last.is_some_and(|last| timestamp < last) {
            stats.out_of_order += 1;
        }
        stats.first.get_or_insert(timestamp);
        stats.last = Some(timestamp);
        stats.rows += 1;
        rows += 1;
    }
    Ok(rows)
}

fn cell<'r>(record: &'r StringRecord, col: usize, line: u64) -> Result<&'r str> {
    record
        .get(col)
        .ok_or_else(|| anyhow!("line {line}: missing column {col}"))
}

/// Accepts full date-times and, when the format has no time of day, dates at
/// midnight.
fn parse_timestamp(text: &str, format: &[BorrowedFormatItem<'_>]) -> Result<PrimitiveDateTime> {
    match PrimitiveDateTime::parse(text, format) {
        Ok(timestamp) => Ok(timestamp),
        Err(err) => Date::parse(text, format)
            .map(Date::midnight)
            .map_err(|_| anyhow!(err)),
    }
}

fn parse_value(field_type: FieldType, text: &str) -> Result<Value> {
    if field_type.is_float() {
        return Ok(Value::Float(text.parse::<f64>()?));
    }
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Value::Int(v));
    }
    if let Ok(v) = text.parse::<u64>() {
        return Ok(Value::UInt(v));
    }
    // Integral values written in float notation, e.g. "12000.0". Bounds are
    // exact powers of two so no value saturates in the cast.
    const TWO_63: f64 = 9_223_372_036_854_775_808.0;
    const TWO_64: f64 = 18_446_744_073_709_551_616.0;
    let v = text.parse::<f64>()?;
    if !v.is_finite() || v.fract() != 0.0 {
        bail!("not an integer");
    }
    if (-TWO_63..TWO_63).contains(&v) {
        Ok(Value::Int(v as i64))
    } else if (TWO_63..TWO_64).contains(&v) {
        Ok(Value::UInt(v as u64))
    } else {
        bail!("integer out of range");
    }
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("open input {}", path.display()))?;
    if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, format_description};

    #[test]
    fn column_refs_parse_indices_and_names() {
        assert_eq!(ColumnRef::parse("3"), ColumnRef::Index(3));
        assert_eq!(ColumnRef::parse(" Close "), ColumnRef::Name("Close".to_string()));
    }

    #[test]
    fn names_resolve_case_insensitively() {
        let headers = StringRecord::from(vec!["date", "time", "close"]);
        let col = ColumnRef::Name("Close".to_string());
        assert_eq!(col.resolve(Some(&headers)).expect("resolve"), 2);
        assert!(ColumnRef::Name("Open".to_string()).resolve(Some(&headers)).is_err());
        assert!(col.resolve(None).is_err());
    }

    #[test]
    fn integers_accept_float_notation() {
        assert_eq!(parse_value(FieldType::Int64, "12000").expect("int"), Value::Int(12_000));
        assert_eq!(parse_value(FieldType::Int64, "12000.0").expect("int"), Value::Int(12_000));
        assert!(parse_value(FieldType::Int64, "12000.5").is_err());
        assert_eq!(
            parse_value(FieldType::Int64, "9223372036854775808.0").expect("2^63"),
            Value::UInt(9_223_372_036_854_775_808)
        );
        assert_eq!(
            parse_value(FieldType::Int64, "-9223372036854775808.0").expect("min"),
            Value::Int(i64::MIN)
        );
        assert!(parse_value(FieldType::Int64, "18446744073709551616.0").is_err());
        assert!(parse_value(FieldType::Int64, "-9223372036854777856.0").is_err());
        assert!(parse_value(FieldType::Int64, "1e300").is_err());
        assert_eq!(parse_value(FieldType::Float64, "10.25").expect("float"), Value::Float(10.25));
    }

    #[test]
    fn date_only_formats_map_to_midnight() {
        let format = format_description!("[year]-[month]-[day]");
        let ts = parse_timestamp("2016-03-10", format).expect("date");
        assert_eq!(ts, datetime!(2016-03-10 0:00));
    }

    #[test]
    fn default_options_round_trip_through_json() {
        let options = ImportOptions::default();
        let json = serde_json::to_string(&options).expect("serialize");
        let back: ImportOptions = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.names, DEFAULT_NAMES);
        assert_eq!(back.time_columns, vec!["Date", "Time"]);
        let partial: ImportOptions =
            serde_json::from_str(r#"{"time_scale": "unix-min"}"#).expect("partial");
        assert_eq!(partial.time_scale, "unix-min");
        assert_eq!(partial.format, DEFAULT_FORMAT);
    }
}
