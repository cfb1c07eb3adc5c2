use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use tsfile::import::{
    import_csv, ImportOptions, DEFAULT_DATETIME_FORMAT, DEFAULT_FORMAT, DEFAULT_NAMES,
    DEFAULT_TIME_SCALE,
};
use tsfile::{ContainerReader, MetaValue, TimeScaleTable, Value};

#[derive(Parser)]
#[command(name = "tsfile")]
#[command(about = "Build and inspect binary time-series containers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a CSV (or CSV.GZ) file, or a directory of them, into a new container
    Import(ImportArgs),
    /// Print the header of a container
    Inspect {
        path: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print records as CSV
    Dump {
        path: PathBuf,
        /// Maximum number of records to print
        #[arg(long)]
        limit: Option<usize>,
        /// Print the time field as raw ticks
        #[arg(long)]
        ticks: bool,
    },
}

#[derive(clap::Args)]
struct ImportArgs {
    /// Input CSV or CSV.GZ path, or a directory imported in file-name order
    input: PathBuf,

    /// Output container path
    output: PathBuf,

    /// JSON import options; replaces every other option below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Whitespace-separated field names
    #[arg(long, default_value = DEFAULT_NAMES)]
    names: String,

    /// Type codes, one per field
    #[arg(long, default_value = DEFAULT_FORMAT)]
    format: String,

    /// Content description stored in the header
    #[arg(long, default_value = "")]
    content: String,

    /// Time scale preset id or YYYY-MM-DD:TICKS_PER_DAY
    #[arg(long, default_value = DEFAULT_TIME_SCALE)]
    time_scale: String,

    /// `time` format description for the joined time columns
    #[arg(long, default_value = DEFAULT_DATETIME_FORMAT)]
    datetime_format: String,

    /// Columns (names or indices) joined to form the timestamp
    #[arg(long, value_delimiter = ',', default_values_t = ["Date".to_string(), "Time".to_string()])]
    time_columns: Vec<String>,

    /// Columns for the non-time fields, in field order
    #[arg(long, value_delimiter = ',')]
    field_columns: Option<Vec<String>>,

    /// Field delimiter
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Input has no header row
    #[arg(long)]
    no_headers: bool,

    /// Replace an existing output file
    #[arg(long)]
    force: bool,
}

impl ImportArgs {
    fn options(&self) -> Result<ImportOptions> {
        if let Some(config) = &self.config {
            let mut options = ImportOptions::from_json_file(config)?;
            options.overwrite |= self.force;
            return Ok(options);
        }
        Ok(ImportOptions {
            names: self.names.clone(),
            format: self.format.clone(),
            content: self.content.clone(),
            time_scale: self.time_scale.clone(),
            datetime_format: self.datetime_format.clone(),
            time_columns: self.time_columns.clone(),
            field_columns: self.field_columns.clone(),
            delimiter: self.delimiter,
            has_headers: !self.no_headers,
            overwrite: self.force,
            ..ImportOptions::default()
        })
    }
}

#[derive(Serialize)]
struct HeaderSummary {
    path: String,
    content: String,
    fields: Vec<FieldSummary>,
    time_field: String,
    epoch: String,
    ticks_per_day: i64,
    time_scale_preset: Option<String>,
    record_size: usize,
    header_len: usize,
    record_area_offset: usize,
    records: usize,
    first: Option<String>,
    last: Option<String>,
    name_values: Vec<(String, String)>,
}

#[derive(Serialize)]
struct FieldSummary {
    name: String,
    code: char,
    offset: usize,
    size: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Import(args) => {
            let options = args.options()?;
            let stats = import_csv(&args.input, &args.output, &options)?;
            if stats.files.len() > 1 {
                for file in &stats.files {
                    println!("  {} rows={}", file.path.display(), file.rows);
                }
            }
            println!(
                "imported files={} rows={} bytes={} first={} last={} out_of_order={}",
                stats.files.len(),
                stats.rows,
                stats.bytes,
                fmt_opt(stats.first),
                fmt_opt(stats.last),
                stats.out_of_order
            );
        }
        Command::Inspect { path, json } => {
            let summary = summarize(&path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Command::Dump { path, limit, ticks } => dump(&path, limit, ticks)?,
    }
    Ok(())
}

fn summarize(path: &Path) -> Result<HeaderSummary> {
    let reader =
        ContainerReader::open(path).with_context(|| format!("open {}", path.display()))?;
    let header = reader.header();
    let scale = header.time_scale();
    let presets = TimeScaleTable::standard();
    let last_index = reader.len().checked_sub(1);
    Ok(HeaderSummary {
        path: path.display().to_string(),
        content: header.content_description().to_string(),
        fields: header
            .schema()
            .fields()
            .iter()
            .map(|f| FieldSummary {
                name: f.name.clone(),
                code: f.field_type.code(),
                offset: f.offset,
                size: f.size,
            })
            .collect(),
        time_field: header.schema().fields()[header.time_field()].name.clone(),
        epoch: scale.epoch().to_string(),
        ticks_per_day: scale.ticks_per_day(),
        time_scale_preset: presets.name_of(&scale).map(str::to_string),
        record_size: header.record_size(),
        header_len: header.header_len(),
        record_area_offset: header.record_area_offset(),
        records: reader.len(),
        first: reader.timestamp(0)?.map(|t| t.to_string()),
        last: match last_index {
            Some(index) => reader.timestamp(index)?.map(|t| t.to_string()),
            None => None,
        },
        name_values: header
            .name_values()
            .iter()
            .map(|entry| {
                let value = match &entry.value {
                    MetaValue::Int64(v) => v.to_string(),
                    MetaValue::Float64(v) => v.to_string(),
                    MetaValue::Text(v) => v.clone(),
                };
                (entry.name.clone(), value)
            })
            .collect(),
    })
}

fn print_summary(summary: &HeaderSummary) {
    println!("path:        {}", summary.path);
    println!("content:     {}", summary.content);
    println!(
        "time scale:  epoch {} ticks/day {}{}",
        summary.epoch,
        summary.ticks_per_day,
        summary
            .time_scale_preset
            .as_deref()
            .map(|id| format!(" ({id})"))
            .unwrap_or_default()
    );
    println!("time field:  {}", summary.time_field);
    println!(
        "layout:      header {} bytes, records at {}, {} bytes each",
        summary.header_len, summary.record_area_offset, summary.record_size
    );
    println!("records:     {}", summary.records);
    if let (Some(first), Some(last)) = (&summary.first, &summary.last) {
        println!("range:       {first} .. {last}");
    }
    println!("fields:");
    for field in &summary.fields {
        println!(
            "  {:<16} {} offset {:>4} size {}",
            field.name, field.code, field.offset, field.size
        );
    }
    if !summary.name_values.is_empty() {
        println!("name values:");
        for (name, value) in &summary.name_values {
            println!("  {name} = {value}");
        }
    }
}

fn dump(path: &Path, limit: Option<usize>, raw_ticks: bool) -> Result<()> {
    let reader =
        ContainerReader::open(path).with_context(|| format!("open {}", path.display()))?;
    let header = reader.header();
    let scale = header.time_scale();
    let time_field = header.time_field();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    writeln!(out, "{}", header.schema().names().join(","))?;
    for row in reader.iter().take(limit.unwrap_or(usize::MAX)) {
        let row = row?;
        let mut cells = Vec::with_capacity(row.len());
        for (idx, value) in row.iter().enumerate() {
            match (idx == time_field && !raw_ticks, value) {
                (true, Value::Int(ticks)) => cells.push(scale.to_calendar(*ticks)?.to_string()),
                _ => cells.push(value.to_string()),
            }
        }
        writeln!(out, "{}", cells.join(","))?;
    }
    out.flush()?;
    Ok(())
}

fn fmt_opt(value: Option<time::PrimitiveDateTime>) -> String {
    value.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
}
