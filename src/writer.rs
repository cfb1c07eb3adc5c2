//! Append-only container writer.
//!
//! A writer exists only while the container is open: `create` returns it in
//! the `Created` state (header written, no records), the first successful
//! append moves it to `Open`, and `close` consumes it. Dropping a writer closes
//! it as well.
//!
//! Every append is a single `write_all` of exactly one record at the end of
//! the file. If that write fails the file is truncated back to the previous
//! record boundary before the error is returned, so the file length is always
//! `record_area_offset + k * record_size`.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use time::PrimitiveDateTime;

use crate::header::{ContainerHeader, NameValue};
use crate::record::{self, Value};
use crate::schema::Schema;
use crate::timescale::{TimeScaleSpec, TimeScaleTable};
use crate::writer_lock::try_lock;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct WriterConfig {
    /// Replace an existing file at the target path instead of failing. The
    /// old contents are truncated, so no reader may still have them mapped.
    pub overwrite: bool,
    /// `fsync` the file when the writer is closed.
    pub sync_on_close: bool,
    /// Metadata written into the header after the content description.
    pub name_values: Vec<NameValue>,
    /// Presets used to resolve a named time scale.
    pub time_scales: TimeScaleTable,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            sync_on_close: true,
            name_values: Vec::new(),
            time_scales: TimeScaleTable::standard(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    /// Header written, no records yet.
    Created,
    /// At least one record appended.
    Open,
}

pub struct ContainerWriter {
    path: PathBuf,
    file: File,
    header: ContainerHeader,
    len: u64,
    records: u64,
    sync_on_close: bool,
    closed: bool,
    scratch: Vec<u8>,
}

/// Summary of a container after its writer was closed.
#[derive(Clone, Debug)]
pub struct ClosedContainer {
    pub path: PathBuf,
    pub header: ContainerHeader,
    pub records: u64,
    pub len: u64,
}

impl ContainerWriter {
    /// Creates a new container at `path` with the default configuration.
    ///
    /// `names` is a whitespace-separated field list and `format` the matching
    /// type codes, e.g. `"Time Open Close"` and `"qdd"`.
    pub fn create(
        path: impl AsRef<Path>,
        content_description: &str,
        names: &str,
        format: &str,
        time_scale: impl Into<TimeScaleSpec>,
    ) -> Result<Self> {
        Self::create_with_config(
            path,
            content_description,
            names,
            format,
            time_scale,
            WriterConfig::default(),
        )
    }

    pub fn create_with_config(
        path: impl AsRef<Path>,
        content_description: &str,
        names: &str,
        format: &str,
        time_scale: impl Into<TimeScaleSpec>,
        config: WriterConfig,
    ) -> Result<Self> {
        let schema = Schema::parse(names, format)?;
        let time_scale = time_scale.into().resolve(&config.time_scales)?;
        let header = ContainerHeader::with_name_values(
            content_description,
            schema,
            time_scale,
            config.name_values,
        )?;
        Self::create_from_header(path, header, config.overwrite, config.sync_on_close)
    }

    /// Creates a container from an already built header.
    pub fn create_from_header(
        path: impl AsRef<Path>,
        header: ContainerHeader,
        overwrite: bool,
        sync_on_close: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = open_target(&path, overwrite)?;
        let locked = match try_lock(&file) {
            Ok(locked) => locked,
            Err(err) => {
                // Without overwrite the file is ours and still empty.
                if !overwrite {
                    discard_partial(file, &path);
                }
                return Err(err);
            }
        };
        if !locked {
            return Err(Error::WriterAlreadyActive);
        }
        if overwrite {
            file.set_len(0)?;
        }

        let bytes = header.encode();
        if let Err(err) = file.write_all(&bytes) {
            discard_partial(file, &path);
            return Err(err.into());
        }
        log::debug!(
            "created container {} (header {} bytes, record {} bytes)",
            path.display(),
            header.record_area_offset(),
            header.record_size()
        );

        Ok(Self {
            path,
            file,
            len: bytes.len() as u64,
            scratch: vec![0u8; header.record_size()],
            header,
            records: 0,
            sync_on_close,
            closed: false,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WriterState {
        if self.records == 0 {
            WriterState::Created
        } else {
            WriterState::Open
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Appends one record. `values` covers every field in declared order; the
    /// time field takes its raw tick value.
    pub fn append(&mut self, values: &[Value]) -> Result<()> {
        record::encode_into(self.header.schema(), values, &mut self.scratch)?;
        self.write_scratch()
    }

    /// Appends one record whose time field is converted from `timestamp`.
    /// `values` covers the remaining fields in declared order.
    pub fn append_at(&mut self, timestamp: PrimitiveDateTime, values: &[Value]) -> Result<()> {
        let field_count = self.header.schema().len();
        if values.len() + 1 != field_count {
            return Err(Error::FieldTypeMismatch(format!(
                "expected {} values besides the timestamp, got {}",
                field_count - 1,
                values.len()
            )));
        }
        let ticks = self.header.time_scale().to_ticks(timestamp)?;
        let time_field = self.header.time_field();
        let mut full = Vec::with_capacity(field_count);
        full.extend_from_slice(&values[..time_field]);
        full.push(Value::Int(ticks));
        full.extend_from_slice(&values[time_field..]);
        self.append(&full)
    }

    fn write_scratch(&mut self) -> Result<()> {
        if let Err(err) = self.file.write_all(&self.scratch) {
            log::warn!(
                "append to {} failed, truncating to {} bytes: {err}",
                self.path.display(),
                self.len
            );
            if let Err(rollback) = self.rollback() {
                log::warn!("rollback of {} failed: {rollback}", self.path.display());
            }
            return Err(err.into());
        }
        self.len += self.scratch.len() as u64;
        self.records += 1;
        Ok(())
    }

    /// Drops anything past the last complete record.
    fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.len)?;
        self.file.seek(SeekFrom::Start(self.len))?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Flushes file data to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<ClosedContainer> {
        self.finish()?;
        Ok(ClosedContainer {
            path: self.path.clone(),
            header: self.header.clone(),
            records: self.records,
            len: self.len,
        })
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.file.flush()?;
        if self.sync_on_close {
            self.file.sync_all()?;
        }
        log::debug!(
            "closed container {} with {} records ({} bytes)",
            self.path.display(),
            self.records,
            self.len
        );
        Ok(())
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("closing {} failed: {err}", self.path.display());
        }
    }
}

/// Removes a container whose creation failed before its header was complete.
fn discard_partial(file: File, path: &Path) {
    drop(file);
    if let Err(err) = std::fs::remove_file(path) {
        log::warn!("failed to remove partial container {}: {err}", path.display());
    }
}

fn open_target(path: &Path, overwrite: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if overwrite {
        // Truncation waits until the lock is held.
        options.create(true);
    } else {
        options.create_new(true);
    }
    match options.open(path) {
        Ok(file) => Ok(file),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(Error::PathExists(path.to_path_buf()))
        }
        Err(err) => Err(err.into()),
    }
}
