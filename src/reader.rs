use std::path::{Path, PathBuf};

use time::PrimitiveDateTime;

use crate::header::ContainerHeader;
use crate::mmap::MmapFile;
use crate::record::{self, decode_field, Value};
use crate::{Error, Result};

/// Memory-mapped view of a finished (or in-progress) container.
///
/// The record count is fixed at open time; records appended afterwards are
/// not visible through this reader.
pub struct ContainerReader {
    path: PathBuf,
    header: ContainerHeader,
    map: MmapFile,
    record_count: usize,
}

impl ContainerReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map = MmapFile::open(&path)?;
        let header = ContainerHeader::decode(map.as_slice())?;
        let offset = header.record_area_offset();
        if map.len() < offset {
            return Err(Error::CorruptHeader("file ends inside header padding"));
        }
        let area_len = map.len() - offset;
        if area_len % header.record_size() != 0 {
            return Err(Error::Corrupt("record area is not a whole number of records"));
        }
        let record_count = area_len / header.record_size();
        log::debug!("opened container {} with {record_count} records", path.display());
        Ok(Self {
            path,
            header,
            map,
            record_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// The whole record area, `len() * record_size` bytes.
    pub fn records_area(&self) -> &[u8] {
        &self.map.as_slice()[self.header.record_area_offset()..]
    }

    pub fn record_bytes(&self, index: usize) -> Option<&[u8]> {
        if index >= self.record_count {
            return None;
        }
        let size = self.header.record_size();
        self.map
            .range(self.header.record_area_offset() + index * size, size)
            .ok()
    }

    pub fn record(&self, index: usize) -> Result<Option<Vec<Value>>> {
        self.record_bytes(index)
            .map(|bytes| record::decode(self.header.schema(), bytes))
            .transpose()
    }

    /// Raw tick value of the time field.
    pub fn ticks(&self, index: usize) -> Option<i64> {
        let field = &self.header.schema().fields()[self.header.time_field()];
        let bytes = self.record_bytes(index)?;
        decode_field(field.field_type, &bytes[field.offset..field.offset + field.size]).as_i64()
    }

    pub fn timestamp(&self, index: usize) -> Result<Option<PrimitiveDateTime>> {
        self.ticks(index)
            .map(|ticks| self.header.time_scale().to_calendar(ticks))
            .transpose()
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Vec<Value>>> + '_ {
        self.records_area()
            .chunks_exact(self.header.record_size())
            .map(|bytes| record::decode(self.header.schema(), bytes))
    }
}
