use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::{Error, Result};

/// Read-only mapping of a whole container file.
pub struct MmapFile {
    _file: File,
    map: Mmap,
    len: usize,
}

impl MmapFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| Error::Corrupt("file exceeds address space"))?;
        if len == 0 {
            return Err(Error::CorruptHeader("file is empty"));
        }
        // SAFETY: appends never rewrite bytes below the length observed here.
        // A writer created with `overwrite` truncates the file, so callers must
        // not overwrite a container while a reader has it mapped.
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(Self {
            _file: file,
            map,
            len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn range(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(Error::Corrupt("range overflow"))?;
        if end > self.len {
            return Err(Error::Corrupt("range out of bounds"));
        }
        Ok(&self.map[offset..end])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
