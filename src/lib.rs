//! Self-describing binary container for fixed-width time-series records.
//!
//! A container is a header (field table, time scale, content description,
//! metadata) padded to a 64-byte boundary, followed by packed records of
//! identical size. Writers append records sequentially; readers map the file
//! and stride over the record area.
//!
//! ```no_run
//! use time::macros::datetime;
//! use tsfile::{ContainerReader, ContainerWriter, Value};
//!
//! let mut writer = ContainerWriter::create(
//!     "bars.tsf",
//!     "rb1505",
//!     "Time Open High Low Close Volume OpenInt",
//!     "qddddqq",
//!     "unix-min",
//! )?;
//! writer.append_at(
//!     datetime!(2016-03-10 9:30),
//!     &[10.1.into(), 10.3.into(), 10.0.into(), 10.2.into(), 12_000i64.into(), 500i64.into()],
//! )?;
//! writer.close()?;
//!
//! let reader = ContainerReader::open("bars.tsf")?;
//! assert_eq!(reader.len(), 1);
//! assert_eq!(reader.record(0)?.unwrap()[5], Value::Int(12_000));
//! # Ok::<(), tsfile::Error>(())
//! ```

pub mod error;
pub mod header;
pub mod mmap;
pub mod reader;
pub mod record;
pub mod schema;
pub mod timescale;
pub mod writer;
mod writer_lock;

#[cfg(feature = "import")]
pub mod import;

pub use error::{Error, Result};
pub use header::{read_header, ContainerHeader, MetaValue, NameValue};
pub use reader::ContainerReader;
pub use record::Value;
pub use schema::{FieldDescriptor, FieldType, Schema};
pub use timescale::{TimeScale, TimeScaleSpec, TimeScaleTable};
pub use writer::{ClosedContainer, ContainerWriter, WriterConfig, WriterState};
