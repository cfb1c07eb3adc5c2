use std::fs::{self, OpenOptions};
use std::io::Write;

use tempfile::tempdir;

use tsfile::header::{ContainerHeader, RECORD_SIZE_OFFSET};
use tsfile::{read_header, ContainerReader, ContainerWriter, Error, Value};

fn write_sample(path: &std::path::Path, rows: i64) {
    let mut writer =
        ContainerWriter::create(path, "sample", "Time Value", "qd", "unix-s").expect("create");
    for n in 0..rows {
        writer
            .append(&[Value::Int(n), Value::Float(n as f64)])
            .expect("append");
    }
    writer.close().expect("close");
}

#[test]
fn trailing_partial_record_is_reported() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("partial.tsf");
    write_sample(&path, 3);

    let mut file = OpenOptions::new().append(true).open(&path).expect("open");
    file.write_all(&[0u8; 7]).expect("append garbage");
    drop(file);

    assert!(matches!(
        ContainerReader::open(&path),
        Err(Error::Corrupt(_))
    ));
}

#[test]
fn empty_and_foreign_files_are_rejected() {
    let dir = tempdir().expect("tempdir");

    let empty = dir.path().join("empty.tsf");
    fs::write(&empty, b"").expect("write");
    assert!(matches!(
        ContainerReader::open(&empty),
        Err(Error::CorruptHeader(_))
    ));

    let foreign = dir.path().join("foreign.tsf");
    fs::write(&foreign, vec![0x42u8; 256]).expect("write");
    assert!(matches!(
        ContainerReader::open(&foreign),
        Err(Error::CorruptHeader("bad magic"))
    ));
    assert!(matches!(
        read_header(&foreign),
        Err(Error::CorruptHeader("bad magic"))
    ));
}

#[test]
fn truncated_header_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("short.tsf");
    write_sample(&path, 0);
    let bytes = fs::read(&path).expect("read");
    let header = ContainerHeader::decode(&bytes).expect("decode");

    fs::write(&path, &bytes[..header.header_len() - 4]).expect("truncate");
    assert!(matches!(read_header(&path), Err(Error::CorruptHeader(_))));
    assert!(matches!(
        ContainerReader::open(&path),
        Err(Error::CorruptHeader(_))
    ));
}

#[test]
fn tampered_record_size_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("tampered.tsf");
    write_sample(&path, 2);

    let mut bytes = fs::read(&path).expect("read");
    bytes[RECORD_SIZE_OFFSET..RECORD_SIZE_OFFSET + 8].copy_from_slice(&8u64.to_le_bytes());
    fs::write(&path, &bytes).expect("write");
    assert!(matches!(
        ContainerReader::open(&path),
        Err(Error::CorruptHeader(_))
    ));
}

#[test]
fn reader_sees_records_present_at_open() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("live.tsf");
    let mut writer =
        ContainerWriter::create(&path, "", "Time Value", "qd", "unix-s").expect("create");
    writer
        .append(&[Value::Int(1), Value::Float(1.0)])
        .expect("append");

    let reader = ContainerReader::open(&path).expect("open");
    writer
        .append(&[Value::Int(2), Value::Float(2.0)])
        .expect("append");
    assert_eq!(reader.len(), 1);
    assert_eq!(ContainerReader::open(&path).expect("reopen").len(), 2);
}
