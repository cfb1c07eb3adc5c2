use criterion::{black_box, Criterion, Throughput};
use criterion::{criterion_group, criterion_main};
use tempfile::tempdir;

use tsfile::{ContainerReader, ContainerWriter, Value};

const RECORDS: i64 = 100_000;

fn bench_read(c: &mut Criterion) {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("bench.tsf");
    let mut writer = ContainerWriter::create(
        &path,
        "bench",
        "Time Open High Low Close Volume OpenInt",
        "qddddqq",
        "unix-min",
    )
    .expect("writer");
    for n in 0..RECORDS {
        let px = n as f64 * 0.01;
        writer
            .append(&[
                Value::Int(n),
                Value::Float(px),
                Value::Float(px + 0.5),
                Value::Float(px - 0.5),
                Value::Float(px + 0.25),
                Value::Int(n * 10),
                Value::Int(500),
            ])
            .expect("append");
    }
    writer.close().expect("close");
    let reader = ContainerReader::open(&path).expect("reader");

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(RECORDS as u64));
    group.bench_function("iter", |b| {
        b.iter(|| {
            let mut volume = 0i64;
            for row in reader.iter() {
                let row = row.expect("row");
                volume += row[5].as_i64().expect("volume");
            }
            black_box(volume)
        });
    });
    group.bench_function("ticks", |b| {
        b.iter(|| {
            let mut last = 0i64;
            for i in 0..reader.len() {
                last = reader.ticks(i).expect("ticks");
            }
            black_box(last)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_read);
criterion_main!(benches);
