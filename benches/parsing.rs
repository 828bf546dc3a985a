use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

fn bench_parse_mbox(c: &mut Criterion) {
    let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("simple.mbox");

    c.bench_function("parse_simple_mbox", |b| {
        b.iter(|| {
            let parser = mboxstore::parser::mbox::MboxParser::new(&fixture_path).unwrap();
            parser.parse(None).unwrap().len()
        })
    });
}

fn bench_enumerate(c: &mut Criterion) {
    let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("simple.mbox");
    let temp = std::env::temp_dir().join("mboxstore-bench");

    c.bench_function("enumerate_simple_fresh_store", |b| {
        b.iter(|| {
            let mut store = mboxstore::store::MboxStore::new(
                mboxstore::lock::LockManager::default(),
                &temp,
                mboxstore::parser::mbox::DEFAULT_READ_BUFFER_SIZE,
            );
            store.enumerate(&fixture_path).unwrap().len()
        })
    });
}

criterion_group!(benches, bench_parse_mbox, bench_enumerate);
criterion_main!(benches);
