//! Benchmarks for Range header parsing.
//!
//! Every byte-range request goes through `parse_range`, so it should stay
//! allocation-free.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mediastash::streaming::parse_range;

fn bench_parse_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_range");
    let available = 512 * 1024 * 1024;

    let headers = [
        ("bounded", Some("bytes=0-1048575")),
        ("open_ended", Some("bytes=1048576-")),
        ("suffix", Some("bytes=-65536")),
        ("multi_range", Some("bytes=0-1,4-5")),
        ("malformed", Some("bytes=abc-def")),
        ("absent", None),
    ];

    for (name, header) in headers {
        group.bench_function(name, |b| {
            b.iter(|| parse_range(black_box(header), black_box(available), false))
        });
    }

    group.bench_function("growing_past_end", |b| {
        b.iter(|| parse_range(black_box(Some("bytes=0-99999999")), black_box(4_194_304), true))
    });

    group.finish();
}

criterion_group!(benches, bench_parse_range);
criterion_main!(benches);
