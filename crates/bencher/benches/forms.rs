use std::hint::black_box;

use bencher::{MULTIPART_BOUNDARY, MULTIPART_FORM, URLENCODED_FORM};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use nano_http::protocol::{Parameters, multipart};
use tokio_util::bytes::Bytes;

fn benchmark_urlencoded(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("form");
    group.throughput(Throughput::Bytes(URLENCODED_FORM.bytes()));
    group.bench_function(URLENCODED_FORM.name(), |b| {
        b.iter(|| Parameters::parse(black_box(URLENCODED_FORM.content())));
    });
    group.finish();
}

fn benchmark_multipart(criterion: &mut Criterion) {
    let body = Bytes::from_static(MULTIPART_FORM.content().as_bytes());

    let mut group = criterion.benchmark_group("form");
    group.throughput(Throughput::Bytes(MULTIPART_FORM.bytes()));
    group.bench_function(MULTIPART_FORM.name(), |b| {
        b.iter(|| {
            multipart::parse(black_box(&body), MULTIPART_BOUNDARY).expect("fixture should be a valid multipart body")
        });
    });
    group.finish();
}

criterion_group!(forms, benchmark_urlencoded, benchmark_multipart);
criterion_main!(forms);
