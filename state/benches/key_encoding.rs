use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fibre_state::{Encoding, KeyEncoder};
use serde::Serialize;

#[derive(Serialize)]
struct CompositeId {
  tenant: &'static str,
  region: u16,
  tags: Vec<&'static str>,
}

fn bench_encodings(c: &mut Criterion) {
  let composite = CompositeId {
    tenant: "acme",
    region: 7,
    tags: vec!["hot", "eu", "primary"],
  };

  let mut group = c.benchmark_group("key_encoding");
  for encoding in [Encoding::Plain, Encoding::Base64, Encoding::Md5, Encoding::Sha1] {
    let encoder = KeyEncoder::new(encoding, false);
    group.bench_with_input(BenchmarkId::new("u64", encoding), &42u64, |b, id| {
      b.iter(|| encoder.encode(Some(black_box(id))).unwrap())
    });
    group.bench_with_input(BenchmarkId::new("composite", encoding), &composite, |b, id| {
      b.iter(|| encoder.encode(Some(black_box(id))).unwrap())
    });
  }
  group.finish();
}

criterion_group!(benches, bench_encodings);
criterion_main!(benches);
