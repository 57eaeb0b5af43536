use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use machinehost::ring::{new_backing_store, split};

fn bench_ring_write_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_throughput");

    for chunk_size in [64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(chunk_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                let (counters, data) = new_backing_store();
                let (mut producer, consumer) = split(&counters, &data);
                let payload = vec![0xABu8; chunk_size];
                let mut sink = Vec::with_capacity(chunk_size);
                b.iter(|| {
                    producer.write(&payload);
                    sink.clear();
                    consumer.drain_into(&mut sink);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_ring_write_drain);
criterion_main!(benches);
