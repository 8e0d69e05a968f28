//! Benchmark suite for the timing-critical paths
//!
//! Measures:
//! - Schedule generation throughput per scenario
//! - Query ring publish/complete round trips
//! - Latency recorder appends and percentile computation

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cargar::log::AsyncLogger;
use cargar::recorder::{LatencyRecorder, LatencyStatistics};
use cargar::ring::QueryRing;
use cargar::schedule::ScheduleGenerator;
use cargar::{EffectiveSettings, QuerySampleLibrary, RequestedSettings, SampleIndex, Scenario};

struct BenchLibrary(u64);

impl QuerySampleLibrary for BenchLibrary {
    fn total_sample_count(&self) -> u64 {
        self.0
    }
    fn performance_sample_count(&self) -> u64 {
        self.0
    }
    fn load_samples_to_ram(&self, _samples: &[SampleIndex]) {}
    fn unload_samples_from_ram(&self, _samples: &[SampleIndex]) {}
}

fn resolve(scenario: Scenario) -> EffectiveSettings {
    let logger = AsyncLogger::spawn(Box::new(std::io::sink()));
    let requested = RequestedSettings {
        scenario,
        server_target_qps: 1000.0,
        multi_stream_target_qps: 60.0,
        multi_stream_samples_per_query: 8,
        ..RequestedSettings::default()
    };
    EffectiveSettings::resolve(&requested, &BenchLibrary(1024), &logger.sink()).expect("resolve")
}

fn bench_schedule_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_generation");
    let window: Arc<Vec<u64>> = Arc::new((0..1024).collect());
    for scenario in [Scenario::SingleStream, Scenario::MultiStream, Scenario::Server] {
        let settings = resolve(scenario);
        group.bench_with_input(
            BenchmarkId::from_parameter(settings.scenario.as_str()),
            &settings,
            |b, settings| {
                b.iter(|| {
                    let mut generator =
                        ScheduleGenerator::new(settings, Arc::clone(&window));
                    black_box(generator.pregenerate(1000))
                });
            },
        );
    }
    group.finish();
}

fn bench_ring_round_trip(c: &mut Criterion) {
    let ring = QueryRing::with_capacity(1 << 10);
    c.bench_function("ring_publish_complete", |b| {
        let mut query_id = 0u64;
        b.iter(|| {
            ring.publish(query_id, 0, query_id, 1, 0).expect("publish");
            black_box(ring.complete_sample(query_id).expect("complete"));
            query_id += 1;
        });
    });
}

fn bench_recorder(c: &mut Criterion) {
    c.bench_function("recorder_record", |b| {
        let recorder = LatencyRecorder::with_expected_samples(1 << 20);
        recorder.enable();
        let mut query_id = 0u64;
        b.iter(|| {
            recorder.record(query_id, 500_000);
            query_id += 1;
        });
    });

    c.bench_function("percentiles_100k", |b| {
        let samples: Vec<i64> = (0..100_000).map(|i| (i * 7919) % 1_000_000).collect();
        b.iter(|| black_box(LatencyStatistics::from_samples(&samples, 0.99)));
    });
}

criterion_group!(
    benches,
    bench_schedule_generation,
    bench_ring_round_trip,
    bench_recorder
);
criterion_main!(benches);
