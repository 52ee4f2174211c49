use criterion::{Criterion, criterion_group, criterion_main};
use datahub_core::hub::DataHub;
use datahub_core::resource::ObservationConfig;
use datahub_core::sample::{Sample, SampleType};
use std::hint::black_box;

fn build_relay(depth: usize) -> DataHub {
    let mut hub = DataHub::default();
    hub.create_input("/in", SampleType::Numeric, "count").unwrap();
    let mut prev = "/in".to_string();
    for i in 0..depth {
        let path = format!("/relay/{i}");
        hub.create_output(&path, SampleType::Numeric, "count").unwrap();
        hub.set_source(&path, Some(&prev)).unwrap();
        prev = path;
    }
    hub
}

fn bench_push_direct(c: &mut Criterion) {
    let mut hub = DataHub::default();
    hub.create_input("/in", SampleType::Numeric, "").unwrap();
    let mut ts = 0.0;

    c.bench_function("push_direct", |b| {
        b.iter(|| {
            ts += 1.0;
            hub.push("/in", "", black_box(Sample::numeric(ts, ts))).unwrap()
        })
    });
}

fn bench_push_relay_chain_8(c: &mut Criterion) {
    let mut hub = build_relay(8);
    let mut ts = 0.0;

    c.bench_function("push_relay_chain_8", |b| {
        b.iter(|| {
            ts += 1.0;
            hub.push("/in", "count", black_box(Sample::numeric(ts, ts)))
                .unwrap()
        })
    });
}

fn bench_push_observation_filtered(c: &mut Criterion) {
    let mut hub = DataHub::default();
    hub.create_observation(
        "/obs",
        ObservationConfig {
            min_period: 1.0e9, // reject everything after the first
            ..ObservationConfig::default()
        },
    )
    .unwrap();
    let mut ts = 0.0;

    c.bench_function("push_observation_filtered", |b| {
        b.iter(|| {
            ts += 1.0;
            hub.push("/obs", "", black_box(Sample::numeric(ts, ts))).unwrap()
        })
    });
}

fn bench_string_coercion(c: &mut Criterion) {
    let mut hub = DataHub::default();
    hub.create_input("/num", SampleType::Numeric, "").unwrap();
    let mut ts = 0.0;

    c.bench_function("push_string_to_numeric", |b| {
        b.iter(|| {
            ts += 1.0;
            hub.push("/num", "", black_box(Sample::string(ts, "123.25")))
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_push_direct,
    bench_push_relay_chain_8,
    bench_push_observation_filtered,
    bench_string_coercion,
);
criterion_main!(benches);
