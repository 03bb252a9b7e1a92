/*
    Run with:
    cargo bench --bench metrics_counter

    Each iteration adds to one of 4*4*10*10 = 1600 time series, with the
    attributes given in sorted or reversed order. Counter_Add_Owned_Values
    builds its attribute values from owned strings.
*/

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use otel_core::{
    metrics::{Counter, MeterProvider as _},
    KeyValue,
};
use otel_sdk::metrics::{ManualReader, SdkMeterProvider};
use rand::Rng;

static ATTRIBUTE_VALUES: [&str; 10] = [
    "value1", "value2", "value3", "value4", "value5", "value6", "value7", "value8", "value9",
    "value10",
];

fn create_counter(name: &'static str) -> (SdkMeterProvider, Counter<u64>) {
    let provider = SdkMeterProvider::builder()
        .with_reader(ManualReader::builder().build())
        .build();
    let counter = provider.meter("benchmarks").u64_counter(name).build();
    (provider, counter)
}

fn random_indexes() -> [usize; 4] {
    let mut rng = rand::rng();
    [
        rng.random_range(0..4),
        rng.random_range(0..4),
        rng.random_range(0..10),
        rng.random_range(0..10),
    ]
}

fn counter_add(c: &mut Criterion, name: &'static str, sorted: bool) {
    let (_provider, counter) = create_counter(name);
    c.bench_function(name, |b| {
        b.iter_batched(
            random_indexes,
            |rands| {
                let mut attributes = [
                    KeyValue::new("attribute1", ATTRIBUTE_VALUES[rands[0]]),
                    KeyValue::new("attribute2", ATTRIBUTE_VALUES[rands[1]]),
                    KeyValue::new("attribute3", ATTRIBUTE_VALUES[rands[2]]),
                    KeyValue::new("attribute4", ATTRIBUTE_VALUES[rands[3]]),
                ];
                if !sorted {
                    attributes.reverse();
                }
                counter.add(1, &attributes);
            },
            BatchSize::SmallInput,
        );
    });
}

fn counter_add_owned_values(c: &mut Criterion) {
    let (_provider, counter) = create_counter("Counter_Add_Owned_Values");
    let values: Vec<String> = (1..=10).map(|i| format!("value{i}")).collect();
    c.bench_function("Counter_Add_Owned_Values", |b| {
        b.iter_batched(
            random_indexes,
            |rands| {
                counter.add(
                    1,
                    &[
                        KeyValue::new("attribute1", values[rands[0]].clone()),
                        KeyValue::new("attribute2", values[rands[1]].clone()),
                        KeyValue::new("attribute3", values[rands[2]].clone()),
                        KeyValue::new("attribute4", values[rands[3]].clone()),
                    ],
                );
            },
            BatchSize::SmallInput,
        );
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    counter_add(c, "Counter_Add_Sorted", true);
    counter_add(c, "Counter_Add_Unsorted", false);
    counter_add_owned_values(c);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
