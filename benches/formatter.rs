//! Benchmark suite for the line formatters.
//!
//! Isolates formatting from the session loop so the per-reading cost of
//! each output format can be compared directly.

use bs440_listener::measurement::{Activity, BodyComposition, Gender, PersonInfo, WeightReading};
use bs440_listener::{InfluxDbFormatter, JsonFormatter, Measurement, OutputFormatter};
use chrono::DateTime;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn weight() -> Measurement {
    Measurement::Weight(WeightReading {
        person: 1,
        weight_kg: 75.3,
        stabilized: true,
        impedance_measured: true,
        timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
    })
}

fn body() -> Measurement {
    Measurement::Body(BodyComposition {
        person: 1,
        timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        kcal: 2140,
        fat_pct: 18.4,
        water_pct: 56.1,
        muscle_pct: 41.0,
        bone_pct: 3.9,
    })
}

fn person() -> Measurement {
    Measurement::Person(PersonInfo {
        person: 1,
        gender: Gender::Female,
        age: 34,
        height_cm: 168,
        activity: Activity::High,
    })
}

/// Benchmark each format with every measurement kind
fn bench_format_measurement_kinds(c: &mut Criterion) {
    let formatters: [(&str, Box<dyn OutputFormatter>); 2] = [
        ("influxdb", Box::new(InfluxDbFormatter::new("body_composition".to_string()))),
        ("json", Box::new(JsonFormatter::default())),
    ];
    let measurements = [("weight", weight()), ("body", body()), ("person", person())];

    for (format, formatter) in &formatters {
        let mut group = c.benchmark_group(format!("format_{format}"));
        group.throughput(Throughput::Elements(1));

        for (kind, measurement) in &measurements {
            group.bench_function(*kind, |b| {
                b.iter(|| {
                    let output = formatter.format(black_box(measurement));
                    black_box(output)
                })
            });
        }

        group.finish();
    }
}

criterion_group!(benches, bench_format_measurement_kinds);
criterion_main!(benches);
