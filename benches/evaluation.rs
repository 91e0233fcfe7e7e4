use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use featurevisor::{Context, Instance, InstanceConfig, OverrideOptions};

fn test_instance() -> Instance {
    let mut config = InstanceConfig::new();
    config
        .datafile_json(&std::fs::read_to_string("tests/data/datafile.json").unwrap())
        .unwrap();
    config.to_instance()
}

fn criterion_benchmark(c: &mut Criterion) {
    let instance = test_instance();
    let options = OverrideOptions::default();

    {
        let mut group = c.benchmark_group("foo");
        group.throughput(Throughput::Elements(1));
        let context: Context = [
            ("userId".to_owned(), "123".into()),
            ("device".to_owned(), "mobile".into()),
            ("country".to_owned(), "de".into()),
        ]
        .into();
        group.bench_function("evaluate_flag", |b| {
            b.iter(|| instance.evaluate_flag(black_box("foo"), black_box(&context), &options))
        });
        group.bench_function("evaluate_variation", |b| {
            b.iter(|| instance.evaluate_variation(black_box("foo"), black_box(&context), &options))
        });
        group.bench_function("evaluate_variable", |b| {
            b.iter(|| {
                instance.evaluate_variable(
                    black_box("foo"),
                    black_box("bar"),
                    black_box(&context),
                    &options,
                )
            })
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("withRequired");
        group.throughput(Throughput::Elements(1));
        let context: Context = [("userId".to_owned(), "123".into())].into();
        group.bench_function("evaluate_flag", |b| {
            b.iter(|| {
                instance.evaluate_flag(black_box("withRequired"), black_box(&context), &options)
            })
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("all");
        let context: Context = [("userId".to_owned(), "123".into())].into();
        group.bench_function("get_all_evaluations", |b| {
            b.iter(|| instance.get_all_evaluations(black_box(&context), &[], &options))
        });
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
