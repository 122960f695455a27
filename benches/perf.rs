use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use less_ferrite::Compiler;

struct Case {
    name: &'static str,
    source: &'static str,
    formatter: &'static str,
}

fn compile_benchmarks(c: &mut Criterion) {
    let cases = [
        Case {
            name: "baseline",
            source: include_str!("../fixtures/benchmark.less"),
            formatter: "lessjs",
        },
        Case {
            name: "baseline_compressed",
            source: include_str!("../fixtures/benchmark.less"),
            formatter: "compressed",
        },
        Case {
            name: "import",
            source: include_str!("../fixtures/import.less"),
            formatter: "lessjs",
        },
        Case {
            name: "import_compressed",
            source: include_str!("../fixtures/import.less"),
            formatter: "compressed",
        },
        Case {
            name: "mixins",
            source: include_str!("../fixtures/mixins.less"),
            formatter: "lessjs",
        },
        Case {
            name: "mixins_compressed",
            source: include_str!("../fixtures/mixins.less"),
            formatter: "compressed",
        },
        Case {
            name: "arithmetic",
            source: include_str!("../fixtures/arithmetic.less"),
            formatter: "lessjs",
        },
        Case {
            name: "arithmetic_compressed",
            source: include_str!("../fixtures/arithmetic.less"),
            formatter: "compressed",
        },
    ];

    for case in cases {
        bench_case(c, &case);
    }
}

fn bench_case(c: &mut Criterion, case: &Case) {
    let mut group = c.benchmark_group(format!("less_compile/{}", case.name));
    group.throughput(Throughput::Bytes(case.source.len() as u64));

    let id = BenchmarkId::new(case.name, case.formatter);
    group.bench_with_input(id, &case.formatter, |b, formatter| {
        // 每轮新建实例：文件表跨 compile 累积，复用会把重复导入折叠掉
        b.iter(|| {
            let mut compiler = Compiler::new();
            compiler.set_formatter(formatter).unwrap();
            compiler.add_import_dir("fixtures");
            compiler.compile(case.source, None).unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, compile_benchmarks);
criterion_main!(benches);
