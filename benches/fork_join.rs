//! A benchmark for fork-join workloads: recursive Fibonacci on both drover
//! backends, compared against `rayon::join`.

use divan::Bencher;
use drover::fib::Fibonacci;
use drover::fib::sequential;
use drover::*;

// -----------------------------------------------------------------------------
// Workload

const SIZES: &[u32] = &[10, 15, 20, 25];

fn workers() -> usize {
    Config::available().workers()
}

// -----------------------------------------------------------------------------
// Benchmark

#[divan::bench(args = SIZES)]
fn baseline(bencher: Bencher, n: u32) {
    fn fib(n: u32) -> Value {
        if n < 2 { Value::from(n) } else { fib(n - 1) + fib(n - 2) }
    }

    let expected = sequential(n);
    bencher.bench_local(move || {
        assert_eq!(fib(n), expected);
    });
}

#[divan::bench(args = SIZES)]
fn dag(bencher: Bencher, n: u32) {
    let runtime = Runtime::new(Config::new(workers())).unwrap();
    let expected = sequential(n);

    bencher
        .with_inputs(|| Fibonacci(n).graph().unwrap())
        .bench_local_values(|(graph, sink)| {
            let report = runtime.run_graph(graph).unwrap();
            assert_eq!(report.output.result(sink), expected);
        });
}

#[divan::bench(args = SIZES)]
fn frames(bencher: Bencher, n: u32) {
    let config = Config::new(workers()).with_backend(BackendKind::Frames);
    let runtime = Runtime::new(config).unwrap();
    let expected = sequential(n);

    bencher.bench_local(|| {
        let report = runtime.run(&Fibonacci(n)).unwrap();
        assert_eq!(report.output, Some(expected));
    });
}

#[divan::bench(args = SIZES)]
fn rayon(bencher: Bencher, n: u32) {
    fn fib(n: u32) -> Value {
        if n < 2 {
            return Value::from(n);
        }
        let (a, b) = rayon::join(|| fib(n - 1), || fib(n - 2));
        a + b
    }

    let expected = sequential(n);
    bencher.bench_local(move || {
        assert_eq!(fib(n), expected);
    });
}

fn main() {
    divan::main();
}
