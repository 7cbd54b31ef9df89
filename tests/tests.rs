//! Integration tests for both scheduling backends.

#![cfg(not(loom))]

use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use drover::fib::FibTask;
use drover::fib::Fibonacci;
use drover::fib::sequential;
use drover::*;
use tracing::Level;

// -----------------------------------------------------------------------------
// Helpers

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .without_time()
        .try_init();
}

/// A tiny deterministic generator, so graphs are the same on every run.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

/// Per-unit bookkeeping written by unit bodies.
struct Log {
    clock: AtomicUsize,
    runs: Vec<AtomicUsize>,
    started: Vec<AtomicUsize>,
    finished: Vec<AtomicUsize>,
}

impl Log {
    fn new(units: usize) -> Arc<Log> {
        let zeros = || (0..units).map(|_| AtomicUsize::new(0)).collect();
        Arc::new(Log {
            clock: AtomicUsize::new(1),
            runs: zeros(),
            started: zeros(),
            finished: zeros(),
        })
    }

    fn record(&self, id: UnitId) {
        let index = id.index();
        self.started[index].store(self.clock.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
        self.runs[index].fetch_add(1, Ordering::SeqCst);
        self.finished[index].store(self.clock.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
    }
}

/// Builds a random layered DAG in which every unit records its execution in
/// the log. Units are only ever connected to units with higher ids, so the
/// result is always acyclic.
fn random_dag(units: usize, seed: u64, log: &Arc<Log>) -> (Graph, Vec<UnitId>) {
    let mut rng = XorShift(seed);
    let mut builder = GraphBuilder::with_capacity(units);
    let ids: Vec<UnitId> = (0..units)
        .map(|_| {
            let log = log.clone();
            builder.add_unit(move |cx| log.record(cx.id()))
        })
        .collect();

    for (index, &to) in ids.iter().enumerate().skip(1) {
        for _ in 0..rng.below(4) {
            let from = ids[rng.below(index)];
            builder.add_edge(from, to).unwrap();
        }
    }

    (builder.build().unwrap(), ids)
}

/// Builds `a -> {b, c} -> d`, where `d` sums the results of `b` and `c`.
fn diamond() -> (Graph, UnitId) {
    let mut builder = GraphBuilder::new();
    let a = builder.add_unit(|cx| cx.set_result(1));
    let b = builder.add_unit(|cx| cx.set_result(2));
    let c = builder.add_unit(|cx| cx.set_result(3));
    let d = builder.add_unit(|cx| {
        let sum = cx.inputs().sum();
        cx.set_result(sum);
    });
    builder.add_edge(a, b).unwrap();
    builder.add_edge(a, c).unwrap();
    builder.add_data_edge(b, d).unwrap();
    builder.add_data_edge(c, d).unwrap();
    (builder.build().unwrap(), d)
}

// -----------------------------------------------------------------------------
// DAG backend

#[test]
fn every_unit_runs_exactly_once() {
    init_logging();
    const UNITS: usize = 2_000;

    for workers in [1, 2, 8, 64] {
        let log = Log::new(UNITS);
        let (graph, _) = random_dag(UNITS, 0x9E37_79B9_7F4A_7C15, &log);
        let runtime = Runtime::new(Config::new(workers)).unwrap();
        let report = runtime.run_graph(graph).unwrap();

        assert_eq!(report.outstanding, 0);
        for (index, runs) in log.runs.iter().enumerate() {
            assert_eq!(runs.load(Ordering::SeqCst), 1, "unit #{index} with {workers} workers");
        }
    }
}

#[test]
fn units_start_after_their_predecessors_finish() {
    init_logging();
    const UNITS: usize = 1_500;

    let log = Log::new(UNITS);
    let (graph, ids) = random_dag(UNITS, 42, &log);
    let graph = Runtime::new(Config::new(8)).unwrap().run_graph(graph).unwrap().output;

    for from in ids {
        let finished = log.finished[from.index()].load(Ordering::SeqCst);
        for &to in graph.dependents(from) {
            let started = log.started[to.index()].load(Ordering::SeqCst);
            assert!(finished < started, "{from} finished at {finished}, {to} started at {started}");
        }
    }
}

#[test]
fn single_unit_with_many_workers() {
    init_logging();
    let mut builder = GraphBuilder::new();
    let only = builder.add_unit(|cx| cx.set_result(7));
    let graph = builder.build().unwrap();

    let report = Runtime::new(Config::new(8)).unwrap().run_graph(graph).unwrap();
    assert_eq!(report.output.result(only), 7);
    assert_eq!(report.outstanding, 0);
}

#[test]
fn diamond_runs_correctly_every_time() {
    init_logging();
    let runtime = Runtime::new(Config::new(16)).unwrap();
    let (mut graph, sink) = diamond();

    for _ in 0..1_000 {
        let report = runtime.run_graph(graph).unwrap();
        assert_eq!(report.output.result(sink), 5);
        assert_eq!(report.outstanding, 0);
        graph = report.output;
        graph.reset();
    }
}

#[test]
fn rerunning_a_reset_graph_is_idempotent() {
    init_logging();
    let runtime = Runtime::new(Config::new(4)).unwrap();
    let (graph, sink) = Fibonacci(15).graph().unwrap();

    let mut first = runtime.run_graph(graph).unwrap().output;
    let expected = first.result(sink);
    first.reset();
    assert_eq!(first.result(sink), 0);

    let second = runtime.run_graph(first).unwrap().output;
    assert_eq!(second.result(sink), expected);
    assert_eq!(expected, sequential(15));
}

#[test]
fn finished_graph_can_run_again_without_reset() {
    init_logging();
    let runtime = Runtime::new(Config::new(4)).unwrap();
    let mut builder = GraphBuilder::new();
    let a = builder.add_unit(|cx| cx.set_result(20));
    let c = builder.add_unit(|cx| {
        let input = cx.input(0);
        cx.set_result(input + 1);
    });
    builder.add_data_edge(a, c).unwrap();

    let first = runtime.run_graph(builder.build().unwrap()).unwrap();
    assert_eq!(first.output.result(c), 21);

    let second = runtime.run_graph(first.output).unwrap();
    assert_eq!(second.output.result(c), 21);
    assert_eq!(second.output.pending(c), 0);
    assert_eq!(second.outstanding, 0);
}

#[test]
fn pinned_workers_still_complete() {
    init_logging();
    for backend in [BackendKind::Dag, BackendKind::Frames] {
        // More workers than most machines have cores, so some pins fail and
        // those workers run unpinned.
        let config = Config::new(64).with_backend(backend).with_pinning(true);
        let report = Runtime::new(config).unwrap().run(&Fibonacci(12)).unwrap();
        assert_eq!(report.output, Some(sequential(12)), "{backend:?}");
        assert_eq!(report.outstanding, 0);
    }
}

#[test]
fn inputs_are_read_in_edge_order() {
    init_logging();
    let mut builder = GraphBuilder::new();
    let sources: Vec<UnitId> = (1..=5)
        .map(|v| builder.add_unit(move |cx| cx.set_result(v)))
        .collect();
    let digits = builder.add_unit(|cx| {
        let value = cx.inputs().fold(0, |acc, input| acc * 10 + input);
        cx.set_result(value);
    });
    for &source in sources.iter().rev() {
        builder.add_data_edge(source, digits).unwrap();
    }

    let graph = Runtime::new(Config::new(4)).unwrap().run_graph(builder.build().unwrap()).unwrap();
    assert_eq!(graph.output.result(digits), 54_321);
}

#[test]
fn wide_fan_out_and_fan_in() {
    init_logging();
    const WIDTH: i64 = 10_000;

    let mut builder = GraphBuilder::new();
    let root = builder.add_unit(|cx| cx.set_result(1));
    let sink = builder.add_unit(|cx| {
        let sum = cx.inputs().sum();
        cx.set_result(sum);
    });
    for _ in 0..WIDTH {
        let middle = builder.add_unit(|cx| {
            let input = cx.input(0);
            cx.set_result(input * 2);
        });
        builder.add_data_edge(root, middle).unwrap();
        builder.add_data_edge(middle, sink).unwrap();
    }

    let report = Runtime::new(Config::new(8)).unwrap().run_graph(builder.build().unwrap()).unwrap();
    assert_eq!(report.output.result(sink), 2 * WIDTH);
}

#[test]
fn many_independent_roots() {
    init_logging();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut builder = GraphBuilder::new();
    for _ in 0..1_000 {
        let counter = counter.clone();
        builder.add_unit(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }

    let report = Runtime::new(Config::new(6)).unwrap().run_graph(builder.build().unwrap()).unwrap();
    assert_eq!(report.outstanding, 0);
    assert_eq!(counter.load(Ordering::Relaxed), 1_000);
}

#[test]
fn blocking_wait_strategy() {
    init_logging();
    for backend in [BackendKind::Dag, BackendKind::Frames] {
        let config = Config::new(4).with_backend(backend).with_wait(WaitStrategy::Block);
        let report = Runtime::new(config).unwrap().run(&Fibonacci(18)).unwrap();
        assert_eq!(report.output, Some(sequential(18)));
        assert_eq!(report.outstanding, 0);
    }
}

#[test]
fn scheduler_interface() {
    init_logging();
    let mut scheduler = DagScheduler::new(Config::new(3)).unwrap();
    assert!(matches!(scheduler.await_completion(), Err(Error::NotSubmitted)));

    let (graph, sink) = diamond();
    scheduler.submit(graph).unwrap();
    let report = scheduler.await_completion().unwrap();
    assert_eq!(report.output.result(sink), 5);

    // A scheduler can be reused once its run has been awaited.
    let (graph, sink) = diamond();
    scheduler.submit(graph).unwrap();
    assert_eq!(scheduler.await_completion().unwrap().output.result(sink), 5);
}

#[test]
fn dropping_a_running_scheduler_stops_it() {
    init_logging();
    let (graph, _) = Fibonacci(20).graph().unwrap();
    let mut scheduler = DagScheduler::new(Config::new(4)).unwrap();
    scheduler.submit(graph).unwrap();
    drop(scheduler);
}

// -----------------------------------------------------------------------------
// Both backends

#[test]
fn fibonacci_on_both_backends() {
    init_logging();
    for backend in [BackendKind::Dag, BackendKind::Frames] {
        for workers in [1, 4, 8] {
            let runtime = Runtime::new(Config::new(workers).with_backend(backend)).unwrap();
            let report = runtime.run(&Fibonacci(10)).unwrap();
            assert_eq!(report.output, Some(55), "{backend:?} with {workers} workers");
            assert_eq!(report.outstanding, 0);
        }
    }
}

#[test]
fn larger_fibonacci_on_both_backends() {
    init_logging();
    for backend in [BackendKind::Dag, BackendKind::Frames] {
        let runtime = Runtime::new(Config::new(8).with_backend(backend)).unwrap();
        let report = runtime.run(&Fibonacci(22)).unwrap();
        assert_eq!(report.output, Some(sequential(22)), "{backend:?}");
    }
}

#[test]
fn zero_workers_is_rejected() {
    assert!(matches!(Runtime::new(Config::new(0)), Err(Error::InvalidWorkerCount)));
    assert!(matches!(
        FrameScheduler::<FibTask>::new(Config::new(0)),
        Err(Error::InvalidWorkerCount)
    ));
}

// -----------------------------------------------------------------------------
// Frame backend

/// Frame programs that misuse the frame API.
#[derive(Clone, Copy, Debug)]
enum Misuse {
    /// Writes to a frame after it has already become ready.
    LateWrite,
    /// Delivers two values to the terminal continuation.
    TerminalTwice,
    /// Creates a frame waiting on more inputs than it has slots.
    Oversized,
    /// Does nothing.
    Idle,
}

impl Behavior for Misuse {
    fn invoke(self, _: &FrameArgs, cx: &FrameContext<'_, Misuse>) -> Result<()> {
        match self {
            Misuse::LateWrite => {
                let frame = cx.create_frame(Misuse::Idle, 1)?;
                cx.write(frame, Slot::Left, 1_i64)?;
                cx.write(frame, Slot::Right, 2_i64)
            }
            Misuse::TerminalTwice => {
                let terminal = Continuation {
                    target: Target::Terminal,
                    slot: Slot::Left,
                };
                cx.resolve(terminal, 1)?;
                cx.resolve(terminal, 2)
            }
            Misuse::Oversized => {
                let frame = cx.create_frame(Misuse::Idle, SLOT_COUNT + 1)?;
                for slot in Slot::ALL {
                    cx.write(frame, slot, 0_i64)?;
                }
                Ok(())
            }
            Misuse::Idle => Ok(()),
        }
    }
}

#[test]
fn late_frame_writes_are_reported() {
    init_logging();
    let runtime = Runtime::new(Config::new(2)).unwrap();
    let result = runtime.run_frames(Misuse::LateWrite, FrameArgs::new());
    assert!(matches!(result, Err(Error::UnknownFrame(_))));
}

#[test]
fn frames_cannot_wait_on_more_inputs_than_slots() {
    init_logging();
    let runtime = Runtime::new(Config::new(2)).unwrap();
    let result = runtime.run_frames(Misuse::Oversized, FrameArgs::new());
    assert!(matches!(result, Err(Error::TooManyInputs(5))));
}

#[test]
fn terminal_accepts_one_value() {
    init_logging();
    let runtime = Runtime::new(Config::new(2)).unwrap();
    let result = runtime.run_frames(Misuse::TerminalTwice, FrameArgs::new());
    assert!(matches!(result, Err(Error::TerminalWrittenTwice)));
}

#[test]
fn frame_program_without_a_terminal_write() {
    init_logging();
    let runtime = Runtime::new(Config::new(2)).unwrap();
    let report = runtime.run_frames(Misuse::Idle, FrameArgs::new()).unwrap();
    assert_eq!(report.output, None);
    assert_eq!(report.outstanding, 0);
}

// -----------------------------------------------------------------------------
// Deque

#[test]
fn deque_owner_and_thieves_split_items_exactly_once() {
    const ITEMS: usize = 100_000;
    const THIEVES: usize = 4;

    let deque = Arc::new(Deque::<usize>::with_capacity(16));
    let seen: Arc<Vec<AtomicUsize>> = Arc::new((0..ITEMS).map(|_| AtomicUsize::new(0)).collect());
    let done = Arc::new(AtomicUsize::new(0));

    let thieves: Vec<_> = (0..THIEVES)
        .map(|_| {
            let deque = deque.clone();
            let seen = seen.clone();
            let done = done.clone();
            thread::spawn(move || {
                while done.load(Ordering::Acquire) == 0 || !deque.is_empty() {
                    if let Steal::Success(item) = deque.steal() {
                        seen[item].fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for item in 0..ITEMS {
        deque.push(item);
        if item % 3 == 0 {
            if let Some(popped) = deque.pop() {
                seen[popped].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    while let Some(popped) = deque.pop() {
        seen[popped].fetch_add(1, Ordering::Relaxed);
    }
    done.store(1, Ordering::Release);

    for thief in thieves {
        thief.join().unwrap();
    }
    for (item, count) in seen.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 1, "item {item}");
    }
}
