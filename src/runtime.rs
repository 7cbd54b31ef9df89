//! This module contains the runtime: configuration, the two schedulers, and
//! the thread management they share.
//!
//! A run starts by seeding the ready work onto the workers' queues and
//! setting the outstanding-work counter to match. Then one thread is started
//! per worker. The calling thread waits for the counter to reach zero, raises
//! the stop flag, and joins every worker before handing back the results.

use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZero;
use core::str::FromStr;
use core::time::Duration;
use std::thread::Builder as ThreadBuilder;
use std::thread::JoinHandle;
use std::thread::available_parallelism;
use std::time::Instant;

use tracing::debug;
use tracing::trace;

use crate::affinity;
use crate::completion::Completion;
use crate::completion::WaitStrategy;
use crate::deque::Deque;
use crate::error::Error;
use crate::error::Result;
use crate::frame::Behavior;
use crate::frame::FrameArgs;
use crate::graph::Graph;
use crate::platform::lock;
use crate::unit::UnitId;
use crate::unit::Value;
use crate::worker::DagShared;
use crate::worker::FrameShared;
use crate::worker::dag_worker;
use crate::worker::frame_worker;

// -----------------------------------------------------------------------------
// Configuration

/// Selects which scheduler a [`Runtime`] uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Static graphs on lock-free deques.
    #[default]
    Dag,
    /// Dynamically created frames on mutex-guarded queues.
    Frames,
}

impl FromStr for BackendKind {
    type Err = &'static str;

    fn from_str(s: &str) -> core::result::Result<BackendKind, Self::Err> {
        match s {
            "dag" => Ok(BackendKind::Dag),
            "frames" => Ok(BackendKind::Frames),
            _ => Err("expected `dag` or `frames`"),
        }
    }
}

/// Runtime configuration.
///
/// ```
/// # #![cfg(not(loom))]
/// use drover::{BackendKind, Config, WaitStrategy};
///
/// let config = Config::new(8)
///     .with_backend(BackendKind::Frames)
///     .with_wait(WaitStrategy::Block)
///     .with_pinning(true);
/// assert_eq!(config.workers(), 8);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    workers: usize,
    backend: BackendKind,
    wait: WaitStrategy,
    pin_threads: bool,
}

impl Config {
    /// Creates a configuration for a pool of `workers` threads, using the DAG
    /// backend, spin waiting, and no core pinning.
    pub const fn new(workers: usize) -> Config {
        Config {
            workers,
            backend: BackendKind::Dag,
            wait: WaitStrategy::Spin,
            pin_threads: false,
        }
    }

    /// Creates a configuration with one worker per available core.
    pub fn available() -> Config {
        let available = available_parallelism().map(NonZero::get).unwrap_or(1);
        Config::new(available)
    }

    /// Selects the scheduling backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendKind) -> Config {
        self.backend = backend;
        self
    }

    /// Selects how the calling thread waits for a run to finish.
    #[must_use]
    pub const fn with_wait(mut self, wait: WaitStrategy) -> Config {
        self.wait = wait;
        self
    }

    /// Pins worker *i* to core *i* when enabled.
    #[must_use]
    pub const fn with_pinning(mut self, pin_threads: bool) -> Config {
        self.pin_threads = pin_threads;
        self
    }

    /// Returns the number of workers.
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the scheduling backend.
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Returns the wait strategy.
    pub const fn wait(&self) -> WaitStrategy {
        self.wait
    }

    /// Returns true if workers are pinned to cores.
    pub const fn pin_threads(&self) -> bool {
        self.pin_threads
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidWorkerCount);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::available()
    }
}

// -----------------------------------------------------------------------------
// Scheduling interface

/// The outcome of a completed run.
#[derive(Debug)]
pub struct RunReport<T> {
    /// What the run produced.
    pub output: T,
    /// The outstanding-work count observed after the workers stopped. This is
    /// zero for every run that completed normally.
    pub outstanding: usize,
    /// Wall-clock time from the first worker starting to the last one
    /// stopping.
    pub elapsed: Duration,
}

impl<T> RunReport<T> {
    /// Transforms the output, keeping the rest of the report.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RunReport<U> {
        RunReport {
            output: f(self.output),
            outstanding: self.outstanding,
            elapsed: self.elapsed,
        }
    }
}

/// A backend that can accept work and report when it is done.
pub trait Scheduler {
    /// What is handed to the scheduler to run.
    type Submission;
    /// What a finished run produces.
    type Output;

    /// Seeds the submission onto the workers' queues and starts the workers.
    ///
    /// # Errors
    ///
    /// Fails if a run is already in progress, or if worker threads cannot be
    /// spawned.
    fn submit(&mut self, submission: Self::Submission) -> Result<()>;

    /// Waits until no work is outstanding, then stops and joins the workers.
    ///
    /// # Errors
    ///
    /// Fails if nothing was submitted, if a worker thread died, or if the
    /// submitted work reported an error.
    fn await_completion(&mut self) -> Result<RunReport<Self::Output>>;
}

/// Something that can be computed on either backend.
pub trait Workload {
    /// The frame behaviors used by the frame backend.
    type Behavior: Behavior;

    /// Builds the static graph for this workload, together with the unit whose
    /// result is the answer.
    ///
    /// # Errors
    ///
    /// Fails if the graph cannot be built.
    fn graph(&self) -> Result<(Graph, UnitId)>;

    /// Returns the root frame for this workload. Its continuation should
    /// target [`Target::Terminal`](crate::Target::Terminal).
    fn root_frame(&self) -> (Self::Behavior, FrameArgs);
}

// -----------------------------------------------------------------------------
// Thread management

/// Shared state that carries a completion counter.
trait Pool: Send + Sync + 'static {
    fn completion(&self) -> &Completion;
}

impl Pool for DagShared {
    fn completion(&self) -> &Completion {
        &self.completion
    }
}

impl<B: Behavior> Pool for FrameShared<B> {
    fn completion(&self) -> &Completion {
        &self.completion
    }
}

/// A run in progress.
struct Running<S> {
    shared: Arc<S>,
    threads: Vec<JoinHandle<()>>,
    started: Instant,
}

/// A run whose workers have all been joined.
struct Finished<S> {
    shared: Arc<S>,
    outstanding: usize,
    elapsed: Duration,
}

impl<S: Pool> Running<S> {
    /// Starts one thread per worker, each running `work`. If there is nothing
    /// to do, no threads are started.
    fn start(config: &Config, shared: S, work: fn(&S, usize)) -> Result<Running<S>> {
        let shared = Arc::new(shared);
        let mut running = Running {
            shared,
            threads: Vec::with_capacity(config.workers),
            started: Instant::now(),
        };

        if running.shared.completion().is_done() {
            debug!("nothing to run, skipping worker startup");
            return Ok(running);
        }

        for index in 0..config.workers {
            debug!("spawning worker with index {}", index);
            let shared = running.shared.clone();
            let pin_threads = config.pin_threads;
            let spawned = ThreadBuilder::new()
                .name(format!("worker {index}"))
                .spawn(move || {
                    if pin_threads {
                        affinity::pin_current(index);
                    }
                    work(&shared, index);
                });

            match spawned {
                Ok(handle) => running.threads.push(handle),
                Err(error) => {
                    running.cancel();
                    return Err(Error::Spawn(error));
                }
            }
        }

        Ok(running)
    }

    /// Waits for the outstanding-work counter to reach zero, then stops and
    /// joins the workers.
    fn finish(self, wait: WaitStrategy) -> Result<Finished<S>> {
        trace!("waiting for completion");
        self.shared.completion().wait(wait);
        let elapsed = self.started.elapsed();
        self.shared.completion().stop();

        join_all(self.threads)?;

        debug!(?elapsed, "run completed");
        Ok(Finished {
            outstanding: self.shared.completion().outstanding(),
            shared: self.shared,
            elapsed,
        })
    }

    /// Stops the workers without waiting for outstanding work.
    fn cancel(self) {
        debug!("cancelling run");
        self.shared.completion().abort();
        self.shared.completion().stop();
        let _ = join_all(self.threads);
    }
}

/// Joins every thread, reporting the first one that panicked.
fn join_all(threads: Vec<JoinHandle<()>>) -> Result<()> {
    let mut result = Ok(());
    for (index, handle) in threads.into_iter().enumerate() {
        if handle.join().is_err() && result.is_ok() {
            result = Err(Error::WorkerPanicked(index));
        }
    }
    result
}

// -----------------------------------------------------------------------------
// DAG scheduler

/// Runs static graphs. Each worker owns a lock-free deque of unit ids.
pub struct DagScheduler {
    config: Config,
    running: Option<Running<DagShared>>,
}

impl DagScheduler {
    /// Creates an idle scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkerCount`] for a pool of zero workers.
    pub fn new(config: Config) -> Result<DagScheduler> {
        config.validate()?;
        Ok(DagScheduler {
            config,
            running: None,
        })
    }
}

impl Scheduler for DagScheduler {
    type Submission = Graph;
    type Output = Graph;

    fn submit(&mut self, mut graph: Graph) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::AlreadySubmitted);
        }

        // A graph handed back by an earlier run has every counter at zero.
        graph.reset();

        let workers = self.config.workers;
        let queues: Vec<Deque<UnitId>> = (0..workers).map(|_| Deque::new()).collect();

        // Seed every ready unit, spread across the workers. The workers have
        // not started yet, so pushing onto their deques from here is safe.
        let roots = graph.roots();
        for (index, &root) in roots.iter().enumerate() {
            queues[index % workers].push(root);
        }
        debug!(units = graph.len(), roots = roots.len(), workers, "submitting graph");

        let shared = DagShared {
            completion: Completion::new(roots.len()),
            queues: queues.into_boxed_slice(),
            graph,
        };

        self.running = Some(Running::start(&self.config, shared, dag_worker)?);
        Ok(())
    }

    fn await_completion(&mut self) -> Result<RunReport<Graph>> {
        let running = self.running.take().ok_or(Error::NotSubmitted)?;
        let finished = running.finish(self.config.wait)?;

        // Every worker has been joined, and each one dropped its handle to the
        // shared state on the way out.
        let shared = Arc::try_unwrap(finished.shared).map_err(|_| Error::WorkersDetached)?;

        Ok(RunReport {
            output: shared.graph,
            outstanding: finished.outstanding,
            elapsed: finished.elapsed,
        })
    }
}

impl Drop for DagScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel();
        }
    }
}

// -----------------------------------------------------------------------------
// Frame scheduler

/// Runs frame programs. Each worker owns a mutex-guarded frame table and
/// ready queue.
pub struct FrameScheduler<B: Behavior> {
    config: Config,
    running: Option<Running<FrameShared<B>>>,
}

impl<B: Behavior> FrameScheduler<B> {
    /// Creates an idle scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkerCount`] for a pool of zero workers.
    pub fn new(config: Config) -> Result<FrameScheduler<B>> {
        config.validate()?;
        Ok(FrameScheduler {
            config,
            running: None,
        })
    }
}

impl<B: Behavior> Scheduler for FrameScheduler<B> {
    type Submission = (B, FrameArgs);
    type Output = Option<Value>;

    fn submit(&mut self, (tag, args): (B, FrameArgs)) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::AlreadySubmitted);
        }

        let shared = FrameShared::new(self.config.workers);
        let root = shared.queues[0].spawn(tag, args);
        debug!(%root, ?tag, workers = self.config.workers, "submitting root frame");

        self.running = Some(Running::start(&self.config, shared, frame_worker::<B>)?);
        Ok(())
    }

    fn await_completion(&mut self) -> Result<RunReport<Option<Value>>> {
        let running = self.running.take().ok_or(Error::NotSubmitted)?;
        let finished = running.finish(self.config.wait)?;

        if let Some(error) = lock(&finished.shared.failure).take() {
            return Err(error);
        }

        let output = lock(&finished.shared.terminal).take();
        Ok(RunReport {
            output,
            outstanding: finished.outstanding,
            elapsed: finished.elapsed,
        })
    }
}

impl<B: Behavior> Drop for FrameScheduler<B> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel();
        }
    }
}

// -----------------------------------------------------------------------------
// Runtime

/// The main entry point: runs workloads on the backend selected by its
/// [`Config`].
#[derive(Clone, Debug)]
pub struct Runtime {
    config: Config,
}

impl Runtime {
    /// Creates a runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkerCount`] for a pool of zero workers.
    pub fn new(config: Config) -> Result<Runtime> {
        config.validate()?;
        Ok(Runtime { config })
    }

    /// Returns the runtime's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs a workload on the configured backend and returns its answer.
    ///
    /// # Errors
    ///
    /// See [`Runtime::run_graph`] and [`Runtime::run_frames`].
    pub fn run<W: Workload>(&self, workload: &W) -> Result<RunReport<Option<Value>>> {
        match self.config.backend {
            BackendKind::Dag => {
                let (graph, sink) = workload.graph()?;
                let report = self.run_graph(graph)?;
                Ok(report.map(|graph| Some(graph.result(sink))))
            }
            BackendKind::Frames => {
                let (tag, args) = workload.root_frame();
                self.run_frames(tag, args)
            }
        }
    }

    /// Runs a static graph to completion and hands it back with every result
    /// filled in. The graph is reset first, so a graph returned by an earlier
    /// run can be passed straight back in.
    ///
    /// # Errors
    ///
    /// Fails if worker threads cannot be spawned or die.
    pub fn run_graph(&self, graph: Graph) -> Result<RunReport<Graph>> {
        let mut scheduler = DagScheduler::new(self.config)?;
        scheduler.submit(graph)?;
        scheduler.await_completion()
    }

    /// Runs a frame program from its root frame, and returns the value that
    /// reached the terminal continuation.
    ///
    /// # Errors
    ///
    /// Fails if worker threads cannot be spawned or die, or if a frame
    /// reports an error.
    pub fn run_frames<B: Behavior>(
        &self,
        tag: B,
        args: FrameArgs,
    ) -> Result<RunReport<Option<Value>>> {
        let mut scheduler = FrameScheduler::new(self.config)?;
        scheduler.submit((tag, args))?;
        scheduler.await_completion()
    }
}

// -----------------------------------------------------------------------------
// Tests
