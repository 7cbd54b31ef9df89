//! Command line driver: computes a Fibonacci number on the drover runtime.

use std::process::ExitCode;

use argh::FromArgs;
use drover::BackendKind;
use drover::Config;
use drover::Runtime;
use drover::WaitStrategy;
use drover::fib::Fibonacci;
use tracing::Level;

/// Computes a Fibonacci number with a work-stealing fork-join runtime.
#[derive(FromArgs)]
struct Args {
    /// number of worker threads (defaults to one per core).
    #[argh(option, short = 'w')]
    workers: Option<usize>,

    /// which Fibonacci number to compute.
    #[argh(option, short = 'n', default = "30")]
    n: u32,

    /// scheduling backend: `dag` or `frames`.
    #[argh(option, default = "BackendKind::Dag")]
    backend: BackendKind,

    /// how the main thread waits: `spin` or `block`.
    #[argh(option, default = "WaitStrategy::Spin")]
    wait: WaitStrategy,

    /// pin worker i to core i.
    #[argh(switch)]
    pin: bool,

    /// log scheduler activity (debug builds only).
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();

    let level = if args.verbose { Level::TRACE } else { Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).with_thread_names(true).init();

    let config = args
        .workers
        .map_or_else(Config::available, Config::new)
        .with_backend(args.backend)
        .with_wait(args.wait)
        .with_pinning(args.pin);

    let result = Runtime::new(config).and_then(|runtime| runtime.run(&Fibonacci(args.n)));
    match result {
        Ok(report) => {
            match report.output {
                Some(value) => println!("fib({}) = {value}", args.n),
                None => println!("fib({}) produced no result", args.n),
            }
            println!(
                "{} workers, {:?} backend, {:.3?}",
                config.workers(),
                config.backend(),
                report.elapsed
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
