//! Tests specifically for miri

#![cfg(miri)]

use std::sync::Arc;
use std::thread;

use drover::fib::Fibonacci;
use drover::*;
use tracing::info;

// Grows the deque through several retired buffers while a thief reads from
// whichever buffer is current.
#[test]
fn deque_growth_with_thief() {
    let deque = Arc::new(Deque::<usize>::with_capacity(2));

    let thief = {
        let deque = deque.clone();
        thread::spawn(move || {
            let mut stolen = 0;
            for _ in 0..64 {
                if deque.steal().success().is_some() {
                    stolen += 1;
                }
            }
            stolen
        })
    };

    for item in 0..32 {
        deque.push(item);
    }
    let mut popped = 0;
    while deque.pop().is_some() {
        popped += 1;
    }

    let stolen = thief.join().unwrap();
    info!(popped, stolen, "drained deque");
    assert_eq!(popped + stolen, 32);
}

#[test]
fn fibonacci_on_both_backends() {
    for backend in [BackendKind::Dag, BackendKind::Frames] {
        let runtime = Runtime::new(Config::new(2).with_backend(backend)).unwrap();
        let report = runtime.run(&Fibonacci(6)).unwrap();
        assert_eq!(report.output, Some(8));
    }
}
