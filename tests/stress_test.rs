//! Stress tests for the kairos executor

use kairos::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_many_small_tasks() {
    let executor: Executor<u64> = Executor::with_workers(8).unwrap();

    let futures: Vec<_> = (0..100_000u64)
        .map(|i| executor.submit(move |_| Ok(i * 2)))
        .collect();

    let sum: u64 = futures.iter().map(|f| f.wait().unwrap()).sum();
    assert_eq!(sum, 99_999 * 100_000);

    executor.shutdown();
    assert_eq!(executor.metrics().tasks_completed, 100_000);
}

#[test]
#[ignore]
fn stress_test_many_submitters() {
    let executor: Arc<Executor<usize>> = Arc::new(Executor::with_workers(4).unwrap());
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let executor = executor.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let counter = counter.clone();
                    let future = executor.submit(move |_| {
                        Ok(counter.fetch_add(1, Ordering::Relaxed))
                    });
                    executor.remove_future(future.id());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    executor.wait_all();
    executor.shutdown();
    assert_eq!(counter.load(Ordering::Relaxed), 16_000);
}

#[test]
#[ignore]
fn stress_test_panic_recovery() {
    let config = Config::builder()
        .num_workers(4)
        .panic_strategy(PanicStrategy::Isolate)
        .build()
        .unwrap();
    let executor: Executor<i32> = Executor::new(config).unwrap();

    for round in 0..50 {
        let futures: Vec<_> = (0..100)
            .map(|i| {
                executor.submit(move |_| {
                    if i % 3 == 0 {
                        panic!("round {} task {}", round, i);
                    }
                    Ok(i)
                })
            })
            .collect();

        for (i, future) in futures.iter().enumerate() {
            assert_eq!(future.wait().is_ok(), i % 3 != 0);
        }
    }

    assert_eq!(executor.num_workers(), 4);
    let ok = executor.submit(|_| Ok(1));
    assert_eq!(ok.wait().unwrap(), 1);
}

#[test]
#[ignore]
fn stress_test_concurrent_cancel_and_complete() {
    let executor: Executor<usize> = Executor::with_workers(4).unwrap();

    for _ in 0..20 {
        let futures: Vec<_> = (0..200)
            .map(|i| {
                executor.submit(move |token| {
                    if token.wait_timeout(Duration::from_micros(50)) {
                        return Err(Cancelled.into());
                    }
                    Ok(i)
                })
            })
            .collect();

        let futures = Arc::new(futures);
        let cancellers: Vec<_> = (0..4)
            .map(|offset| {
                let futures = futures.clone();
                thread::spawn(move || {
                    for future in futures.iter().skip(offset).step_by(4) {
                        future.cancel();
                    }
                })
            })
            .collect();

        for canceller in cancellers {
            canceller.join().unwrap();
        }

        for future in futures.iter() {
            // cancel always beats or loses to completion; never both
            match future.wait() {
                Ok(_) => assert_eq!(future.state(), FutureState::Completed),
                Err(e) => {
                    assert!(e.is_cancelled());
                    assert_eq!(future.state(), FutureState::Cancelled);
                }
            }
        }
    }
}

#[test]
#[ignore]
fn stress_test_shutdown_races_submitters() {
    for _ in 0..20 {
        let executor: Arc<Executor<u32>> = Arc::new(Executor::with_workers(2).unwrap());
        let collected = Arc::new(Mutex::new(Vec::new()));

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let executor = executor.clone();
                let collected = collected.clone();
                thread::spawn(move || {
                    for i in 0..500u32 {
                        let future = executor.submit(move |token| {
                            token.wait_timeout(Duration::from_micros(100));
                            Ok(i)
                        });
                        collected.lock().push(future);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(2));
        executor.shutdown();

        for submitter in submitters {
            submitter.join().unwrap();
        }

        for future in collected.lock().iter() {
            assert!(future.is_ready(), "future left pending after shutdown");
            if let Err(e) = future.get() {
                assert!(e.is_shutting_down() || e.is_cancelled(), "unexpected {}", e);
            }
        }
    }
}
