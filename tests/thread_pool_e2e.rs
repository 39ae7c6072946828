//! End-to-end scenarios for the thread pool.
//!
//! Run with: `cargo test --test thread_pool_e2e`

use spindle::suspend::{move_to, yield_now};
use spindle::{Fibre, Scheduler, SchedulerParams, SchedulerType, ThreadPool, ThreadPoolParams};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn pool_params(worker_count: Option<i32>, queue_size: usize) -> ThreadPoolParams {
    ThreadPoolParams {
        scheduler: SchedulerParams {
            initial_queue_size: queue_size,
            ..SchedulerParams::default()
        },
        worker_count,
        idle_sleep_duration: Duration::from_millis(1),
    }
}

fn await_counter(counter: &AtomicUsize, expected: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while counter.load(Ordering::SeqCst) < expected {
        assert!(
            Instant::now() < deadline,
            "counter stuck at {} of {expected}",
            counter.load(Ordering::SeqCst)
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn workers_drain_a_thousand_fibres() {
    init_test_logging();
    let pool = ThreadPool::new(pool_params(Some(4), 2048));
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..1000 {
        let counted = counter.clone();
        pool.start(
            Fibre::new(async move {
                yield_now().await;
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            0,
            "",
        );
    }

    pool.wait(Some(Duration::from_secs(5)));
    await_counter(&counter, 1000, Duration::from_secs(5));
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
    assert!(pool.empty());
}

#[test]
fn zero_workers_leave_fibres_until_caller_drives() {
    init_test_logging();
    let pool = ThreadPool::new(pool_params(Some(0), 2048));
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..1000 {
        let counted = counter.clone();
        pool.start(
            Fibre::new(async move {
                yield_now().await;
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            0,
            "",
        );
    }

    assert!(!pool.wait(Some(Duration::from_millis(100))));
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    pool.update_for(Duration::from_secs(5));
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
    assert!(pool.empty());
}

#[test]
fn start_blocks_on_backpressure_until_workers_catch_up() {
    init_test_logging();
    let pool = ThreadPool::new(pool_params(Some(2), 16));
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..64 {
        let counted = counter.clone();
        pool.start(
            Fibre::new(async move {
                yield_now().await;
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            0,
            "",
        );
    }
    await_counter(&counter, 64, Duration::from_secs(5));
}

#[test]
fn fibre_migrates_from_scheduler_to_pool_and_back() {
    init_test_logging();
    let mut scheduler = Scheduler::new(SchedulerParams::default());
    let scheduler_handle = scheduler.handle();
    let pool = ThreadPool::new(pool_params(Some(2), 256));
    let pool_endpoint = pool.move_endpoint();

    let visited_pool = Arc::new(AtomicBool::new(false));
    let flag = visited_pool.clone();
    let id = scheduler.start(
        Fibre::new(async move {
            move_to(&pool_endpoint, None).await;
            flag.store(true, Ordering::SeqCst);
            move_to(&scheduler_handle, None).await;
        }),
        0,
        "commuter",
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut epoch = 0.0;
    while id.running() {
        assert!(Instant::now() < deadline, "fibre never completed the round trip");
        scheduler.update_with(epoch);
        epoch += 0.001;
        thread::sleep(Duration::from_millis(1));
    }

    assert!(visited_pool.load(Ordering::SeqCst));
    assert!(scheduler.empty());
    assert!(pool.empty());
}

#[test]
fn migration_priority_override_applies_on_arrival() {
    init_test_logging();
    let pool = ThreadPool::new(ThreadPoolParams {
        scheduler: SchedulerParams {
            priority_levels: vec![0, 9],
            ..SchedulerParams::default()
        },
        worker_count: Some(0),
        idle_sleep_duration: Duration::from_millis(1),
    });
    let mut scheduler = Scheduler::new(SchedulerParams::default());
    let endpoint = pool.move_endpoint();

    let id = scheduler.start(
        Fibre::new(async move {
            move_to(&endpoint, Some(9)).await;
            yield_now().await;
        }),
        0,
        "promoted",
    );

    scheduler.update_with(0.0);
    assert!(scheduler.empty());
    assert_eq!(pool.running_count(), 1);

    pool.update(|| true);
    assert!(!id.running());
    assert!(pool.empty());
}

#[test]
fn dropping_the_pool_releases_queued_fibres() {
    init_test_logging();
    let pool = ThreadPool::new(pool_params(Some(0), 256));
    let ids: Vec<_> = (0..8)
        .map(|_| {
            pool.start(
                Fibre::new(async {
                    loop {
                        yield_now().await;
                    }
                }),
                0,
                "",
            )
        })
        .collect();
    drop(pool);
    for id in &ids {
        assert!(!id.running());
    }
}

#[test]
fn pool_reports_worker_count() {
    init_test_logging();
    let pool = ThreadPool::new(pool_params(Some(3), 64));
    assert_eq!(pool.worker_count(), 3);
    let manual = ThreadPool::new(pool_params(Some(0), 64));
    assert_eq!(manual.worker_count(), 0);
}
