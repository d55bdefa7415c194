//! Scheduler contract: never before the delay, at most once, cancel
//! wins races it starts ahead of, stop drains in-flight work.

use parking_lot::Mutex;
use spindle::test_utils::init_test_logging;
use spindle::{CoreError, Scheduler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn tasks_never_run_before_their_delay() {
    init_test_logging();
    spindle::test_phase!("tasks_never_run_before_their_delay");

    let scheduler = Scheduler::start("sched-test".to_string());
    let log: Arc<Mutex<Vec<(u64, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    let scheduled_at = Instant::now();
    for millis in [60u64, 10, 35, 10, 80] {
        let sink = Arc::clone(&log);
        scheduler
            .schedule(
                move || sink.lock().push((millis, Instant::now())),
                Duration::from_millis(millis),
            )
            .expect("schedule");
    }

    assert!(wait_for(|| log.lock().len() == 5, Duration::from_secs(3)));
    for (millis, ran_at) in log.lock().iter() {
        assert!(
            *ran_at >= scheduled_at + Duration::from_millis(*millis),
            "task with {millis}ms delay ran early"
        );
    }

    // Runs happen in deadline order, equal delays in submission order.
    let delays: Vec<u64> = log.lock().iter().map(|(d, _)| *d).collect();
    assert_eq!(delays, vec![10, 10, 35, 60, 80]);

    scheduler.stop();
    spindle::test_complete!("tasks_never_run_before_their_delay");
}

#[test]
fn each_task_runs_at_most_once() {
    init_test_logging();
    spindle::test_phase!("each_task_runs_at_most_once");

    let scheduler = Scheduler::start("sched-test".to_string());
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let c = Arc::clone(&count);
        scheduler
            .schedule(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_millis(10),
            )
            .expect("schedule");
    }

    assert!(wait_for(
        || count.load(Ordering::SeqCst) == 50,
        Duration::from_secs(3)
    ));
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(count.load(Ordering::SeqCst), 50, "a task ran twice");

    scheduler.stop();
    spindle::test_complete!("each_task_runs_at_most_once");
}

#[test]
fn cancellation_prevents_an_unstarted_run() {
    init_test_logging();
    spindle::test_phase!("cancellation_prevents_an_unstarted_run");

    let scheduler = Scheduler::start("sched-test".to_string());
    let count = Arc::new(AtomicUsize::new(0));

    let c = Arc::clone(&count);
    let handle = scheduler
        .schedule(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(80),
        )
        .expect("schedule");

    handle.cancel();
    std::thread::sleep(Duration::from_millis(160));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    scheduler.stop();
    spindle::test_complete!("cancellation_prevents_an_unstarted_run");
}

#[test]
fn stop_rejects_new_work_and_drains_in_flight() {
    init_test_logging();
    spindle::test_phase!("stop_rejects_new_work_and_drains_in_flight");

    let scheduler = Scheduler::start("sched-test".to_string());
    let finished = Arc::new(AtomicUsize::new(0));

    // An in-flight task that outlives the stop() call.
    let f = Arc::clone(&finished);
    scheduler
        .schedule(
            move || {
                std::thread::sleep(Duration::from_millis(120));
                f.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(5),
        )
        .expect("schedule");

    // Let it start, then stop while it sleeps.
    std::thread::sleep(Duration::from_millis(40));
    scheduler.stop();

    // stop() joined the timer thread, so the in-flight task completed.
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    let err = scheduler
        .schedule(|| {}, Duration::from_millis(1))
        .expect_err("stopped scheduler accepts no work");
    assert!(matches!(err, CoreError::Shutdown(_)));

    spindle::test_complete!("stop_rejects_new_work_and_drains_in_flight");
}
