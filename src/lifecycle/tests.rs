use super::*;
use crate::concurrency::DisposalState;
use crate::error::DisposeError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Records the order of teardown steps.
#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<&'static str>>,
    fail_managed: bool,
    managed: AtomicUsize,
    unmanaged: AtomicUsize,
}

impl Recorder {
    fn failing() -> Self {
        Self {
            fail_managed: true,
            ..Self::default()
        }
    }

    fn log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

impl Resource for Recorder {
    fn release_managed(&self) -> anyhow::Result<()> {
        self.managed.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("managed");
        if self.fail_managed {
            anyhow::bail!("flush failed");
        }
        Ok(())
    }

    fn release_unmanaged(&self) {
        self.unmanaged.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("unmanaged");
    }
}

/// Counts backstop releases from drop glue.
struct RawHandle {
    freed: Arc<AtomicUsize>,
}

impl Resource for RawHandle {
    fn release_unmanaged(&self) {
        self.freed.fetch_add(1, Ordering::SeqCst);
    }

    const NEEDS_FINALIZER: bool = true;
}

#[test]
fn teardown_order_is_managed_then_unmanaged() {
    let d = Disposable::untracked(Recorder::default());
    d.dispose().unwrap();
    assert_eq!(d.get().err().map(|e| e.is_disposed()), Some(true));
    assert_eq!(d.lifecycle().state(), DisposalState::Disposed);
    assert_eq!(d.resource_for_tests().log(), ["managed", "unmanaged"]);
}

#[test]
fn failing_managed_release_still_runs_unmanaged() {
    let d = Disposable::untracked(Recorder::failing());
    let err = d.dispose().unwrap_err();
    assert!(matches!(err, DisposeError::Teardown { .. }));
    assert!(err.to_string().contains("flush failed"));
    assert_eq!(d.resource_for_tests().log(), ["managed", "unmanaged"]);

    // Second call is a silent no-op, not a retry.
    d.dispose().unwrap();
    assert_eq!(d.resource_for_tests().managed.load(Ordering::SeqCst), 1);
    assert_eq!(d.resource_for_tests().unmanaged.load(Ordering::SeqCst), 1);
}

#[test]
fn hundred_threads_one_teardown() {
    let d = Disposable::untracked(Recorder::default());
    let barrier = Barrier::new(100);
    thread::scope(|s| {
        for _ in 0..100 {
            s.spawn(|| {
                barrier.wait();
                d.dispose().unwrap();
            });
        }
    });
    assert_eq!(d.resource_for_tests().managed.load(Ordering::SeqCst), 1);
    assert_eq!(d.resource_for_tests().unmanaged.load(Ordering::SeqCst), 1);
}

#[test]
fn dispose_waits_for_a_long_busy_scope() {
    let d = Disposable::untracked(Recorder::default());
    let entered = Barrier::new(2);
    let began = Instant::now();
    thread::scope(|s| {
        s.spawn(|| {
            d.run(|_| {
                entered.wait();
                thread::sleep(Duration::from_millis(1000));
            })
            .unwrap();
        });
        entered.wait();
        thread::sleep(Duration::from_millis(16));
        d.dispose().unwrap();
        assert!(began.elapsed() >= Duration::from_millis(1000));
    });
}

#[test]
fn in_flight_work_sees_a_live_entity_while_dispose_drains() {
    let d = Disposable::untracked(Recorder::default());
    let entered = Barrier::new(2);
    let dispose_started = AtomicBool::new(false);
    thread::scope(|s| {
        let worker = s.spawn(|| {
            d.run(|res| {
                entered.wait();
                while !dispose_started.load(Ordering::SeqCst) {
                    thread::yield_now();
                }
                thread::sleep(Duration::from_millis(100));
                let nested = d.busy_token().map(BusyToken::release);
                (
                    d.is_disposed(),
                    d.lifecycle().ensure_not_disposed().is_ok(),
                    matches!(nested, Ok(Ok(()))),
                    res.managed.load(Ordering::SeqCst),
                )
            })
        });
        entered.wait();
        thread::sleep(Duration::from_millis(16));
        dispose_started.store(true, Ordering::SeqCst);
        d.dispose().unwrap();

        let seen = worker.join().unwrap().unwrap();
        assert_eq!(seen, (false, true, true, 0));
    });

    // The drain is over; new work from another thread fails fast.
    thread::scope(|s| {
        let late = s.spawn(|| d.busy_token().map(drop));
        assert!(late.join().unwrap().unwrap_err().is_disposed());
    });
    assert_eq!(d.resource_for_tests().managed.load(Ordering::SeqCst), 1);
}

#[test]
fn work_started_after_claim_fails_fast() {
    let d = Disposable::untracked(Recorder::default());
    d.dispose().unwrap();
    assert!(d.run(|_| ()).unwrap_err().is_disposed());
    assert!(d.busy_token().unwrap_err().is_disposed());
    assert!(d.lifecycle().enter_busy().unwrap_err().is_disposed());
}

#[test]
fn busy_work_racing_dispose_never_overlaps_teardown() {
    let d = Disposable::untracked(Recorder::default());
    let torn_down = AtomicBool::new(false);
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| loop {
                let ok = d.run(|_| {
                    assert!(!torn_down.load(Ordering::SeqCst));
                    thread::yield_now();
                });
                if ok.is_err() {
                    break;
                }
            });
        }
        thread::sleep(Duration::from_millis(20));
        d.lifecycle()
            .dispose(
                || {
                    torn_down.store(true, Ordering::SeqCst);
                    Ok(())
                },
                || {},
            )
            .unwrap();
    });
    assert!(torn_down.load(Ordering::SeqCst));
}

#[test]
fn finalizer_backstop_runs_only_when_undisposed() {
    let freed = Arc::new(AtomicUsize::new(0));
    drop(Disposable::untracked(RawHandle { freed: freed.clone() }));
    assert_eq!(freed.load(Ordering::SeqCst), 1);

    let explicit = Disposable::untracked(RawHandle { freed: freed.clone() });
    explicit.dispose().unwrap();
    assert_eq!(freed.load(Ordering::SeqCst), 2);
    drop(explicit);
    assert_eq!(freed.load(Ordering::SeqCst), 2);
}

#[test]
fn finalize_runs_only_the_unmanaged_step_once() {
    let lifecycle = Lifecycle::untracked::<RawHandle>();
    let managed_ran = AtomicBool::new(false);
    let freed = AtomicUsize::new(0);

    lifecycle.finalize(|| {
        freed.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(lifecycle.state(), DisposalState::Disposed);

    // Neither a second backstop nor a late explicit dispose runs anything.
    lifecycle.finalize(|| {
        freed.fetch_add(1, Ordering::SeqCst);
    });
    lifecycle
        .dispose(
            || {
                managed_ran.store(true, Ordering::SeqCst);
                Ok(())
            },
            || {
                freed.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
    assert_eq!(freed.load(Ordering::SeqCst), 1);
    assert!(!managed_ran.load(Ordering::SeqCst));
}

#[test]
fn no_finalizer_means_drop_does_nothing() {
    let d = Disposable::untracked(Recorder::default());
    drop(d);
}

#[test]
fn embedded_lifecycle_composes() {
    struct Pool {
        lifecycle: Lifecycle,
        closed: AtomicBool,
    }

    impl Pool {
        fn checkout(&self) -> Result<(), DisposeError> {
            self.lifecycle.ensure_not_disposed()?;
            Ok(())
        }
    }

    impl Dispose for Pool {
        fn dispose(&self) -> Result<(), DisposeError> {
            self.lifecycle.dispose(
                || {
                    self.closed.store(true, Ordering::SeqCst);
                    Ok(())
                },
                || {},
            )
        }

        fn is_disposed(&self) -> bool {
            self.lifecycle.is_disposed()
        }
    }

    let pool = Pool {
        lifecycle: Lifecycle::untracked::<Pool>(),
        closed: AtomicBool::new(false),
    };
    pool.checkout().unwrap();
    pool.dispose().unwrap();
    assert!(pool.closed.load(Ordering::SeqCst));
    assert!(pool.checkout().is_err());
    assert!(pool.lifecycle.type_name().ends_with("Pool"));
}

#[test]
fn ref_counted_needs_k_plus_one_disposes() {
    let rc = RefCounted::untracked(Recorder::default());
    for _ in 0..99 {
        rc.add_reference().unwrap();
    }
    assert_eq!(rc.reference_count(), 100);
    for _ in 0..99 {
        rc.dispose().unwrap();
        assert!(!rc.is_disposed());
    }
    rc.dispose().unwrap();
    assert!(rc.is_disposed());

    // Extra calls are absorbed.
    rc.dispose().unwrap();
    rc.dispose().unwrap();
    assert_eq!(rc.inner_for_tests().managed.load(Ordering::SeqCst), 1);
    assert!(rc.add_reference().unwrap_err().is_disposed());
}

#[test]
fn reference_token_decrements_once() {
    let rc = Arc::new(RefCounted::untracked(Recorder::default()));
    let token = rc.create_reference_token().unwrap();
    assert_eq!(rc.reference_count(), 2);
    for _ in 0..10 {
        token.release().unwrap();
    }
    assert_eq!(rc.reference_count(), 1);
    assert!(!rc.is_disposed());
    drop(token);
    assert_eq!(rc.reference_count(), 1);

    rc.dispose().unwrap();
    assert!(rc.is_disposed());
}

#[test]
fn dropped_reference_token_gives_back_its_reference() {
    let rc = Arc::new(RefCounted::untracked(Recorder::default()));
    {
        let _token = rc.create_reference_token().unwrap();
        assert_eq!(rc.reference_count(), 2);
    }
    assert_eq!(rc.reference_count(), 1);
}

#[test]
fn last_token_holder_tears_down() {
    let rc = Arc::new(RefCounted::untracked(Recorder::default()));
    let tokens: Vec<_> = (0..16).map(|_| rc.create_reference_token().unwrap()).collect();
    rc.dispose().unwrap();
    assert!(!rc.is_disposed());

    thread::scope(|s| {
        for token in &tokens {
            s.spawn(move || token.release().unwrap());
        }
    });
    assert!(rc.is_disposed());
    assert_eq!(rc.inner_for_tests().managed.load(Ordering::SeqCst), 1);
}

impl<T: Resource> Disposable<T> {
    fn resource_for_tests(&self) -> &T {
        &self.resource
    }
}

impl<T: Resource> RefCounted<T> {
    fn inner_for_tests(&self) -> &T {
        self.inner.resource_for_tests()
    }
}
