//! Lock Manager Tests
//!
//! - Fail-fast and waiting acquisition
//! - At most one holder per tree under any sequence of calls
//! - Contention across threads

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use crate::common::*;

// ============================================================================
// Acquire / release
// ============================================================================

#[test]
fn lock_unlock_handoff() {
    let locks = LockManager::new();
    let s1 = SessionId::from("s1");
    let s2 = SessionId::from("s2");

    locks.acquire(CANDIDATE, &s1).unwrap();
    let err = locks.acquire(CANDIDATE, &s2).unwrap_err();
    assert!(matches!(err, CfgdError::AlreadyLocked { ref holder, .. } if *holder == s1));
    locks.release(CANDIDATE, &s1).unwrap();
    locks.acquire(CANDIDATE, &s2).unwrap();
    assert_eq!(locks.holder(CANDIDATE), Some(s2));
}

#[test]
fn trees_lock_independently() {
    let locks = LockManager::new();
    locks.acquire(CANDIDATE, &SessionId::from("s1")).unwrap();
    locks.acquire(RUNNING, &SessionId::from("s2")).unwrap();
    assert_eq!(locks.locks().len(), 2);
}

#[test]
fn waiting_lock_gets_handoff() {
    init_tracing();
    let engine = Arc::new(
        EngineContext::open(
            EngineConfig {
                lock_wait_ms: 5_000,
                ..EngineConfig::default()
            },
            Arc::new(MemoryTreeStore::new()),
            ParticipantRegistry::new(),
        )
        .unwrap(),
    );
    let s1 = engine.session_with_id("s1");
    engine.lock(&s1).unwrap();

    let waiter = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let s2 = engine.session_with_id("s2");
            engine.lock(&s2).map(|()| engine.is_locked())
        })
    };
    thread::sleep(Duration::from_millis(50));
    engine.unlock(&s1).unwrap();

    let holder = waiter.join().unwrap().unwrap();
    assert_eq!(holder, Some(SessionId::from("s2")));
}

#[test]
fn waiting_lock_times_out() {
    let locks = LockManager::new();
    let s1 = SessionId::from("s1");
    locks.acquire(CANDIDATE, &s1).unwrap();
    let err = locks
        .acquire_with(
            CANDIDATE,
            &SessionId::from("s2"),
            LockPolicy::Wait(Duration::from_millis(30)),
        )
        .unwrap_err();
    assert!(matches!(err, CfgdError::LockTimeout { ref holder, .. } if *holder == s1));
    assert_eq!(locks.holder(CANDIDATE), Some(s1));
}

#[test]
fn contended_acquire_has_one_winner() {
    const THREADS: usize = 8;
    let locks = Arc::new(LockManager::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                locks.acquire(CANDIDATE, &SessionId::from(format!("s{}", i))).is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

// ============================================================================
// Single-holder invariant
// ============================================================================

#[derive(Debug, Clone)]
enum LockOp {
    Acquire(u8, u8),
    Release(u8, u8),
    ReleaseAll(u8),
}

fn arb_op() -> impl Strategy<Value = LockOp> {
    prop_oneof![
        (0u8..2, 0u8..4).prop_map(|(t, s)| LockOp::Acquire(t, s)),
        (0u8..2, 0u8..4).prop_map(|(t, s)| LockOp::Release(t, s)),
        (0u8..4).prop_map(LockOp::ReleaseAll),
    ]
}

proptest! {
    #[test]
    fn at_most_one_holder(ops in prop::collection::vec(arb_op(), 1..64)) {
        let locks = LockManager::new();
        let trees = [CANDIDATE, RUNNING];
        // model of who should hold each tree
        let mut model: [Option<u8>; 2] = [None, None];
        let session = |s: u8| SessionId::from(format!("s{}", s));

        for op in ops {
            match op {
                LockOp::Acquire(t, s) => {
                    let ok = locks.acquire(trees[t as usize], &session(s)).is_ok();
                    let expected = model[t as usize].map_or(true, |h| h == s);
                    prop_assert_eq!(ok, expected);
                    if ok {
                        model[t as usize] = Some(s);
                    }
                }
                LockOp::Release(t, s) => {
                    let ok = locks.release(trees[t as usize], &session(s)).is_ok();
                    prop_assert_eq!(ok, model[t as usize] == Some(s));
                    if ok {
                        model[t as usize] = None;
                    }
                }
                LockOp::ReleaseAll(s) => {
                    locks.release_all(&session(s));
                    for held in model.iter_mut() {
                        if *held == Some(s) {
                            *held = None;
                        }
                    }
                }
            }

            let held = locks.locks();
            for tree in trees {
                prop_assert!(held.iter().filter(|l| l.tree == tree).count() <= 1);
            }
            for (i, tree) in trees.iter().enumerate() {
                prop_assert_eq!(locks.holder(tree), model[i].map(session));
            }
        }
    }
}
