//! Commit flow through `EngineContext`
//!
//! - Running is swapped only after every participant committed
//! - Commit-time rebase onto a running tree that moved on
//! - Lock release policies
//! - File-backed persistence across restarts

use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::common::*;

// ============================================================================
// Publish point
// ============================================================================

/// Records whether running already held the target during commit
struct RunningWatcher {
    store: Arc<MemoryTreeStore>,
    saw_new_running: Arc<Mutex<Option<bool>>>,
}

impl Participant for RunningWatcher {
    fn name(&self) -> &str {
        "watcher"
    }

    fn commit(&self, txn: &TransactionContext) -> ParticipantResult {
        let running = self.store.get(RUNNING).map_err(|e| ParticipantError::new(e.to_string()))?;
        *self.saw_new_running.lock() = Some(running.structurally_eq(txn.target()));
        Ok(())
    }
}

#[test]
fn running_is_swapped_after_all_commits() {
    init_tracing();
    let store = Arc::new(MemoryTreeStore::new());
    let saw = Arc::new(Mutex::new(None));
    let mut registry = ParticipantRegistry::new();
    registry
        .register(
            Arc::new(RunningWatcher {
                store: Arc::clone(&store),
                saw_new_running: Arc::clone(&saw),
            }),
            0,
        )
        .unwrap();
    let engine = EngineContext::open(EngineConfig::default(), store, registry).unwrap();
    let s = engine.open_session();
    engine.lock(&s).unwrap();
    add_interface(&engine, &s, "eth1").unwrap();

    let before = engine.running().unwrap();
    engine.commit(&s).unwrap();

    assert_eq!(*saw.lock(), Some(false));
    // readers holding the old snapshot keep seeing it
    assert!(before.is_empty());
    assert!(find_interface(&engine.running().unwrap(), "eth1").is_some());
}

/// Overwrites the stored candidate from inside its commit hook
struct CandidateClobber {
    store: Arc<MemoryTreeStore>,
    committed: Arc<Mutex<Option<ConfigTree>>>,
}

impl Participant for CandidateClobber {
    fn name(&self) -> &str {
        "clobber"
    }

    fn commit(&self, txn: &TransactionContext) -> ParticipantResult {
        *self.committed.lock() = Some(txn.target().clone());
        let mut stray = ConfigTree::new();
        let root = stray.root();
        stray.add_leaf(root, "hostname", "never-validated");
        self.store
            .put(CANDIDATE, stray)
            .map_err(|e| ParticipantError::new(e.to_string()))
    }
}

#[test]
fn running_receives_the_committed_target() {
    init_tracing();
    let store = Arc::new(MemoryTreeStore::new());
    let committed = Arc::new(Mutex::new(None));
    let mut registry = ParticipantRegistry::new();
    registry
        .register(
            Arc::new(CandidateClobber {
                store: Arc::clone(&store),
                committed: Arc::clone(&committed),
            }),
            0,
        )
        .unwrap();
    let engine = EngineContext::open(EngineConfig::default(), store, registry).unwrap();
    let s = engine.open_session();
    engine.lock(&s).unwrap();
    add_interface(&engine, &s, "eth1").unwrap();

    engine.commit(&s).unwrap();

    let running = engine.running().unwrap();
    let committed = committed.lock().take().unwrap();
    assert!(running.structurally_eq(&committed));
    assert!(running.child_by_name(running.root(), &QName::local("hostname")).is_none());
    assert!(engine.candidate().unwrap().structurally_eq(&running));
}

// ============================================================================
// Commit-time rebase
// ============================================================================

fn rebasing_harness() -> Harness {
    let h = Harness::with_config(
        1,
        None,
        EngineConfig {
            rebase_on_commit: true,
            ..EngineConfig::default()
        },
    );
    h.engine.store().put(RUNNING, interfaces_tree(&["eth0"])).unwrap();
    let s = h.engine.session_with_id("bootstrap");
    h.engine.lock(&s).unwrap();
    h.engine.discard_changes(&s).unwrap();
    h
}

#[test]
fn commit_rebases_onto_moved_running() {
    let h = rebasing_harness();
    let s = h.session_with_edit("s1", "eth1");

    // running moves on behind the candidate's back
    let mut moved = interfaces_tree(&["eth0"]);
    add_interface_entry(&mut moved, "eth5");
    h.engine.store().put(RUNNING, moved).unwrap();

    let outcome = h.engine.commit(&s).unwrap();
    assert!(outcome.rebased);

    let running = h.engine.running().unwrap();
    for name in ["eth0", "eth1", "eth5"] {
        assert!(find_interface(&running, name).is_some(), "{name} missing");
    }
    assert!(h.engine.candidate().unwrap().structurally_eq(&running));
}

#[test]
fn commit_conflict_calls_no_participant() {
    let h = rebasing_harness();
    let s = h.engine.session_with_id("s1");
    h.engine.lock(&s).unwrap();
    h.engine
        .edit_candidate(&s, |t| {
            set_mtu(t, "eth0", "9000");
            Ok(())
        })
        .unwrap();
    h.take_trace();

    let mut moved = interfaces_tree(&["eth0"]);
    set_mtu(&mut moved, "eth0", "1400");
    h.engine.store().put(RUNNING, moved.clone()).unwrap();

    match h.engine.commit(&s).unwrap_err() {
        CfgdError::RebaseConflict { paths } => assert_eq!(paths, vec![mtu_path("eth0")]),
        other => panic!("expected RebaseConflict, got {other:?}"),
    }
    assert!(h.take_trace().is_empty());
    assert!(h.engine.running().unwrap().structurally_eq(&moved));
}

/// Keeps the target tree of every run, by kind
struct TargetLog(Arc<Mutex<Vec<(TransactionKind, ConfigTree)>>>);

impl Participant for TargetLog {
    fn name(&self) -> &str {
        "targets"
    }

    fn begin(&self, txn: &TransactionContext) -> ParticipantResult {
        self.0.lock().push((txn.kind(), txn.target().clone()));
        Ok(())
    }
}

#[test]
fn validate_sees_the_rebased_target() {
    init_tracing();
    let targets = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ParticipantRegistry::new();
    registry.register(Arc::new(TargetLog(Arc::clone(&targets))), 0).unwrap();
    let store = Arc::new(MemoryTreeStore::new());
    store.put(RUNNING, interfaces_tree(&["eth0"])).unwrap();
    let engine = EngineContext::open(
        EngineConfig {
            rebase_on_commit: true,
            ..EngineConfig::default()
        },
        store,
        registry,
    )
    .unwrap();
    let s = engine.session_with_id("s1");
    engine.lock(&s).unwrap();
    add_interface(&engine, &s, "eth1").unwrap();

    let mut moved = interfaces_tree(&["eth0"]);
    add_interface_entry(&mut moved, "eth5");
    engine.store().put(RUNNING, moved).unwrap();

    engine.validate(&s).unwrap();
    assert!(engine.commit(&s).unwrap().rebased);

    let targets = targets.lock();
    assert_eq!(targets.len(), 2);
    let (validated_kind, validated) = &targets[0];
    let (committed_kind, committed) = &targets[1];
    assert_eq!(*validated_kind, TransactionKind::Validate);
    assert_eq!(*committed_kind, TransactionKind::Commit);
    assert!(find_interface(validated, "eth5").is_some());
    assert!(validated.structurally_eq(committed));
    assert!(engine.running().unwrap().structurally_eq(committed));
}

#[test]
fn validate_reports_rebase_conflict() {
    let h = rebasing_harness();
    let s = h.engine.session_with_id("s1");
    h.engine.lock(&s).unwrap();
    h.engine
        .edit_candidate(&s, |t| {
            set_mtu(t, "eth0", "9000");
            Ok(())
        })
        .unwrap();
    h.take_trace();

    let mut moved = interfaces_tree(&["eth0"]);
    set_mtu(&mut moved, "eth0", "1400");
    h.engine.store().put(RUNNING, moved).unwrap();

    assert!(matches!(
        h.engine.validate(&s).unwrap_err(),
        CfgdError::RebaseConflict { .. }
    ));
    assert!(h.take_trace().is_empty());
}

#[test]
fn without_rebase_candidate_wins() {
    let h = Harness::new(1, None);
    let s = h.session_with_edit("s1", "eth1");
    h.engine.store().put(RUNNING, interfaces_tree(&["eth5"])).unwrap();

    let outcome = h.engine.commit(&s).unwrap();
    assert!(!outcome.rebased);
    let running = h.engine.running().unwrap();
    assert!(find_interface(&running, "eth1").is_some());
    assert!(find_interface(&running, "eth5").is_none());
}

#[test]
fn rebase_check_reports_conflicts() {
    let h = Harness::new(0, None);
    let store = h.engine.store();
    let base = interfaces_tree(&["eth0"]);
    let mut left = base.clone();
    set_mtu(&mut left, "eth0", "9000");
    let mut right = base.clone();
    set_mtu(&mut right, "eth0", "1400");
    add_interface_entry(&mut right, "eth1");
    store.put("base", base).unwrap();
    store.put("left", left).unwrap();
    store.put("right", right).unwrap();

    let result = h.engine.rebase_check("base", "left", "right").unwrap();
    let conflicts: Vec<_> = result.conflicts().unwrap().iter().cloned().collect();
    assert_eq!(conflicts, vec![mtu_path("eth0")]);
}

// ============================================================================
// Lock policies
// ============================================================================

#[test]
fn release_lock_on_failure() {
    let h = Harness::with_config(
        2,
        Some((2, Phase::Commit)),
        EngineConfig {
            release_lock_on_failure: true,
            ..EngineConfig::default()
        },
    );
    let s = h.session_with_edit("s1", "eth1");
    h.engine.commit(&s).unwrap_err();
    assert_eq!(h.engine.is_locked(), None);
}

#[test]
fn failed_commit_keeps_lock_by_default() {
    let h = Harness::new(2, Some((2, Phase::Validate)));
    let s = h.session_with_edit("s1", "eth1");
    h.engine.commit(&s).unwrap_err();
    assert_eq!(h.engine.is_locked(), Some(SessionId::from("s1")));
    assert_eq!(s.in_flight_txn(), None);
    assert!(s.last_txn().is_some());
}

#[test]
fn implicit_lock_is_refused_when_held() {
    let h = Harness::with_config(
        1,
        None,
        EngineConfig {
            require_lock: false,
            ..EngineConfig::default()
        },
    );
    let holder = h.session_with_edit("s1", "eth1");
    let other = h.engine.session_with_id("s2");
    assert!(matches!(
        h.engine.commit(&other).unwrap_err(),
        CfgdError::NotHolder { .. }
    ));
    h.engine.commit(&holder).unwrap();
}

// ============================================================================
// Persistence
// ============================================================================

fn file_config(dir: &TempDir, persist_startup: bool) -> EngineConfig {
    EngineConfig {
        persist_startup,
        store: StoreConfig {
            backend: "file".to_string(),
            path: Some(dir.path().join("trees")),
        },
        ..EngineConfig::default()
    }
}

#[test]
fn running_survives_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    {
        let engine = EngineContext::from_config(file_config(&dir, false), ParticipantRegistry::new()).unwrap();
        let s = engine.open_session();
        engine.lock(&s).unwrap();
        add_interface(&engine, &s, "eth1").unwrap();
        engine.commit(&s).unwrap();
        add_interface(&engine, &s, "eth2").unwrap();
    }

    let engine = EngineContext::from_config(file_config(&dir, false), ParticipantRegistry::new()).unwrap();
    let running = engine.running().unwrap();
    assert!(find_interface(&running, "eth1").is_some());
    // uncommitted edits are dropped: candidate restarts from running
    assert!(engine.candidate().unwrap().structurally_eq(&running));
}

#[test]
fn startup_seeds_running_after_loss() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    {
        let engine = EngineContext::from_config(file_config(&dir, true), ParticipantRegistry::new()).unwrap();
        let s = engine.open_session();
        engine.lock(&s).unwrap();
        add_interface(&engine, &s, "eth1").unwrap();
        engine.commit(&s).unwrap();
        engine.store().delete(RUNNING).unwrap();
    }

    let engine = EngineContext::from_config(file_config(&dir, true), ParticipantRegistry::new()).unwrap();
    assert!(find_interface(&engine.running().unwrap(), "eth1").is_some());
}
