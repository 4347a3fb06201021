//! Lifecycle invariants
//!
//! - Every `begin` is matched by exactly one `end` or `abort`
//! - Forward phases run in registration order, compensation in reverse
//! - Participants see the transaction's trees, change lists and argument

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use crate::common::*;

fn arb_fail() -> impl Strategy<Value = Option<(usize, Phase)>> {
    let phase = prop_oneof![
        Just(Phase::Begin),
        Just(Phase::Validate),
        Just(Phase::Complete),
        Just(Phase::Commit),
        Just(Phase::CommitDone),
        Just(Phase::End),
        Just(Phase::Abort),
        Just(Phase::Revert),
    ];
    prop::option::of((1usize..=4, phase))
}

/// Per participant: (begins, ends, aborts)
fn terminal_counts(trace: &[String]) -> BTreeMap<String, (usize, usize, usize)> {
    let mut counts = BTreeMap::new();
    for call in trace {
        let call = call.trim_end_matches("->FAIL");
        let (hook, rest) = call.split_once('(').unwrap();
        let name = rest.trim_end_matches(')').to_string();
        let entry = counts.entry(name).or_insert((0, 0, 0));
        match hook {
            "begin" => entry.0 += 1,
            "end" => entry.1 += 1,
            "abort" => entry.2 += 1,
            _ => {}
        }
    }
    counts
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_begin_has_one_terminal_call(
        count in 1usize..=4,
        fail in arb_fail(),
        commit in any::<bool>(),
    ) {
        let h = Harness::new(count, fail);
        let s = h.session_with_edit("s1", "eth1");
        let result = if commit {
            h.engine.commit(&s).map(|_| ())
        } else {
            h.engine.validate(&s).map(|_| ())
        };
        let trace = h.take_trace();

        for (name, (begins, ends, aborts)) in terminal_counts(&trace) {
            prop_assert_eq!(begins, 1, "{} begun {} times: {:?}", name, begins, trace);
            prop_assert_eq!(ends + aborts, 1, "{} terminal calls: {:?}", name, trace);
        }

        // notification failures never change the outcome
        if let Some((at, phase)) = fail {
            let reached = at <= count;
            let fatal = matches!(phase, Phase::Begin | Phase::Validate | Phase::Complete)
                || (commit && phase == Phase::Commit);
            prop_assert_eq!(result.is_err(), reached && fatal, "{:?}", result);
        } else {
            prop_assert!(result.is_ok());
        }
        prop_assert_eq!(
            h.engine.running().unwrap().is_empty(),
            !commit || result.is_err()
        );
    }
}

#[test]
fn begin_failure_aborts_failed_and_earlier_only() {
    let h = Harness::new(3, Some((2, Phase::Begin)));
    let s = h.session_with_edit("s1", "eth1");
    let err = h.engine.validate(&s).unwrap_err();
    assert!(matches!(err, CfgdError::ParticipantFailed { phase: Phase::Begin, .. }));
    assert_eq!(
        h.take_trace(),
        vec!["begin(P1)", "begin(P2)->FAIL", "abort(P2)", "abort(P1)"]
    );
}

#[test]
fn complete_failure_aborts_everyone() {
    let h = Harness::new(3, Some((3, Phase::Complete)));
    let s = h.session_with_edit("s1", "eth1");
    h.engine.commit(&s).unwrap_err();
    let trace = h.take_trace();
    assert_eq!(trace[trace.len() - 3..], ["abort(P3)", "abort(P2)", "abort(P1)"]);
}

#[test]
fn failing_revert_is_reported() {
    init_tracing();
    let trace = Trace::default();
    let mut registry = ParticipantRegistry::new();
    registry
        .register(Arc::new(Recorder::failing("stubborn", Phase::Revert, &trace)), 0)
        .unwrap();
    registry
        .register(Arc::new(Recorder::failing("device", Phase::Commit, &trace)), 1)
        .unwrap();
    let engine = EngineContext::open(
        EngineConfig::default(),
        Arc::new(MemoryTreeStore::new()),
        registry,
    )
    .unwrap();
    let s = engine.open_session();
    engine.lock(&s).unwrap();

    match engine.commit(&s).unwrap_err() {
        CfgdError::CommitFailed { reverted, revert_failed, .. } => {
            assert_eq!(reverted, vec!["stubborn"]);
            assert_eq!(revert_failed, vec!["stubborn"]);
        }
        other => panic!("expected CommitFailed, got {other:?}"),
    }
}

#[test]
fn commit_participant_must_take_compensation() {
    init_tracing();
    let trace = Trace::default();
    let mut registry = ParticipantRegistry::new();
    let device = Recorder::new("device", &trace)
        .with_capabilities(Capabilities::BEGIN | Capabilities::COMMIT);
    let err = registry.register(Arc::new(device), 0).unwrap_err();
    assert!(matches!(err, CfgdError::InvalidConfig(_)));
    assert!(registry.is_empty());

    let device = Recorder::new("device", &trace).with_capabilities(
        Capabilities::BEGIN | Capabilities::COMMIT | Capabilities::COMPENSATION,
    );
    registry.register(Arc::new(device), 0).unwrap();
    registry
        .register(Arc::new(Recorder::failing("p2", Phase::Commit, &trace)), 1)
        .unwrap();
    let engine = EngineContext::open(
        EngineConfig::default(),
        Arc::new(MemoryTreeStore::new()),
        registry,
    )
    .unwrap();
    let s = engine.open_session();
    engine.lock(&s).unwrap();

    match engine.commit(&s).unwrap_err() {
        CfgdError::CommitFailed { reverted, .. } => assert_eq!(reverted, vec!["device"]),
        other => panic!("expected CommitFailed, got {other:?}"),
    }
    assert_eq!(
        *trace.lock(),
        vec![
            "begin(device)",
            "begin(p2)",
            "commit(device)",
            "commit(p2)->FAIL",
            "revert(device)",
            "end(device)",
            "end(p2)",
        ]
    );
}

#[test]
fn unadvertised_hooks_are_skipped() {
    init_tracing();
    let trace = Trace::default();
    let mut registry = ParticipantRegistry::new();
    let validator = Recorder::failing("validator", Phase::Commit, &trace)
        .with_capabilities(Capabilities::BEGIN | Capabilities::VALIDATE | Capabilities::END);
    registry.register(Arc::new(validator), 0).unwrap();
    let engine = EngineContext::open(
        EngineConfig::default(),
        Arc::new(MemoryTreeStore::new()),
        registry,
    )
    .unwrap();
    let s = engine.open_session();
    engine.lock(&s).unwrap();

    // the failing commit hook is never called
    engine.commit(&s).unwrap();
    assert_eq!(
        *trace.lock(),
        vec!["begin(validator)", "validate(validator)", "end(validator)"]
    );
}

// ============================================================================
// What participants see
// ============================================================================

#[derive(Debug, Default, Clone)]
struct Seen {
    txn: Option<TxnId>,
    kind: Option<TransactionKind>,
    session: Option<SessionId>,
    added: Vec<NodePath>,
    deleted: Vec<NodePath>,
    changed: Vec<(NodePath, NodePath)>,
    ticket: Option<String>,
}

struct Inspector(Arc<Mutex<Seen>>);

impl Participant for Inspector {
    fn name(&self) -> &str {
        "inspector"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::VALIDATE
    }

    fn validate(&self, txn: &TransactionContext) -> ParticipantResult {
        let paths = |tree: &ConfigTree, ids: &[NodeId]| -> Vec<NodePath> {
            ids.iter().map(|id| tree.path_of(*id).unwrap()).collect()
        };
        let mut seen = self.0.lock();
        seen.txn = Some(txn.id());
        seen.kind = Some(txn.kind());
        seen.session = Some(txn.session().clone());
        seen.added = paths(txn.target(), txn.added());
        seen.deleted = paths(txn.source(), txn.deleted());
        seen.changed = paths(txn.source(), txn.changed_source())
            .into_iter()
            .zip(paths(txn.target(), txn.changed_target()))
            .collect();
        seen.ticket = txn.arg::<String>().cloned();
        Ok(())
    }
}

#[test]
fn participants_see_change_lists_and_argument() {
    init_tracing();
    let seen = Arc::new(Mutex::new(Seen::default()));
    let mut registry = ParticipantRegistry::new();
    registry.register(Arc::new(Inspector(Arc::clone(&seen))), 0).unwrap();

    let store = Arc::new(MemoryTreeStore::new());
    store.put(RUNNING, interfaces_tree(&["eth0", "eth1"])).unwrap();
    let engine = EngineContext::open(EngineConfig::default(), store, registry).unwrap();
    let s = engine.session_with_id("netconf-7");
    engine.lock(&s).unwrap();
    engine
        .edit_candidate(&s, |t| {
            set_mtu(t, "eth0", "9000");
            let eth1 = find_interface(t, "eth1").unwrap();
            t.remove(eth1);
            add_interface_entry(t, "eth2");
            Ok(())
        })
        .unwrap();

    let ticket: TxnArg = Arc::new("CHG-1042".to_string());
    let id = engine.validate_with(&s, Some(ticket)).unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen.txn, Some(id));
    assert_eq!(seen.kind, Some(TransactionKind::Validate));
    assert_eq!(seen.session, Some(SessionId::from("netconf-7")));
    assert_eq!(seen.added, vec![interface_path("eth2")]);
    assert_eq!(seen.deleted, vec![interface_path("eth1")]);
    assert_eq!(seen.changed, vec![(mtu_path("eth0"), mtu_path("eth0"))]);
    assert_eq!(seen.ticket.as_deref(), Some("CHG-1042"));
}

#[test]
fn transaction_ids_increase_across_runs() {
    let h = Harness::new(1, None);
    let s = h.session_with_edit("s1", "eth1");
    let a = h.engine.validate(&s).unwrap();
    let b = h.engine.validate(&s).unwrap();
    let c = h.engine.commit(&s).unwrap().txn;
    assert!(a < b && b < c);
    let ids: Vec<TxnId> = h.engine.transaction_history().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a, b, c]);
}
