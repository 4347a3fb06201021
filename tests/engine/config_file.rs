//! Opening the engine from `cfgd.toml`

use tempfile::TempDir;

use crate::common::*;

#[test]
fn engine_opens_from_written_default() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    EngineConfig::write_default_if_missing(&path).unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config, EngineConfig::default());
    let engine = EngineContext::from_config(config, ParticipantRegistry::new()).unwrap();
    assert!(engine.running().unwrap().is_empty());
}

#[test]
fn file_backend_from_toml() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let trees = dir.path().join("trees");
    let path = dir.path().join(CONFIG_FILE_NAME);
    let content = format!(
        "lock_wait_ms = 50\nrelease_lock_on_commit = true\n\n[store]\nbackend = \"file\"\npath = {:?}\n",
        trees.to_string_lossy()
    );
    std::fs::write(&path, content).unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.lock_policy(), LockPolicy::Wait(std::time::Duration::from_millis(50)));
    let engine = EngineContext::from_config(config, ParticipantRegistry::new()).unwrap();
    let s = engine.open_session();
    engine.lock(&s).unwrap();
    engine.commit(&s).unwrap();
    assert_eq!(engine.is_locked(), None);
    assert!(trees.join("running.json").exists());
}

#[test]
fn bad_backend_refuses_to_open() {
    let config = EngineConfig {
        store: StoreConfig {
            backend: "etcd".to_string(),
            path: None,
        },
        ..EngineConfig::default()
    };
    let err = EngineContext::open(
        config,
        std::sync::Arc::new(MemoryTreeStore::new()),
        ParticipantRegistry::new(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, CfgdError::InvalidConfig(_)));
}

#[test]
fn duplicate_participant_is_rejected() {
    let trace = Trace::default();
    let mut registry = ParticipantRegistry::new();
    registry
        .register(std::sync::Arc::new(Recorder::new("routing", &trace)), 0)
        .unwrap();
    let err = registry
        .register(std::sync::Arc::new(Recorder::new("routing", &trace)), 1)
        .unwrap_err();
    assert!(matches!(err, CfgdError::InvalidConfig(_)));
}
