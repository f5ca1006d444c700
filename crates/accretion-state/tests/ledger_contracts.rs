//! Ledger persistence contracts, exercised through both stores.

use accretion_state::fakes::MemoryLedgerStore;
use accretion_state::{
    DeploymentLedger, FsLedgerStore, LedgerStore, LoadMode, StackId, StackSlot, StateError,
};

fn mixed_ledger() -> DeploymentLedger {
    let mut ledger =
        DeploymentLedger::with_regions(["us-east-1", "eu-west-1", "ap-northeast-1"]).unwrap();
    let east = ledger.region_mut("us-east-1").unwrap();
    east.assign("us-east-1", StackSlot::Core, StackId::new("Accretion-core-e"))
        .unwrap();
    east.assign(
        "us-east-1",
        StackSlot::LayerBuilder,
        StackId::new("Accretion-layer-e"),
    )
    .unwrap();
    ledger
        .region_mut("eu-west-1")
        .unwrap()
        .assign("eu-west-1", StackSlot::Core, StackId::new("Accretion-core-w"))
        .unwrap();
    ledger
}

fn assert_round_trip(store: &dyn LedgerStore) {
    let ledger = mixed_ledger();
    ledger.save(store).unwrap();
    let loaded = DeploymentLedger::load(store, LoadMode::Existing).unwrap();
    assert_eq!(loaded, ledger);

    // Unset slots come back unset.
    let east = loaded.region("us-east-1").unwrap();
    assert!(!east.is_set(StackSlot::ArtifactBuilder));
    assert!(loaded.region("ap-northeast-1").unwrap().is_empty());

    // Saving what was loaded reproduces the same bytes.
    let before = store.read().unwrap().unwrap();
    loaded.save(store).unwrap();
    assert_eq!(store.read().unwrap().unwrap(), before);
}

#[test]
fn round_trip_through_memory_store() {
    let store = MemoryLedgerStore::new();
    assert_round_trip(&store);
    assert_eq!(store.write_count(), 2);
}

#[test]
fn round_trip_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    assert_round_trip(&FsLedgerStore::new(dir.path().join("deployment.json")));
}

#[test]
fn persisted_form_is_sparse() {
    let store = MemoryLedgerStore::new();
    mixed_ledger().save(&store).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&store.bytes().unwrap()).unwrap();

    assert_eq!(value["Deployments"]["ap-northeast-1"], serde_json::json!({}));
    assert_eq!(
        value["Deployments"]["us-east-1"],
        serde_json::json!({ "Core": "Accretion-core-e", "LayerBuilder": "Accretion-layer-e" })
    );
}

#[test]
fn unknown_top_level_field_is_corrupt() {
    let store = MemoryLedgerStore::with_bytes(r#"{ "Deployments": {}, "Extra": 1 }"#);
    let err = DeploymentLedger::load(&store, LoadMode::Existing).unwrap_err();
    assert!(matches!(err, StateError::Corrupt { .. }));
}

#[test]
fn invalid_region_in_file_is_corrupt() {
    let store = MemoryLedgerStore::with_bytes(r#"{ "Deployments": { "Bad Region": {} } }"#);
    let err = DeploymentLedger::load(&store, LoadMode::CreateIfMissing).unwrap_err();
    assert!(matches!(err, StateError::Corrupt { .. }));
}

#[test]
fn missing_deployments_key_loads_empty() {
    let store = MemoryLedgerStore::with_bytes("{}");
    let ledger = DeploymentLedger::load(&store, LoadMode::Existing).unwrap();
    assert!(ledger.is_empty());
}

#[test]
fn replace_region_requires_registration() {
    let mut ledger = mixed_ledger();
    let err = ledger
        .replace_region("me-south-1", Default::default())
        .unwrap_err();
    assert!(matches!(err, StateError::UnknownRegion(_)));

    ledger
        .replace_region("us-east-1", Default::default())
        .unwrap();
    assert!(ledger.region("us-east-1").unwrap().is_empty());
}
