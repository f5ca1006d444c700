//! Artifact cache keys and recording into object storage.

use std::cell::Cell;
use std::sync::Arc;

use accretion_core::domain::{artifact_key, ArtifactManifest, PackageVersion, Requirement};
use accretion_core::{
    compute_key, parse_install_log, AccretionError, ArtifactBuild, ArtifactRecorder,
};
use accretion_state::fakes::MemoryObjectStore;
use accretion_state::ObjectStore;

const REGION: &str = "us-east-1";
const BUCKET: &str = "accretion-artifacts";

fn installed() -> Vec<PackageVersion> {
    vec![
        PackageVersion::new("attrs", "19.1.0"),
        PackageVersion::new("boto3", "1.9.169"),
        PackageVersion::new("Click", "7.0"),
    ]
}

fn build(force_new: bool) -> ArtifactBuild {
    ArtifactBuild {
        project_name: "proj".to_string(),
        requirements: vec![Requirement::new("boto3", "")],
        installed: installed(),
        runtime: "python3.7".to_string(),
        force_new,
    }
}

// ===========================================================================
// cache keys
// ===========================================================================

#[test]
fn test_install_order_does_not_matter() {
    let expected = compute_key(&installed(), "python3.7", false);
    let base = installed();
    let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in permutations {
        let shuffled: Vec<PackageVersion> = order.iter().map(|i| base[*i].clone()).collect();
        assert_eq!(compute_key(&shuffled, "python3.7", false), expected);
    }
}

#[test]
fn test_forced_keys_are_unique() {
    let normal = compute_key(&installed(), "python3.7", false);
    let forced_a = compute_key(&installed(), "python3.7", true);
    let forced_b = compute_key(&installed(), "python3.7", true);
    assert_ne!(forced_a, normal);
    assert_ne!(forced_a, forced_b);
}

#[test]
fn test_key_from_install_log_matches_known_packages() {
    let log = "Successfully installed Click-7.0 boto3-1.9.169 attrs-19.1.0\n";
    assert_eq!(
        compute_key(&parse_install_log(log), "python3.7", false).to_hex(),
        "1bc5ba4efa0d961968ef174f757fea03629a0fa1fd8817ce5d5a1ee182270c44"
    );
}

// ===========================================================================
// recording
// ===========================================================================

#[tokio::test]
async fn test_first_build_uploads_archive_then_manifest() {
    let objects = Arc::new(MemoryObjectStore::new());
    let recorder = ArtifactRecorder::new(objects.clone(), REGION, BUCKET);

    let recorded = recorder
        .record(&build(false), || Ok(b"zip".to_vec()))
        .await
        .unwrap();

    assert!(!recorded.reused_manifest);
    assert!(recorded.uploaded_archive);
    assert_eq!(objects.put_calls(), 2);
    let hex = recorded.cache_key.to_hex();
    assert_eq!(recorded.manifest.artifact_key, artifact_key("proj", &hex));
    assert_eq!(recorded.manifest.runtimes, vec!["python3.7".to_string()]);
    assert_eq!(recorded.manifest.cache_key, hex);

    let stored = objects
        .get_object(REGION, BUCKET, &recorded.manifest_key)
        .await
        .unwrap();
    let parsed = ArtifactManifest::from_json_bytes(&stored, &recorded.manifest_key).unwrap();
    assert_eq!(parsed, recorded.manifest);
    let mut sorted = installed();
    sorted.sort();
    assert_eq!(parsed.installed, sorted);
}

#[tokio::test]
async fn test_existing_manifest_is_reused_without_packaging() {
    let objects = Arc::new(MemoryObjectStore::new());
    let recorder = ArtifactRecorder::new(objects.clone(), REGION, BUCKET);
    let first = recorder
        .record(&build(false), || Ok(b"zip".to_vec()))
        .await
        .unwrap();

    let packaged = Cell::new(false);
    let second = recorder
        .record(&build(false), || {
            packaged.set(true);
            Ok(b"zip".to_vec())
        })
        .await
        .unwrap();

    assert!(!packaged.get());
    assert!(second.reused_manifest);
    assert_eq!(second.manifest, first.manifest);
    assert_eq!(objects.put_calls(), 2);
}

#[tokio::test]
async fn test_present_archive_is_not_uploaded_again() {
    let objects = Arc::new(MemoryObjectStore::new());
    let hex = compute_key(&installed(), "python3.7", false).to_hex();
    objects.insert(REGION, BUCKET, &artifact_key("proj", &hex), "earlier zip");
    let recorder = ArtifactRecorder::new(objects.clone(), REGION, BUCKET);

    let recorded = recorder
        .record(&build(false), || {
            Err(AccretionError::Internal("should not package".into()))
        })
        .await
        .unwrap();

    assert!(!recorded.uploaded_archive);
    assert_eq!(objects.put_calls(), 1, "only the manifest is written");
}

#[tokio::test]
async fn test_forced_build_records_a_new_artifact() {
    let objects = Arc::new(MemoryObjectStore::new());
    let recorder = ArtifactRecorder::new(objects.clone(), REGION, BUCKET);
    let first = recorder
        .record(&build(false), || Ok(b"zip".to_vec()))
        .await
        .unwrap();
    let forced = recorder
        .record(&build(true), || Ok(b"zip2".to_vec()))
        .await
        .unwrap();

    assert!(!forced.reused_manifest);
    assert_ne!(forced.manifest_key, first.manifest_key);
    assert_eq!(objects.put_calls(), 4);
}

#[tokio::test]
async fn test_packaging_failure_writes_nothing() {
    let objects = Arc::new(MemoryObjectStore::new());
    let recorder = ArtifactRecorder::new(objects.clone(), REGION, BUCKET);

    let err = recorder
        .record(&build(false), || {
            Err(AccretionError::Internal("zip failed".into()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AccretionError::Internal(_)));
    assert!(objects.keys(REGION, BUCKET).is_empty());
}
