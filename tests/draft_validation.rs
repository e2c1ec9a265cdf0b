//! Pre-validation stays within its deadline no matter what the collaborators do.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use slotguard::cache::InMemoryCache;
use slotguard::clock::{Clock, SystemClock};
use slotguard::collaborators::*;
use slotguard::config::{BookingPolicy, ValidationSettings};
use slotguard::engine::Engine;
use slotguard::model::*;
use slotguard::notify::NotifyHub;
use slotguard::validation::{DraftRequest, FindingCode, ValidationOrchestrator};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotguard_test_drafts");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// A directory that never answers.
struct StuckDirectory;

#[async_trait]
impl RequesterDirectory for StuckDirectory {
    async fn lookup_requester(&self, _requester_id: Ulid) -> Result<RequesterSnapshot, CollaboratorError> {
        std::future::pending().await
    }
}

/// A catalog that is down.
struct DownCatalog;

#[async_trait]
impl ResourceCatalog for DownCatalog {
    async fn lookup_resource(&self, _resource: &ResourceRef) -> Result<ResourceSnapshot, CollaboratorError> {
        Err(CollaboratorError::Unavailable("catalog offline".into()))
    }
}

fn validator(
    name: &str,
    catalog: Arc<dyn ResourceCatalog>,
    requesters: Arc<dyn RequesterDirectory>,
    deadline: Duration,
) -> ValidationOrchestrator {
    let clock = Arc::new(SystemClock);
    let collaborators = Collaborators {
        catalog,
        requesters,
        pricing: Arc::new(FlatRatePricing),
        notifier: Arc::new(NotifyHub::new()),
    };
    let engine = Arc::new(
        Engine::new(test_wal_path(name), collaborators, clock.clone(), BookingPolicy::default()).unwrap(),
    );
    let settings = ValidationSettings {
        deadline,
        ..ValidationSettings::default()
    };
    ValidationOrchestrator::new(engine, Arc::new(InMemoryCache::new(clock)), settings)
}

fn next_week() -> Ms {
    SystemClock.now_ms() + 7 * DAY_MS
}

#[tokio::test]
async fn never_answering_collaborator_is_cut_off() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let resource = ResourceRef::new(ResourceKind::Activity, Ulid::new());
    catalog.add_active(resource, 100);
    let v = validator("stuck_directory.wal", catalog, Arc::new(StuckDirectory), Duration::from_millis(250));

    let draft = DraftRequest {
        resource: Some(resource),
        requester_id: Some(Ulid::new()),
        start: Some(next_week()),
        end: Some(next_week() - DAY_MS),
        duration_days: None,
        quantity: Some(1),
        notes: None,
    };

    let started = std::time::Instant::now();
    let report = v.validate_draft(draft).await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(1_000), "took {elapsed:?}");
    assert!(!report.is_valid);
    assert!(!report.complete);
    assert!(report.warnings.iter().any(|w| w.code == FindingCode::Timeout));
    assert!(report.errors.iter().any(|e| e.field == "end"));
}

#[tokio::test]
async fn failed_lookup_becomes_a_warning() {
    let directory = Arc::new(InMemoryDirectory::new());
    let guest = Ulid::new();
    directory.register(guest, None);
    let v = validator("down_catalog.wal", Arc::new(DownCatalog), directory, Duration::from_secs(2));

    let report = v
        .validate_draft(DraftRequest {
            resource: Some(ResourceRef::new(ResourceKind::Vehicle, Ulid::new())),
            requester_id: Some(guest),
            start: Some(next_week()),
            end: None,
            duration_days: Some(1),
            quantity: Some(1),
            notes: None,
        })
        .await;

    assert!(report.complete);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.field == "resource" && w.code == FindingCode::LookupFailed));
}
