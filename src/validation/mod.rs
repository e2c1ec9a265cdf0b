//! Pre-validation of draft reservations.
//!
//! Everything here is advisory. Format checks, cached collaborator lookups and
//! an optimistic availability probe fan out under one global deadline; the
//! result is always a [`ValidationReport`], never an error, and nothing is
//! written.

mod checks;
mod probe;

pub use checks::{Finding, FindingCode};
pub use probe::{AvailabilityProbe, ProbeOutcome};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::cache::{CacheKey, CachedValue, ValidationCache};
use crate::collaborators::ResourceStatus;
use crate::config::ValidationSettings;
use crate::engine::Engine;
use crate::model::{Ms, ResourceRef, Span, SuggestedWindow};
use crate::request::ReservationRequest;

/// A possibly incomplete reservation request, as typed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRequest {
    pub resource: Option<ResourceRef>,
    pub requester_id: Option<Ulid>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub duration_days: Option<u32>,
    pub quantity: Option<u32>,
    pub notes: Option<String>,
}

impl From<ReservationRequest> for DraftRequest {
    fn from(r: ReservationRequest) -> Self {
        Self {
            resource: Some(r.resource),
            requester_id: Some(r.requester_id),
            start: r.start,
            end: r.end,
            duration_days: r.duration_days,
            quantity: Some(r.quantity),
            notes: r.notes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    /// False when the deadline cut the checks short.
    pub complete: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub suggestions: Vec<SuggestedWindow>,
}

impl ValidationReport {
    pub fn has_error(&self, code: FindingCode) -> bool {
        self.errors.iter().any(|f| f.code == code)
    }

    pub fn has_warning(&self, code: FindingCode) -> bool {
        self.warnings.iter().any(|f| f.code == code)
    }
}

#[derive(Debug, Default)]
struct Findings {
    errors: Vec<Finding>,
    warnings: Vec<Finding>,
    suggestions: Vec<SuggestedWindow>,
}

impl Findings {
    fn error(f: Finding) -> Self {
        Self {
            errors: vec![f],
            ..Self::default()
        }
    }

    fn warning(f: Finding) -> Self {
        Self {
            warnings: vec![f],
            ..Self::default()
        }
    }

    fn merge(mut self, other: Findings) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.suggestions.extend(other.suggestions);
        self
    }
}

fn spawn_check<F>(set: &mut JoinSet<Option<Findings>>, cancel: &CancellationToken, check: F)
where
    F: Future<Output = Findings> + Send + 'static,
{
    let cancel = cancel.clone();
    set.spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => None,
            found = check => Some(found),
        }
    });
}

#[derive(Clone)]
pub struct ValidationOrchestrator {
    engine: Arc<Engine>,
    cache: Arc<dyn ValidationCache>,
    probe: AvailabilityProbe,
    settings: ValidationSettings,
}

impl ValidationOrchestrator {
    pub fn new(engine: Arc<Engine>, cache: Arc<dyn ValidationCache>, settings: ValidationSettings) -> Self {
        let probe = AvailabilityProbe::new(engine.clone(), settings.probe_timeout);
        Self {
            engine,
            cache,
            probe,
            settings,
        }
    }

    /// Validate a draft within the configured deadline.
    ///
    /// When the deadline elapses first the outstanding checks are cancelled and
    /// the report carries the format findings, those of every check that did
    /// finish, and a `Timeout` warning.
    pub async fn validate_draft(&self, draft: DraftRequest) -> ValidationReport {
        let started = Instant::now();
        let now = self.engine.clock().now_ms();
        let format = checks::check_format(&draft, now);

        let cancel = CancellationToken::new();
        let mut pending = self.spawn_checks(&draft, format.window, now, &cancel);
        let mut all = Findings {
            errors: format.errors,
            warnings: format.warnings,
            suggestions: Vec::new(),
        };

        // Keep whatever has finished when the deadline hits.
        let deadline = tokio::time::sleep(self.settings.deadline);
        tokio::pin!(deadline);
        let mut complete = true;
        loop {
            tokio::select! {
                next = pending.join_next() => match next {
                    Some(Ok(Some(found))) => all = all.merge(found),
                    Some(Ok(None)) => {}
                    Some(Err(e)) => {
                        warn!("validation check aborted: {e}");
                        all.warnings.push(Finding::new(
                            "request",
                            FindingCode::LookupFailed,
                            "a validation check failed to run",
                        ));
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    cancel.cancel();
                    complete = false;
                    metrics::counter!(crate::observability::VALIDATION_TIMEOUTS_TOTAL).increment(1);
                    debug!(
                        "validation deadline of {:?} elapsed with {} checks outstanding",
                        self.settings.deadline,
                        pending.len()
                    );
                    all.warnings.push(Finding::new(
                        "request",
                        FindingCode::Timeout,
                        format!(
                            "validation did not finish within {} ms; results are partial",
                            self.settings.deadline.as_millis()
                        ),
                    ));
                    break;
                }
            }
        }

        let errors = checks::dedupe(all.errors);
        let warnings = checks::dedupe(all.warnings);
        metrics::histogram!(crate::observability::VALIDATION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        ValidationReport {
            is_valid: complete && errors.is_empty(),
            complete,
            errors,
            warnings,
            suggestions: all.suggestions,
        }
    }

    /// Drop cached catalog facts about `resource`.
    pub async fn invalidate_resource(&self, resource: &ResourceRef) {
        self.cache.invalidate(&CacheKey::ResourceExists(*resource)).await;
        self.cache.invalidate(&CacheKey::ResourceStatus(*resource)).await;
    }

    pub async fn invalidate_requester(&self, requester_id: Ulid) {
        self.cache.invalidate(&CacheKey::RequesterExists(requester_id)).await;
        self.cache.invalidate(&CacheKey::RequesterExpiry(requester_id)).await;
    }

    /// One task per collaborator check. Each stops early once `cancel` fires.
    fn spawn_checks(
        &self,
        draft: &DraftRequest,
        window: Option<Span>,
        now: Ms,
        cancel: &CancellationToken,
    ) -> JoinSet<Option<Findings>> {
        let mut set = JoinSet::new();
        if let Some(resource) = draft.resource {
            let this = self.clone();
            spawn_check(&mut set, cancel, async move { this.check_resource(&resource).await });
        }
        if let Some(requester_id) = draft.requester_id {
            let this = self.clone();
            spawn_check(&mut set, cancel, async move {
                this.check_requester(requester_id, now).await
            });
        }
        if let (Some(resource), Some(window)) = (draft.resource, window) {
            let this = self.clone();
            spawn_check(&mut set, cancel, async move {
                this.check_availability(&resource, window).await
            });
        }
        set
    }

    async fn check_resource(&self, resource: &ResourceRef) -> Findings {
        let ttls = self.settings.cache_ttls;
        let exists_key = CacheKey::ResourceExists(*resource);
        let status_key = CacheKey::ResourceStatus(*resource);

        let cached = (self.cache.get(&exists_key).await, self.cache.get(&status_key).await);
        let (exists, status) = match cached {
            (Some(CachedValue::Exists(false)), _) => (false, None),
            (Some(CachedValue::Exists(true)), Some(CachedValue::Status { status, available })) => {
                (true, Some((status, available)))
            }
            _ => match self.engine.collaborators().catalog.lookup_resource(resource).await {
                Ok(snap) => {
                    self.cache
                        .set(exists_key, CachedValue::Exists(snap.exists), ttls.resource_exists)
                        .await;
                    if snap.exists {
                        self.cache
                            .set(
                                status_key,
                                CachedValue::Status {
                                    status: snap.status,
                                    available: snap.available,
                                },
                                ttls.resource_status,
                            )
                            .await;
                    }
                    (snap.exists, Some((snap.status, snap.available)))
                }
                Err(e) => {
                    return Findings::warning(Finding::new(
                        "resource",
                        FindingCode::LookupFailed,
                        format!("could not verify resource: {e}"),
                    ));
                }
            },
        };

        if !exists {
            return Findings::error(Finding::new("resource", FindingCode::NotFound, "resource does not exist"));
        }
        match status {
            Some((ResourceStatus::Active, true)) => Findings::default(),
            _ => Findings::error(Finding::new(
                "resource",
                FindingCode::Unavailable,
                "resource is not open for booking",
            )),
        }
    }

    async fn check_requester(&self, requester_id: Ulid, now: Ms) -> Findings {
        let ttl = self.settings.cache_ttls.requester;
        let exists_key = CacheKey::RequesterExists(requester_id);
        let expiry_key = CacheKey::RequesterExpiry(requester_id);

        let cached = (self.cache.get(&exists_key).await, self.cache.get(&expiry_key).await);
        let (exists, expires_at) = match cached {
            (Some(CachedValue::Exists(false)), _) => (false, None),
            (Some(CachedValue::Exists(true)), Some(CachedValue::Expiry(expires_at))) => (true, expires_at),
            _ => match self
                .engine
                .collaborators()
                .requesters
                .lookup_requester(requester_id)
                .await
            {
                Ok(snap) => {
                    self.cache.set(exists_key, CachedValue::Exists(snap.exists), ttl).await;
                    self.cache.set(expiry_key, CachedValue::Expiry(snap.expires_at), ttl).await;
                    (snap.exists, snap.expires_at)
                }
                Err(e) => {
                    return Findings::warning(Finding::new(
                        "requester_id",
                        FindingCode::LookupFailed,
                        format!("could not verify requester: {e}"),
                    ));
                }
            },
        };

        if !exists {
            Findings::error(Finding::new("requester_id", FindingCode::NotFound, "requester does not exist"))
        } else if expires_at.is_some_and(|t| t <= now) {
            Findings::error(Finding::new(
                "requester_id",
                FindingCode::Expired,
                "requester account has expired",
            ))
        } else {
            Findings::default()
        }
    }

    async fn check_availability(&self, resource: &ResourceRef, window: Span) -> Findings {
        match self.probe.check(resource, window).await {
            ProbeOutcome::Available => Findings::default(),
            ProbeOutcome::OptimisticPass => Findings::warning(Finding::new(
                "start",
                FindingCode::AvailabilityUnverified,
                "availability could not be confirmed in time; it will be checked on booking",
            )),
            ProbeOutcome::Conflicting(conflicts) => {
                let suggestions = self
                    .engine
                    .suggest_for_window(resource, window, self.engine.policy().suggestion_horizon_days)
                    .await
                    .unwrap_or_default();
                Findings {
                    errors: vec![Finding::new(
                        "start",
                        FindingCode::Conflict,
                        format!("window overlaps {} existing reservation(s)", conflicts.len()),
                    )],
                    warnings: Vec::new(),
                    suggestions,
                }
            }
        }
    }
}
