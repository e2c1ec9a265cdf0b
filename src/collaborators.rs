//! Interfaces to systems this crate does not own: the resource catalog, the
//! requester directory, pricing and notification delivery.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Ms, PriceBreakdown, ReservationId, ReservationStatus, ResourceRef, Span, DAY_MS};
use crate::request::ReservationRequest;

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Active,
    Inactive,
    Archived,
}

/// What the catalog knows about a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub exists: bool,
    pub status: ResourceStatus,
    /// Operator-controlled availability switch, independent of bookings.
    pub available: bool,
    /// Unit price in minor currency units, passed through to pricing.
    #[serde(default)]
    pub base_price: i64,
}

impl ResourceSnapshot {
    pub fn missing() -> Self {
        Self {
            exists: false,
            status: ResourceStatus::Archived,
            available: false,
            base_price: 0,
        }
    }

    pub fn bookable(&self) -> bool {
        self.exists && self.status == ResourceStatus::Active && self.available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterSnapshot {
    pub exists: bool,
    pub expires_at: Option<Ms>,
}

impl RequesterSnapshot {
    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Created,
    StatusChanged(ReservationStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub reservation_id: ReservationId,
    pub resource: ResourceRef,
    pub at: Ms,
}

#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn lookup_resource(&self, resource: &ResourceRef) -> Result<ResourceSnapshot, CollaboratorError>;
}

#[async_trait]
pub trait RequesterDirectory: Send + Sync {
    async fn lookup_requester(&self, requester_id: Ulid) -> Result<RequesterSnapshot, CollaboratorError>;
}

#[async_trait]
pub trait PriceCalculator: Send + Sync {
    async fn compute_price(
        &self,
        snapshot: &ResourceSnapshot,
        request: &ReservationRequest,
        window: Option<Span>,
    ) -> Result<PriceBreakdown, CollaboratorError>;
}

/// Fire-and-forget delivery. Callers never wait on or fail because of it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), CollaboratorError>;
}

/// The full set of collaborators an engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ResourceCatalog>,
    pub requesters: Arc<dyn RequesterDirectory>,
    pub pricing: Arc<dyn PriceCalculator>,
    pub notifier: Arc<dyn Notifier>,
}

// ── In-memory implementations ────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCatalog {
    resources: DashMap<ResourceRef, ResourceSnapshot>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(flatten)]
    resource: ResourceRef,
    #[serde(flatten)]
    snapshot: ResourceSnapshot,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, resource: ResourceRef, snapshot: ResourceSnapshot) {
        self.resources.insert(resource, snapshot);
    }

    /// Add an active, available resource at `base_price`.
    pub fn add_active(&self, resource: ResourceRef, base_price: i64) {
        self.upsert(
            resource,
            ResourceSnapshot {
                exists: true,
                status: ResourceStatus::Active,
                available: true,
                base_price,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Load a JSON array of `{kind, id, exists, status, available, base_price}` objects.
    pub fn load_json(&self, path: &Path) -> std::io::Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let n = entries.len();
        for entry in entries {
            self.upsert(entry.resource, entry.snapshot);
        }
        Ok(n)
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryCatalog {
    async fn lookup_resource(&self, resource: &ResourceRef) -> Result<ResourceSnapshot, CollaboratorError> {
        Ok(self
            .resources
            .get(resource)
            .map(|e| e.value().clone())
            .unwrap_or_else(ResourceSnapshot::missing))
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    requesters: DashMap<Ulid, Option<Ms>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, requester_id: Ulid, expires_at: Option<Ms>) {
        self.requesters.insert(requester_id, expires_at);
    }
}

#[async_trait]
impl RequesterDirectory for InMemoryDirectory {
    async fn lookup_requester(&self, requester_id: Ulid) -> Result<RequesterSnapshot, CollaboratorError> {
        Ok(match self.requesters.get(&requester_id) {
            Some(e) => RequesterSnapshot {
                exists: true,
                expires_at: *e.value(),
            },
            None => RequesterSnapshot {
                exists: false,
                expires_at: None,
            },
        })
    }
}

/// `base_price × quantity × days`, no tax or discount. Non-dated bookings count as one day.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatRatePricing;

#[async_trait]
impl PriceCalculator for FlatRatePricing {
    async fn compute_price(
        &self,
        snapshot: &ResourceSnapshot,
        request: &ReservationRequest,
        window: Option<Span>,
    ) -> Result<PriceBreakdown, CollaboratorError> {
        let days = window.map_or(1, |w| ((w.duration_ms() + DAY_MS - 1) / DAY_MS).max(1));
        let subtotal = snapshot
            .base_price
            .checked_mul(i64::from(request.quantity))
            .and_then(|v| v.checked_mul(days))
            .ok_or_else(|| CollaboratorError::Rejected("price overflow".into()))?;
        Ok(PriceBreakdown {
            subtotal,
            tax: 0,
            discount: 0,
            total: subtotal,
        })
    }
}
