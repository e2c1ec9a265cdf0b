use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::sequence::DayKey;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `[s1,e1)` and `[s2,e2)` overlap iff `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Package,
    Activity,
    Vehicle,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Package => "package",
            ResourceKind::Activity => "activity",
            ResourceKind::Vehicle => "vehicle",
        }
    }
}

/// A bookable catalog item: type + id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Ulid,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: Ulid) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Externally visible identifier: `BKG-<YYYYMMDD>-<NNNN>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ReservationId(String);

impl ReservationId {
    pub const PREFIX: &'static str = "BKG";

    pub fn new(day: DayKey, sequence: u32) -> Self {
        Self(format!("{}-{day}-{sequence:04}", Self::PREFIX))
    }

    /// Accepts only the canonical `BKG-YYYYMMDD-NNNN` shape.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('-');
        let (prefix, day, seq) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || prefix != Self::PREFIX {
            return None;
        }
        DayKey::parse(day)?;
        if seq.len() != 4 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The per-day sequence number embedded in the identifier.
    pub fn sequence(&self) -> Option<u32> {
        self.0.rsplit('-').next().and_then(|s| s.parse().ok())
    }
}

impl TryFrom<String> for ReservationId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("malformed reservation id: {s}"))
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    /// Pending and confirmed reservations occupy their window.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

/// Price fields computed by the pricing collaborator. Minor currency units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: i64,
    pub tax: i64,
    pub discount: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub resource: ResourceRef,
    pub requester_id: Ulid,
    /// `None` for non-dated resources; those never participate in overlap checks.
    pub window: Option<Span>,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub expires_at: Ms,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub price: PriceBreakdown,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
}

impl Reservation {
    /// Pending, unpaid and past its expiry: eligible for the pending -> expired transition.
    pub fn is_due(&self, now: Ms) -> bool {
        self.status == ReservationStatus::Pending
            && self.payment_status == PaymentStatus::Unpaid
            && self.expires_at <= now
    }

    /// Whether this reservation blocks its window at `now`.
    /// Due reservations are treated as already expired.
    pub fn occupies(&self, now: Ms) -> bool {
        self.status.is_active() && !self.is_due(now)
    }
}

/// An occupied window on a resource. Only active, dated reservations have one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub id: ReservationId,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceState {
    pub resource: Option<ResourceRef>,
    /// Intervals of active dated reservations, sorted by `span.start`.
    pub intervals: Vec<Interval>,
    /// Every reservation ever accepted on this resource, terminal ones included.
    pub reservations: std::collections::HashMap<ReservationId, Reservation>,
    /// Pending and confirmed entries in `reservations`, dated or not.
    active: usize,
}

impl ResourceState {
    pub fn new(resource: ResourceRef) -> Self {
        Self {
            resource: Some(resource),
            ..Self::default()
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: &ReservationId) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| &i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    /// Reservations overlapping `query` that still occupy their window at `now`.
    pub fn occupying(&self, query: &Span, now: Ms) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query)
            .filter_map(|i| self.reservations.get(&i.id))
            .filter(move |r| r.occupies(now))
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        if let (Some(span), true) = (reservation.window, reservation.status.is_active()) {
            self.remove_interval(&reservation.id);
            self.insert_interval(Interval {
                id: reservation.id.clone(),
                span,
            });
        }
        if reservation.status.is_active() {
            self.active += 1;
        }
        if let Some(previous) = self.reservations.insert(reservation.id.clone(), reservation) {
            if previous.status.is_active() {
                self.active -= 1;
            }
        }
    }

    /// Move a stored reservation to `to`. A reservation leaving the active
    /// set gives up its window.
    pub fn apply_status(
        &mut self,
        id: &ReservationId,
        to: ReservationStatus,
        payment_status: PaymentStatus,
        reason: Option<String>,
        at: Ms,
    ) {
        let Some(r) = self.reservations.get_mut(id) else {
            return;
        };
        let was_active = r.status.is_active();
        r.status = to;
        r.payment_status = payment_status;
        r.updated_at = at;
        if reason.is_some() {
            r.cancel_reason = reason;
        }
        if was_active && !to.is_active() {
            self.active -= 1;
            self.remove_interval(id);
        }
    }

    /// Reservations that are still pending or confirmed.
    pub fn active_count(&self) -> usize {
        self.active
    }
}

/// WAL event types. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SequenceAdvanced {
        day: DayKey,
        value: u32,
    },
    ReservationCreated(Box<Reservation>),
    StatusChanged {
        id: ReservationId,
        resource: ResourceRef,
        from: ReservationStatus,
        to: ReservationStatus,
        payment_status: PaymentStatus,
        reason: Option<String>,
        at: Ms,
    },
}

/// One unit of work as written to the WAL. Replay applies a commit entirely or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub events: Vec<Event>,
}

// ── Query result types ───────────────────────────────────────────

/// A reservation that blocks a requested window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    pub id: ReservationId,
    pub window: Span,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// Nothing is booked inside the horizon; the requested window itself.
    Requested,
    /// Fits in a gap between two reservations.
    Gap,
    /// After the last reservation, still inside the horizon.
    Trailing,
    /// Nothing fit inside the horizon; starts right after it.
    BeyondHorizon,
}

/// An advisory alternative window, annotated with the gap it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedWindow {
    pub span: Span,
    pub gap_ms: Ms,
    pub kind: SuggestionKind,
}

impl SuggestedWindow {
    pub fn gap_days(&self) -> i64 {
        self.gap_ms / DAY_MS
    }
}
