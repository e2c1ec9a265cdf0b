use std::time::Instant;

use tracing::{debug, info, warn};

use crate::collaborators::{Notification, NotificationKind};
use crate::limits::*;
use crate::model::*;
use crate::request::ReservationRequest;
use crate::sequence::DayKey;

use super::overlap::{due_overlapping, find_overlaps, validate_span};
use super::transitions::{check_transition, payment_after};
use super::{Engine, EngineError, OverlapConflict};

/// The event recording `reservation` moving to `to` at `now`.
fn status_event(reservation: &Reservation, to: ReservationStatus, reason: Option<String>, now: Ms) -> Event {
    Event::StatusChanged {
        id: reservation.id.clone(),
        resource: reservation.resource,
        from: reservation.status,
        to,
        payment_status: payment_after(reservation.payment_status, to),
        reason,
        at: now,
    }
}

fn check_request_shape(request: &ReservationRequest) -> Result<Option<Span>, EngineError> {
    if request.quantity == 0 {
        return Err(EngineError::validation("quantity", "quantity must be at least 1"));
    }
    if request.quantity > MAX_QUANTITY {
        return Err(EngineError::validation(
            "quantity",
            format!("quantity must not exceed {MAX_QUANTITY}"),
        ));
    }
    if request.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    let window = request
        .window()
        .map_err(|e| EngineError::validation(e.field(), e.message()))?;
    if let Some(span) = &window {
        validate_span(span)?;
    }
    Ok(window)
}

impl Engine {
    /// Authoritatively create a reservation.
    ///
    /// Collaborator checks run first and are advisory; the overlap check that
    /// decides acceptance runs inside the resource's unit of work, together
    /// with identifier allocation and the write.
    pub async fn create_reservation(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.create_inner(request).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(EngineError::Overlap(_)) => "overlap",
            Err(_) => "rejected",
        };
        metrics::histogram!(crate::observability::CREATE_DURATION_SECONDS, "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn create_inner(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        let window = check_request_shape(&request)?;
        let now = self.clock.now_ms();
        if window.is_some_and(|w| w.start < now) {
            return Err(EngineError::validation("start", "start must not be in the past"));
        }

        let resource = request.resource;
        let snapshot = self.collaborators.catalog.lookup_resource(&resource).await?;
        if !snapshot.exists {
            return Err(EngineError::not_found("resource", resource));
        }
        if !snapshot.bookable() {
            return Err(EngineError::validation("resource", "resource is not open for booking"));
        }

        let requester = self
            .collaborators
            .requesters
            .lookup_requester(request.requester_id)
            .await?;
        if !requester.exists {
            return Err(EngineError::not_found("requester", request.requester_id));
        }
        if requester.is_expired(now) {
            return Err(EngineError::validation("requester_id", "requester account has expired"));
        }

        let price = self
            .collaborators
            .pricing
            .compute_price(&snapshot, &request, window)
            .await?;

        // ── Unit of work: everything below commits together or not at all ──
        let mut unit = self.begin(&resource).await;
        if unit.state().active_count() >= MAX_ACTIVE_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many active reservations on resource"));
        }
        let now = self.clock.now_ms();

        let mut expired = Vec::new();
        if let Some(span) = window {
            for due in due_overlapping(unit.state(), &span, now) {
                unit.stage(status_event(&due, ReservationStatus::Expired, None, now));
                expired.push(due.id);
            }

            let conflicting = find_overlaps(unit.state(), &span, None, now);
            if !conflicting.is_empty() {
                drop(unit);
                metrics::counter!(crate::observability::OVERLAP_CONFLICTS_TOTAL).increment(1);
                debug!("create on {resource} rejected: {} overlapping", conflicting.len());
                let suggestions = self
                    .suggest_for_window(&resource, span, self.policy.suggestion_horizon_days)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("suggestions for {resource} unavailable: {e}");
                        Vec::new()
                    });
                return Err(EngineError::Overlap(Box::new(OverlapConflict {
                    resource,
                    requested: span,
                    conflicting,
                    suggestions,
                })));
            }
        }

        let id = unit.allocate_id(DayKey::for_instant(now))?;
        if unit.state().reservations.contains_key(&id) || self.reservation_index.contains_key(&id) {
            return Err(EngineError::Conflict(format!("identifier {id} already in use")));
        }

        let reservation = Reservation {
            id,
            resource,
            requester_id: request.requester_id,
            window,
            quantity: request.quantity,
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            expires_at: now + self.policy.hold_ttl_ms,
            created_at: now,
            updated_at: now,
            price,
            notes: request.notes,
            cancel_reason: None,
        };
        unit.stage(Event::ReservationCreated(Box::new(reservation.clone())));
        self.commit(&mut unit).await?;
        drop(unit);

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!("reservation {} created on {resource}", reservation.id);
        for id in expired {
            self.record_transition(ReservationStatus::Expired);
            self.notify(NotificationKind::StatusChanged(ReservationStatus::Expired), id, resource, now);
        }
        self.notify(NotificationKind::Created, reservation.id.clone(), resource, now);
        Ok(reservation)
    }

    /// Move a reservation to `to`, enforcing the transition table.
    ///
    /// A reservation found due is expired first. Asking for `expired` then
    /// succeeds; any other target fails as a transition out of `expired`.
    pub async fn update_status(
        &self,
        id: &ReservationId,
        to: ReservationStatus,
        reason: Option<String>,
    ) -> Result<Reservation, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let resource = self
            .get_resource_for_reservation(id)
            .ok_or_else(|| EngineError::not_found("reservation", id))?;

        let mut unit = self.begin(&resource).await;
        let now = self.clock.now_ms();
        let current = unit
            .state()
            .reservations
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", id))?;

        if current.is_due(now) {
            unit.stage(status_event(&current, ReservationStatus::Expired, None, now));
            self.commit(&mut unit).await?;
            let updated = unit.state().reservations.get(id).cloned();
            drop(unit);
            self.after_transition(id, resource, ReservationStatus::Expired, now);
            return match (to, updated) {
                (ReservationStatus::Expired, Some(r)) => Ok(r),
                (ReservationStatus::Expired, None) => Err(EngineError::not_found("reservation", id)),
                (to, _) => Err(EngineError::InvalidTransition {
                    from: ReservationStatus::Expired,
                    to,
                }),
            };
        }

        check_transition(&current, to, now)?;
        let reason = reason.filter(|_| to == ReservationStatus::Cancelled);
        unit.stage(status_event(&current, to, reason, now));
        self.commit(&mut unit).await?;
        let updated = unit
            .state()
            .reservations
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        drop(unit);

        info!("reservation {id}: {} -> {to}", current.status);
        self.after_transition(id, resource, to, now);
        Ok(updated)
    }

    /// `pending -> confirmed`; payment becomes `paid`.
    pub async fn confirm_payment(&self, id: &ReservationId) -> Result<Reservation, EngineError> {
        self.update_status(id, ReservationStatus::Confirmed, None).await
    }

    /// Cancel from `pending` or `confirmed`. Payment status is left as is.
    pub async fn cancel_reservation(
        &self,
        id: &ReservationId,
        reason: impl Into<String>,
    ) -> Result<Reservation, EngineError> {
        self.update_status(id, ReservationStatus::Cancelled, Some(reason.into()))
            .await
    }

    /// Expire `id` if it is due. Returns its state afterwards.
    pub(super) async fn expire_if_due(
        &self,
        id: &ReservationId,
        resource: ResourceRef,
    ) -> Result<Reservation, EngineError> {
        let mut unit = self.begin(&resource).await;
        let now = self.clock.now_ms();
        let current = unit
            .state()
            .reservations
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        if !current.is_due(now) {
            return Ok(current);
        }
        unit.stage(status_event(&current, ReservationStatus::Expired, None, now));
        self.commit(&mut unit).await?;
        let updated = unit
            .state()
            .reservations
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        drop(unit);
        debug!("reservation {id} expired on read");
        self.after_transition(id, resource, ReservationStatus::Expired, now);
        Ok(updated)
    }

    /// Expire every pending, unpaid reservation whose hold has run out.
    /// Returns how many were transitioned; a second run right after returns 0.
    pub async fn sweep_expired(&self) -> Result<usize, EngineError> {
        let now = self.clock.now_ms();
        let resources: Vec<ResourceRef> = self.state.iter().map(|e| *e.key()).collect();
        let mut total = 0;

        for resource in resources {
            let Some(rs) = self.get_resource(&resource) else {
                continue;
            };
            if !rs.read().await.reservations.values().any(|r| r.is_due(now)) {
                continue;
            }

            let mut unit = self.begin(&resource).await;
            let due: Vec<Reservation> = unit
                .state()
                .reservations
                .values()
                .filter(|r| r.is_due(now))
                .cloned()
                .collect();
            if due.is_empty() {
                continue;
            }
            for r in &due {
                unit.stage(status_event(r, ReservationStatus::Expired, None, now));
            }
            self.commit(&mut unit).await?;
            drop(unit);

            total += due.len();
            for r in due {
                self.after_transition(&r.id, resource, ReservationStatus::Expired, now);
            }
        }

        if total > 0 {
            metrics::counter!(crate::observability::EXPIRED_SWEPT_TOTAL).increment(total as u64);
            info!("expired {total} reservation(s)");
        }
        Ok(total)
    }

    fn record_transition(&self, to: ReservationStatus) {
        metrics::counter!(crate::observability::STATUS_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
    }

    fn after_transition(&self, id: &ReservationId, resource: ResourceRef, to: ReservationStatus, at: Ms) {
        self.record_transition(to);
        self.notify(NotificationKind::StatusChanged(to), id.clone(), resource, at);
    }

    fn notify(&self, kind: NotificationKind, reservation_id: ReservationId, resource: ResourceRef, at: Ms) {
        self.dispatch(Notification {
            kind,
            reservation_id,
            resource,
            at,
        });
    }
}
