use crate::model::*;

use super::overlap::{self, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Fetch a reservation. One found past its hold expiry is expired before
    /// it is returned.
    pub async fn get_reservation(&self, id: &ReservationId) -> Result<Reservation, EngineError> {
        let resource = self
            .get_resource_for_reservation(id)
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        let rs = self
            .get_resource(&resource)
            .ok_or_else(|| EngineError::not_found("reservation", id))?;

        {
            let guard = rs.read().await;
            let reservation = guard
                .reservations
                .get(id)
                .ok_or_else(|| EngineError::not_found("reservation", id))?;
            if !reservation.is_due(self.clock.now_ms()) {
                return Ok(reservation.clone());
            }
        }

        self.expire_if_due(id, resource).await
    }

    /// Look up by the external string form, rejecting malformed identifiers.
    pub async fn get_reservation_by_str(&self, id: &str) -> Result<Reservation, EngineError> {
        let id = ReservationId::parse(id)
            .ok_or_else(|| EngineError::validation("id", "expected BKG-YYYYMMDD-NNNN"))?;
        self.get_reservation(&id).await
    }

    /// Every reservation on `resource`, terminal ones included, oldest first.
    pub async fn list_reservations(&self, resource: &ResourceRef) -> Vec<Reservation> {
        let Some(rs) = self.get_resource(resource) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        let mut out: Vec<Reservation> = guard.reservations.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Reservations blocking `span` on `resource`.
    ///
    /// Runs under a read lock only, so the answer is advisory: a concurrent
    /// creator may take the window right after this returns.
    pub async fn find_overlaps(
        &self,
        resource: &ResourceRef,
        span: Span,
        exclude: Option<&ReservationId>,
    ) -> Result<Vec<ConflictInfo>, EngineError> {
        validate_span(&span)?;
        let Some(rs) = self.get_resource(resource) else {
            return Ok(Vec::new());
        };
        let guard = rs.read().await;
        Ok(overlap::find_overlaps(&guard, &span, exclude, self.clock.now_ms()))
    }

    pub async fn has_overlap(
        &self,
        resource: &ResourceRef,
        span: Span,
        exclude: Option<&ReservationId>,
    ) -> Result<bool, EngineError> {
        validate_span(&span)?;
        let Some(rs) = self.get_resource(resource) else {
            return Ok(false);
        };
        let guard = rs.read().await;
        Ok(overlap::has_overlap(&guard, &span, exclude, self.clock.now_ms()))
    }
}
