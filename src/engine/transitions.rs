use crate::model::{Ms, PaymentStatus, Reservation, ReservationStatus};

use super::EngineError;

use ReservationStatus::*;

/// Every legal status change. Anything not listed is rejected.
const TRANSITIONS: &[(ReservationStatus, ReservationStatus)] = &[
    (Pending, Confirmed),
    (Pending, Cancelled),
    (Pending, Expired),
    (Confirmed, Cancelled),
];

pub fn is_allowed(from: ReservationStatus, to: ReservationStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

/// Check a requested transition against the table and its guards.
/// `pending -> expired` additionally needs the reservation to be unpaid and past expiry.
pub(crate) fn check_transition(
    reservation: &Reservation,
    to: ReservationStatus,
    now: Ms,
) -> Result<(), EngineError> {
    let from = reservation.status;
    if !is_allowed(from, to) {
        return Err(EngineError::InvalidTransition { from, to });
    }
    if to == Expired && !reservation.is_due(now) {
        return Err(EngineError::InvalidTransition { from, to });
    }
    Ok(())
}

/// Payment status after moving to `to`. Confirmation means payment was taken;
/// nothing else touches it (refunds are handled elsewhere).
pub(crate) fn payment_after(current: PaymentStatus, to: ReservationStatus) -> PaymentStatus {
    match to {
        Confirmed => PaymentStatus::Paid,
        _ => current,
    }
}
