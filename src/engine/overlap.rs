use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::validation("end", "end must be after start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_WINDOW_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(())
}

/// Reservations on `rs` whose window overlaps `span` and that still occupy it at `now`.
///
/// Only pending and confirmed reservations participate; pending ones past
/// their expiry are treated as expired.
pub(crate) fn find_overlaps(
    rs: &ResourceState,
    span: &Span,
    exclude: Option<&ReservationId>,
    now: Ms,
) -> Vec<ConflictInfo> {
    rs.occupying(span, now)
        .filter(|r| exclude != Some(&r.id))
        .filter_map(|r| {
            r.window.map(|window| ConflictInfo {
                id: r.id.clone(),
                window,
                status: r.status,
            })
        })
        .collect()
}

pub(crate) fn has_overlap(
    rs: &ResourceState,
    span: &Span,
    exclude: Option<&ReservationId>,
    now: Ms,
) -> bool {
    rs.occupying(span, now).any(|r| exclude != Some(&r.id))
}

/// Pending reservations overlapping `span` that are due to expire at `now`.
pub(crate) fn due_overlapping(rs: &ResourceState, span: &Span, now: Ms) -> Vec<Reservation> {
    rs.overlapping(span)
        .filter_map(|i| rs.reservations.get(&i.id))
        .filter(|r| r.is_due(now))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const D: Ms = DAY_MS;
    const JAN_1: Ms = 1_798_761_600_000;

    fn reservation(seq: u32, span: Span, status: ReservationStatus, expires_at: Ms) -> Reservation {
        Reservation {
            id: ReservationId::new(crate::sequence::DayKey::for_instant(JAN_1), seq),
            resource: ResourceRef::new(ResourceKind::Package, Ulid::nil()),
            requester_id: Ulid::nil(),
            window: Some(span),
            quantity: 1,
            status,
            payment_status: PaymentStatus::Unpaid,
            expires_at,
            created_at: 0,
            updated_at: 0,
            price: PriceBreakdown::default(),
            notes: None,
            cancel_reason: None,
        }
    }

    fn state(reservations: Vec<Reservation>) -> ResourceState {
        let mut rs = ResourceState::default();
        for r in reservations {
            rs.insert_reservation(r);
        }
        rs
    }

    #[test]
    fn detects_partial_overlap() {
        let rs = state(vec![reservation(1, Span::new(JAN_1, JAN_1 + 5 * D), ReservationStatus::Pending, Ms::MAX)]);
        let request = Span::new(JAN_1 + 3 * D, JAN_1 + 8 * D);
        let hits = find_overlaps(&rs, &request, None, 0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].window, Span::new(JAN_1, JAN_1 + 5 * D));
        assert!(has_overlap(&rs, &request, None, 0));
    }

    #[test]
    fn back_to_back_windows_do_not_overlap() {
        let rs = state(vec![reservation(1, Span::new(JAN_1, JAN_1 + 5 * D), ReservationStatus::Confirmed, Ms::MAX)]);
        assert!(!has_overlap(&rs, &Span::new(JAN_1 + 5 * D, JAN_1 + 9 * D), None, 0));
        assert!(!has_overlap(&rs, &Span::new(JAN_1 - 2 * D, JAN_1), None, 0));
    }

    #[test]
    fn same_calendar_day_but_disjoint_hours_do_not_overlap() {
        let h = 3_600_000;
        let rs = state(vec![reservation(1, Span::new(JAN_1 + 9 * h, JAN_1 + 11 * h), ReservationStatus::Pending, Ms::MAX)]);
        assert!(!has_overlap(&rs, &Span::new(JAN_1 + 14 * h, JAN_1 + 16 * h), None, 0));
    }

    #[test]
    fn terminal_reservations_do_not_participate() {
        let rs = state(vec![
            reservation(1, Span::new(JAN_1, JAN_1 + D), ReservationStatus::Cancelled, Ms::MAX),
            reservation(2, Span::new(JAN_1, JAN_1 + D), ReservationStatus::Expired, Ms::MAX),
        ]);
        assert!(!has_overlap(&rs, &Span::new(JAN_1, JAN_1 + D), None, 0));
    }

    #[test]
    fn due_pending_does_not_participate() {
        let rs = state(vec![reservation(1, Span::new(JAN_1, JAN_1 + D), ReservationStatus::Pending, 500)]);
        assert!(has_overlap(&rs, &Span::new(JAN_1, JAN_1 + D), None, 499));
        assert!(!has_overlap(&rs, &Span::new(JAN_1, JAN_1 + D), None, 500));
        assert_eq!(due_overlapping(&rs, &Span::new(JAN_1, JAN_1 + D), 500).len(), 1);
    }

    #[test]
    fn excluded_id_is_ignored() {
        let r = reservation(1, Span::new(JAN_1, JAN_1 + D), ReservationStatus::Pending, Ms::MAX);
        let id = r.id.clone();
        let rs = state(vec![r]);
        assert!(!has_overlap(&rs, &Span::new(JAN_1, JAN_1 + D), Some(&id), 0));
        assert!(find_overlaps(&rs, &Span::new(JAN_1, JAN_1 + D), Some(&id), 0).is_empty());
    }

    #[test]
    fn validate_span_limits() {
        assert!(validate_span(&Span::new(JAN_1, JAN_1 + D)).is_ok());
        assert!(matches!(
            validate_span(&Span::new(JAN_1, JAN_1 + 400 * D)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(1, 2)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn validate_span_rejects_inverted_and_empty_windows() {
        // Struct literals skip the constructor's debug check.
        let inverted = Span { start: JAN_1 + D, end: JAN_1 };
        let empty = Span { start: JAN_1, end: JAN_1 };
        for span in [inverted, empty] {
            assert!(matches!(
                validate_span(&span),
                Err(EngineError::Validation { field: "end", .. })
            ));
        }
    }
}
