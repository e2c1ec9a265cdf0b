use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::{Ms, ResourceRef, Span, DAY_MS};

/// Input to `create_reservation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub resource: ResourceRef,
    pub requester_id: Ulid,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    /// Used to derive `end` when only a start is given.
    pub duration_days: Option<u32>,
    pub quantity: u32,
    pub notes: Option<String>,
}

impl ReservationRequest {
    /// A dated request for `[start, start + days)`.
    pub fn for_days(resource: ResourceRef, requester_id: Ulid, start: Ms, days: u32) -> Self {
        Self {
            resource,
            requester_id,
            start: Some(start),
            end: None,
            duration_days: Some(days),
            quantity: 1,
            notes: None,
        }
    }

    pub fn window(&self) -> Result<Option<Span>, WindowError> {
        resolve_window(self.start, self.end, self.duration_days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    MissingStart,
    MissingEnd,
    EndBeforeStart,
    ZeroDuration,
    DurationMismatch,
    TooLong,
    OutOfRange,
}

impl WindowError {
    /// The request field the problem is reported against.
    pub fn field(&self) -> &'static str {
        match self {
            WindowError::MissingStart | WindowError::OutOfRange => "start",
            WindowError::MissingEnd | WindowError::EndBeforeStart => "end",
            WindowError::ZeroDuration | WindowError::DurationMismatch | WindowError::TooLong => {
                "duration_days"
            }
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            WindowError::MissingStart => "a start date is required when an end or duration is given",
            WindowError::MissingEnd => "an end date or a duration is required",
            WindowError::EndBeforeStart => "end must be after start",
            WindowError::ZeroDuration => "duration must be at least one day",
            WindowError::DurationMismatch => "end does not match start plus duration",
            WindowError::TooLong => "window is longer than the maximum allowed",
            WindowError::OutOfRange => "date out of supported range",
        }
    }
}

impl std::fmt::Display for WindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field(), self.message())
    }
}

/// Compute the half-open window of a request.
///
/// No start, end or duration means a non-dated reservation. `end` wins when
/// given; otherwise `end = start + duration_days`. Both may be given only if
/// they agree.
pub fn resolve_window(
    start: Option<Ms>,
    end: Option<Ms>,
    duration_days: Option<u32>,
) -> Result<Option<Span>, WindowError> {
    let start = match (start, end, duration_days) {
        (None, None, None) => return Ok(None),
        (None, _, _) => return Err(WindowError::MissingStart),
        (Some(s), _, _) => s,
    };
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&start) {
        return Err(WindowError::OutOfRange);
    }
    if duration_days == Some(0) {
        return Err(WindowError::ZeroDuration);
    }
    if duration_days.is_some_and(|d| i64::from(d) > MAX_WINDOW_DAYS) {
        return Err(WindowError::TooLong);
    }
    let derived = duration_days.map(|d| start + i64::from(d) * DAY_MS);
    let end = match (end, derived) {
        (Some(e), Some(d)) if e != d => return Err(WindowError::DurationMismatch),
        (Some(e), _) => e,
        (None, Some(d)) => d,
        (None, None) => return Err(WindowError::MissingEnd),
    };
    if end <= start {
        return Err(WindowError::EndBeforeStart);
    }
    if end > MAX_VALID_TIMESTAMP_MS {
        return Err(WindowError::OutOfRange);
    }
    if end - start > MAX_WINDOW_MS {
        return Err(WindowError::TooLong);
    }
    Ok(Some(Span::new(start, end)))
}
