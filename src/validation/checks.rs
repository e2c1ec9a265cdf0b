use std::collections::HashSet;

use serde::Serialize;

use crate::limits::*;
use crate::model::{Ms, Span, DAY_MS};
use crate::request::{resolve_window, WindowError};

use super::DraftRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
    Required,
    InvalidFormat,
    OutOfRange,
    TooLong,
    PastDate,
    FarFuture,
    NotFound,
    Unavailable,
    Expired,
    Conflict,
    /// The availability probe ran out of time; the window was not verified.
    AvailabilityUnverified,
    /// A collaborator lookup failed; the subject was not verified.
    LookupFailed,
    /// The global deadline elapsed before every check finished.
    Timeout,
}

/// One itemized validation result, attached to a request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub field: &'static str,
    pub code: FindingCode,
    pub message: String,
}

impl Finding {
    pub fn new(field: &'static str, code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            field,
            code,
            message: message.into(),
        }
    }
}

/// Outcome of the synchronous format checks.
#[derive(Debug, Default)]
pub(super) struct FormatResult {
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    /// The resolved window when the date fields are well formed.
    pub window: Option<Span>,
}

fn window_code(e: WindowError) -> FindingCode {
    match e {
        WindowError::MissingStart | WindowError::MissingEnd => FindingCode::Required,
        WindowError::OutOfRange => FindingCode::OutOfRange,
        WindowError::TooLong => FindingCode::TooLong,
        WindowError::EndBeforeStart | WindowError::ZeroDuration | WindowError::DurationMismatch => {
            FindingCode::InvalidFormat
        }
    }
}

/// Shape and sanity checks that need no collaborator.
pub(super) fn check_format(draft: &DraftRequest, now: Ms) -> FormatResult {
    let mut out = FormatResult::default();

    if draft.resource.is_none() {
        out.errors.push(Finding::new("resource", FindingCode::Required, "a resource is required"));
    }
    if draft.requester_id.is_none() {
        out.errors.push(Finding::new("requester_id", FindingCode::Required, "a requester is required"));
    }

    match draft.quantity {
        None => out.errors.push(Finding::new("quantity", FindingCode::Required, "quantity is required")),
        Some(0) => out.errors.push(Finding::new("quantity", FindingCode::OutOfRange, "quantity must be at least 1")),
        Some(q) if q > MAX_QUANTITY => out.errors.push(Finding::new(
            "quantity",
            FindingCode::OutOfRange,
            format!("quantity must not exceed {MAX_QUANTITY}"),
        )),
        Some(_) => {}
    }

    if draft.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        out.errors.push(Finding::new(
            "notes",
            FindingCode::TooLong,
            format!("notes must not exceed {MAX_NOTES_LEN} bytes"),
        ));
    }

    match resolve_window(draft.start, draft.end, draft.duration_days) {
        Err(e) => out.errors.push(Finding::new(e.field(), window_code(e), e.message())),
        Ok(None) => {}
        Ok(Some(span)) => {
            if span.start < now {
                out.errors.push(Finding::new("start", FindingCode::PastDate, "start must not be in the past"));
            } else if span.start - now > FAR_FUTURE_DAYS * DAY_MS {
                out.warnings.push(Finding::new(
                    "start",
                    FindingCode::FarFuture,
                    format!("start is more than {FAR_FUTURE_DAYS} days away"),
                ));
            }
            out.window = Some(span);
        }
    }

    out
}

/// Keep the first finding for each `(field, code)` pair.
pub(super) fn dedupe(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    findings
        .into_iter()
        .filter(|f| seen.insert((f.field, f.code)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceKind, ResourceRef};
    use ulid::Ulid;

    const JAN_1: Ms = 1_798_761_600_000;
    const NOW: Ms = JAN_1 - 10 * DAY_MS;

    fn draft() -> DraftRequest {
        DraftRequest {
            resource: Some(ResourceRef::new(ResourceKind::Activity, Ulid::new())),
            requester_id: Some(Ulid::new()),
            start: Some(JAN_1),
            end: None,
            duration_days: Some(2),
            quantity: Some(1),
            notes: None,
        }
    }

    fn codes(findings: &[Finding]) -> Vec<(&'static str, FindingCode)> {
        findings.iter().map(|f| (f.field, f.code)).collect()
    }

    #[test]
    fn complete_draft_passes() {
        let out = check_format(&draft(), NOW);
        assert!(out.errors.is_empty());
        assert!(out.warnings.is_empty());
        assert_eq!(out.window, Some(Span::new(JAN_1, JAN_1 + 2 * DAY_MS)));
    }

    #[test]
    fn empty_draft_lists_required_fields() {
        let out = check_format(&DraftRequest::default(), NOW);
        assert_eq!(
            codes(&out.errors),
            vec![
                ("resource", FindingCode::Required),
                ("requester_id", FindingCode::Required),
                ("quantity", FindingCode::Required),
            ]
        );
        assert_eq!(out.window, None);
    }

    #[test]
    fn bad_dates_are_reported_against_their_field() {
        let mut d = draft();
        d.end = Some(JAN_1 + DAY_MS);
        let out = check_format(&d, NOW);
        assert_eq!(codes(&out.errors), vec![("duration_days", FindingCode::InvalidFormat)]);

        let mut d = draft();
        d.start = Some(NOW - DAY_MS);
        let out = check_format(&d, NOW);
        assert_eq!(codes(&out.errors), vec![("start", FindingCode::PastDate)]);
    }

    #[test]
    fn far_future_is_only_a_warning() {
        let mut d = draft();
        d.start = Some(NOW + 400 * DAY_MS);
        let out = check_format(&d, NOW);
        assert!(out.errors.is_empty());
        assert_eq!(codes(&out.warnings), vec![("start", FindingCode::FarFuture)]);
    }

    #[test]
    fn dedupe_keeps_first_per_field_and_code() {
        let findings = vec![
            Finding::new("start", FindingCode::PastDate, "first"),
            Finding::new("start", FindingCode::PastDate, "second"),
            Finding::new("start", FindingCode::OutOfRange, "other code"),
            Finding::new("end", FindingCode::PastDate, "other field"),
        ];
        let out = dedupe(findings);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].message, "first");
    }
}
