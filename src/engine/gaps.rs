use crate::limits::*;
use crate::model::*;

use super::overlap::validate_span;
use super::{Engine, EngineError};

// ── Alternative-window suggestion ─────────────────────────────────

/// Propose up to `MAX_SUGGESTIONS` windows of the requested length that avoid
/// every span in `booked`, soonest first.
///
/// `booked` must be sorted by start and hold the active reservations between
/// `requested.start` and the horizon. A cursor sweeps forward from the
/// requested start; each gap in front of a reservation that is long enough
/// yields a candidate anchored at the cursor, then the cursor jumps to that
/// reservation's end. Room left before the horizon yields a trailing
/// candidate. With nothing booked the requested window itself is returned;
/// with nothing fitting, one window starting just past the horizon.
pub fn suggest_windows(booked: &[Span], requested: Span, horizon_days: i64) -> Vec<SuggestedWindow> {
    let length = requested.duration_ms();
    let horizon_end = requested.start + horizon_days.clamp(1, MAX_HORIZON_DAYS) * DAY_MS;

    if booked.is_empty() {
        return vec![SuggestedWindow {
            span: requested,
            gap_ms: (horizon_end - requested.start).max(length),
            kind: SuggestionKind::Requested,
        }];
    }

    let mut out = Vec::new();
    let mut cursor = requested.start;
    for span in booked {
        if out.len() >= MAX_SUGGESTIONS {
            break;
        }
        if cursor < span.start && span.start - cursor >= length {
            out.push(SuggestedWindow {
                span: Span::new(cursor, cursor + length),
                gap_ms: span.start - cursor,
                kind: SuggestionKind::Gap,
            });
        }
        cursor = cursor.max(span.end);
    }

    if out.len() < MAX_SUGGESTIONS && horizon_end - cursor >= length {
        out.push(SuggestedWindow {
            span: Span::new(cursor, cursor + length),
            gap_ms: horizon_end - cursor,
            kind: SuggestionKind::Trailing,
        });
    }

    if out.is_empty() {
        let start = horizon_end.max(cursor);
        out.push(SuggestedWindow {
            span: Span::new(start, start + length),
            gap_ms: 0,
            kind: SuggestionKind::BeyondHorizon,
        });
    }

    out
}

impl Engine {
    /// Advisory alternatives for a `length_days` stay starting at `requested_start`.
    /// The result may be stale by the time the caller retries.
    pub async fn suggest_alternatives(
        &self,
        resource: &ResourceRef,
        requested_start: Ms,
        length_days: i64,
        horizon_days: i64,
    ) -> Result<Vec<SuggestedWindow>, EngineError> {
        if !(1..=MAX_WINDOW_DAYS).contains(&length_days) {
            return Err(EngineError::validation("length_days", "length must be between 1 and 365 days"));
        }
        let requested = Span::new(requested_start, requested_start + length_days * DAY_MS);
        validate_span(&requested)?;
        self.suggest_for_window(resource, requested, horizon_days).await
    }

    /// Alternatives around an arbitrary requested span, soonest first.
    pub async fn suggest_for_window(
        &self,
        resource: &ResourceRef,
        requested: Span,
        horizon_days: i64,
    ) -> Result<Vec<SuggestedWindow>, EngineError> {
        let Some(rs) = self.get_resource(resource) else {
            return Ok(suggest_windows(&[], requested, horizon_days));
        };
        let guard = rs.read().await;
        let horizon_end = requested.start + horizon_days.clamp(1, MAX_HORIZON_DAYS) * DAY_MS;
        let now = self.clock.now_ms();
        let booked: Vec<Span> = guard
            .occupying(&Span::new(requested.start, horizon_end), now)
            .filter_map(|r| r.window)
            .collect();
        Ok(suggest_windows(&booked, requested, horizon_days))
    }
}
