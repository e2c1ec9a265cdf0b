use crate::model::{Ms, DAY_MS};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_WINDOW_DAYS: i64 = 365;
pub const MAX_WINDOW_MS: Ms = MAX_WINDOW_DAYS * DAY_MS;

pub const MAX_QUANTITY: u32 = 100;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;

/// Pending plus confirmed reservations on one resource. Terminal ones do not count.
pub const MAX_ACTIVE_RESERVATIONS_PER_RESOURCE: usize = 100_000;
pub const MAX_DAILY_SEQUENCE: u32 = 9_999;

pub const MAX_SUGGESTIONS: usize = 5;
pub const MAX_HORIZON_DAYS: i64 = 365;

/// Drafts starting further out than this get a warning.
pub const FAR_FUTURE_DAYS: i64 = 365;
