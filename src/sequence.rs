use std::fmt;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::limits::MAX_DAILY_SEQUENCE;
use crate::model::{Ms, ReservationId};

/// A calendar day in local time. Sequences reset when it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The local calendar day containing `instant`.
    pub fn for_instant(instant: Ms) -> Self {
        let date = Local
            .timestamp_millis_opt(instant)
            .single()
            .map(|dt| dt.date_naive())
            .or_else(|| DateTime::from_timestamp_millis(instant).map(|dt| dt.date_naive()))
            .unwrap_or_default();
        Self(date)
    }

    /// Parse the compact `YYYYMMDD` form used inside identifiers.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 8 {
            return None;
        }
        NaiveDate::parse_from_str(s, "%Y%m%d").ok().map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

/// Issues globally unique, day-scoped reservation identifiers.
///
/// One counter per calendar day, created on first use. Each increment happens
/// under the counter's map-shard write lock, so concurrent callers for the same
/// day always observe distinct values.
#[derive(Default)]
pub struct SequenceAllocator {
    counters: DashMap<DayKey, u32>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-increment-write against the day's counter. The first caller of a day gets 1.
    pub fn allocate_next(&self, day: DayKey) -> Result<(ReservationId, u32), EngineError> {
        let mut counter = self.counters.entry(day).or_insert(0);
        if *counter >= MAX_DAILY_SEQUENCE {
            return Err(EngineError::LimitExceeded("daily reservation sequence exhausted"));
        }
        *counter += 1;
        let value = *counter;
        Ok((ReservationId::new(day, value), value))
    }

    /// Give back `value` if it is still the most recent allocation for `day`.
    /// Returns false when a later number was already handed out, leaving a gap.
    pub fn rollback(&self, day: DayKey, value: u32) -> bool {
        match self.counters.get_mut(&day) {
            Some(mut counter) if *counter == value => {
                *counter -= 1;
                true
            }
            _ => false,
        }
    }

    /// Raise the day's counter to at least `value` (WAL replay, commit apply).
    pub fn observe(&self, day: DayKey, value: u32) {
        let mut counter = self.counters.entry(day).or_insert(0);
        *counter = (*counter).max(value);
    }

    pub fn current(&self, day: DayKey) -> u32 {
        self.counters.get(&day).map(|c| *c).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<(DayKey, u32)> {
        let mut all: Vec<(DayKey, u32)> = self.counters.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort();
        all
    }
}
