use tokio::sync::{OwnedRwLockWriteGuard, RwLockReadGuard};
use tracing::debug;

use crate::model::*;
use crate::sequence::{DayKey, SequenceAllocator};

use super::{Engine, EngineError};

/// The atomic read/modify/write region for one resource.
///
/// Holds the resource's write lock for its whole life, so the overlap read and
/// the insert are serialized against every other writer of that resource.
/// Events are staged and only become visible on `Engine::commit`; dropping an
/// uncommitted unit discards them and hands back any identifier it allocated.
pub struct UnitOfWork<'a> {
    _gate: RwLockReadGuard<'a, ()>,
    pub(super) state: OwnedRwLockWriteGuard<ResourceState>,
    staged: Vec<Event>,
    sequences: &'a SequenceAllocator,
    allocated: Option<(DayKey, u32)>,
}

impl<'a> UnitOfWork<'a> {
    pub fn state(&self) -> &ResourceState {
        &self.state
    }

    pub fn stage(&mut self, event: Event) {
        self.staged.push(event);
    }

    pub fn staged(&self) -> &[Event] {
        &self.staged
    }

    /// Allocate the next identifier for `day` as part of this unit.
    pub fn allocate_id(&mut self, day: DayKey) -> Result<ReservationId, EngineError> {
        let (id, value) = self.sequences.allocate_next(day)?;
        self.allocated = Some((day, value));
        self.stage(Event::SequenceAdvanced { day, value });
        Ok(id)
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if let Some((day, value)) = self.allocated.take() {
            if self.sequences.rollback(day, value) {
                debug!("aborted unit returned sequence {value} for {day}");
            } else {
                debug!("aborted unit left a gap at sequence {value} for {day}");
            }
        }
    }
}

impl Engine {
    /// Open a unit of work on `resource`, creating its state on first use.
    pub(crate) async fn begin(&self, resource: &ResourceRef) -> UnitOfWork<'_> {
        let gate = self.commit_gate.read().await;
        let rs = self.get_or_create_resource(resource);
        let state = rs.write_owned().await;
        UnitOfWork {
            _gate: gate,
            state,
            staged: Vec::new(),
            sequences: &self.sequences,
            allocated: None,
        }
    }

    /// Durably append every staged event as one WAL entry, then apply them.
    /// On error nothing is applied and the unit stays uncommitted.
    pub(crate) async fn commit(&self, unit: &mut UnitOfWork<'_>) -> Result<(), EngineError> {
        if unit.staged.is_empty() {
            return Ok(());
        }
        let commit = Commit {
            events: std::mem::take(&mut unit.staged),
        };
        if let Err(e) = self.wal_append(&commit).await {
            unit.staged = commit.events;
            return Err(e);
        }
        for event in &commit.events {
            self.apply_event(&mut unit.state, event);
        }
        unit.allocated = None;
        Ok(())
    }
}
