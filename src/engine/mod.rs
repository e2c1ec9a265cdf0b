mod error;
mod gaps;
mod mutations;
mod overlap;
mod queries;
mod transitions;
mod unit;

pub use error::{EngineError, OverlapConflict};
pub use gaps::suggest_windows;
pub use transitions::is_allowed as is_transition_allowed;
pub use unit::UnitOfWork;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::warn;

use crate::clock::Clock;
use crate::collaborators::{Collaborators, Notification};
use crate::config::BookingPolicy;
use crate::model::*;
use crate::sequence::SequenceAllocator;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) type Reply<T> = oneshot::Sender<io::Result<T>>;

pub(super) enum WalCommand {
    /// One unit of work to make durable.
    Commit { commit: Commit, reply: Reply<()> },
    /// Replace the log with a snapshot of applied state.
    Compact { snapshot: Vec<Commit>, reply: Reply<()> },
    AppendsSinceCompact { reply: oneshot::Sender<u64> },
}

/// Owns the WAL. Every unit of work queued while the previous group was being
/// written joins the next group, which is synced once. A group is durable as a
/// whole or not at all, and each waiting unit hears the group's outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (commit, reply) = match cmd {
            WalCommand::Commit { commit, reply } => (commit, reply),
            other => {
                run_maintenance(&mut wal, other);
                continue;
            }
        };

        let mut group = vec![(commit, reply)];
        let mut maintenance = None;
        while maintenance.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Commit { commit, reply }) => group.push((commit, reply)),
                Ok(other) => maintenance = Some(other),
                Err(_) => break,
            }
        }

        commit_group(&mut wal, group);
        if let Some(cmd) = maintenance {
            run_maintenance(&mut wal, cmd);
        }
    }
}

fn commit_group(wal: &mut Wal, group: Vec<(Commit, Reply<()>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(group.len() as f64);
    let started = std::time::Instant::now();

    // A unit that cannot be encoded fails alone; the rest of the group proceeds.
    let mut waiting = Vec::with_capacity(group.len());
    for (commit, reply) in group {
        match wal.stage(&commit) {
            Ok(()) => waiting.push(reply),
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }
    let outcome = wal.commit_staged();
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let (Err(e), false) = (&outcome, waiting.is_empty()) {
        metrics::counter!(crate::observability::WAL_COMMIT_FAILURES_TOTAL).increment(1);
        warn!("WAL group commit of {} units rolled back: {e}", waiting.len());
    }
    for reply in waiting {
        let _ = reply.send(match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn run_maintenance(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { snapshot, reply } => {
            let _ = reply.send(wal.compact(&snapshot));
        }
        WalCommand::AppendsSinceCompact { reply } => {
            // A poisoned log only recovers through compaction.
            let appends = if wal.is_poisoned() { u64::MAX } else { wal.appends_since_compact() };
            let _ = reply.send(appends);
        }
        WalCommand::Commit { commit, reply } => commit_group(wal, vec![(commit, reply)]),
    }
}

/// The availability and concurrency engine.
///
/// Each resource's reservations live behind their own lock; every mutation
/// runs as a [`UnitOfWork`] holding that lock and is made durable through the
/// WAL before it is applied in memory.
pub struct Engine {
    state: DashMap<ResourceRef, SharedResourceState>,
    /// Reverse lookup: reservation id → resource.
    reservation_index: DashMap<ReservationId, ResourceRef>,
    sequences: SequenceAllocator,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Units of work hold it shared; compaction holds it exclusively.
    commit_gate: RwLock<()>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> io::Result<Self> {
        let (wal, commits) = Wal::open(&wal_path)?;
        Self::with_wal(wal, commits, collaborators, clock, policy)
    }

    /// Rebuild state from already recovered `commits` and take ownership of `wal`.
    pub(crate) fn with_wal(
        wal: Wal,
        commits: Vec<Commit>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> io::Result<Self> {
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            reservation_index: DashMap::new(),
            sequences: SequenceAllocator::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            collaborators,
            clock,
            policy,
        };

        // We're the sole owner of these Arcs, so try_write always succeeds instantly.
        // Never use blocking_write here: this runs inside an async context.
        for commit in &commits {
            for event in &commit.events {
                let resource = match event {
                    Event::SequenceAdvanced { day, value } => {
                        engine.sequences.observe(*day, *value);
                        continue;
                    }
                    Event::ReservationCreated(r) => r.resource,
                    Event::StatusChanged { resource, .. } => *resource,
                };
                let rs = engine.get_or_create_resource(&resource);
                let mut guard = rs
                    .try_write()
                    .map_err(|_| io::Error::other("replay: resource state contended"))?;
                engine.apply_event(&mut guard, event);
            }
        }

        Ok(engine)
    }

    /// Write a commit to the WAL via the background group-commit writer.
    async fn wal_append(&self, commit: &Commit) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Commit {
                commit: commit.clone(),
                reply: tx,
            })
            .await
            .map_err(|_| EngineError::Infrastructure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Infrastructure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Infrastructure(format!("WAL error: {e}")))
    }

    /// Apply a committed event to a resource (no locking, caller holds the lock).
    fn apply_event(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::SequenceAdvanced { day, value } => self.sequences.observe(*day, *value),
            Event::ReservationCreated(reservation) => {
                self.reservation_index
                    .insert(reservation.id.clone(), reservation.resource);
                rs.insert_reservation((**reservation).clone());
            }
            Event::StatusChanged {
                id,
                to,
                payment_status,
                reason,
                at,
                ..
            } => rs.apply_status(id, *to, *payment_status, reason.clone(), *at),
        }
    }

    pub fn get_resource(&self, resource: &ResourceRef) -> Option<SharedResourceState> {
        self.state.get(resource).map(|e| e.value().clone())
    }

    fn get_or_create_resource(&self, resource: &ResourceRef) -> SharedResourceState {
        self.state
            .entry(*resource)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceState::new(*resource))))
            .value()
            .clone()
    }

    pub fn get_resource_for_reservation(&self, id: &ReservationId) -> Option<ResourceRef> {
        self.reservation_index.get(id).map(|e| *e.value())
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn sequences(&self) -> &SequenceAllocator {
        &self.sequences
    }

    /// Fire-and-forget notification. Failures are logged and counted, never returned.
    pub(super) fn dispatch(&self, notification: Notification) {
        let notifier = self.collaborators.notifier.clone();
        tokio::spawn(async move {
            let id = notification.reservation_id.clone();
            if let Err(e) = notifier.dispatch(notification).await {
                metrics::counter!(crate::observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
                warn!("notification for {id} failed: {e}");
            }
        });
    }

    /// Compact the WAL into a single snapshot commit of the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events: Vec<Event> = self
            .sequences
            .snapshot()
            .into_iter()
            .map(|(day, value)| Event::SequenceAdvanced { day, value })
            .collect();

        let states: Vec<SharedResourceState> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut reservations = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            reservations.extend(guard.reservations.values().cloned());
        }
        reservations.sort_by(|a, b| a.id.cmp(&b.id));
        events.extend(
            reservations
                .into_iter()
                .map(|r| Event::ReservationCreated(Box::new(r))),
        );

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                snapshot: vec![Commit { events }],
                reply: tx,
            })
            .await
            .map_err(|_| EngineError::Infrastructure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Infrastructure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Infrastructure(format!("WAL compaction failed: {e}")))
    }

    /// Commits written since the last compaction; `u64::MAX` while the log is poisoned.
    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { reply: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
