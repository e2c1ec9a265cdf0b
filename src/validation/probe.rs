use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::engine::Engine;
use crate::model::{ConflictInfo, ResourceRef, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available,
    Conflicting(Vec<ConflictInfo>),
    /// The check did not finish in time. Treated as a pass with a warning.
    OptimisticPass,
}

/// Deadline-bounded overlap check for pre-validation. Never authoritative
/// and never cached.
#[derive(Clone)]
pub struct AvailabilityProbe {
    engine: Arc<Engine>,
    timeout: Duration,
}

impl AvailabilityProbe {
    pub fn new(engine: Arc<Engine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub async fn check(&self, resource: &ResourceRef, window: Span) -> ProbeOutcome {
        match tokio::time::timeout(self.timeout, self.engine.find_overlaps(resource, window, None)).await {
            Ok(Ok(conflicts)) if conflicts.is_empty() => ProbeOutcome::Available,
            Ok(Ok(conflicts)) => ProbeOutcome::Conflicting(conflicts),
            Ok(Err(e)) => {
                debug!("probe on {resource} skipped: {e}");
                metrics::counter!(crate::observability::PROBE_OPTIMISTIC_TOTAL).increment(1);
                ProbeOutcome::OptimisticPass
            }
            Err(_) => {
                debug!("probe on {resource} timed out after {:?}", self.timeout);
                metrics::counter!(crate::observability::PROBE_OPTIMISTIC_TOTAL).increment(1);
                ProbeOutcome::OptimisticPass
            }
        }
    }
}
