use crate::collaborators::CollaboratorError;
use crate::model::{ConflictInfo, ReservationStatus, ResourceRef, Span, SuggestedWindow};

/// The requested window is taken. Carries what is in the way and where else to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapConflict {
    pub resource: ResourceRef,
    pub requested: Span,
    pub conflicting: Vec<ConflictInfo>,
    pub suggestions: Vec<SuggestedWindow>,
}

impl std::fmt::Display for OverlapConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "window [{}, {}) on {} overlaps {} existing reservation(s)",
            self.requested.start,
            self.requested.end,
            self.resource,
            self.conflicting.len()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed on {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Overlap(Box<OverlapConflict>),

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The structured overlap detail, if this is an overlap conflict.
    pub fn overlap(&self) -> Option<&OverlapConflict> {
        match self {
            EngineError::Overlap(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<CollaboratorError> for EngineError {
    fn from(e: CollaboratorError) -> Self {
        EngineError::Infrastructure(e.to_string())
    }
}
