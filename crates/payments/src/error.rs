//! Error types for the payments crate

use crate::processor::ProcessorError;

pub type PaymentsResult<T> = Result<T, PaymentsError>;

/// Errors surfaced by the reconciliation flow.
///
/// Terminal business rejections (stale charge, wrong user, duplicate) are
/// NOT errors; they are [`crate::ReconciliationOutcome`] variants. An error
/// here means the flow could not run to a decision at all.
#[derive(Debug, thiserror::Error)]
pub enum PaymentsError {
    /// Charge lookup against the commerce processor failed
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Store read or write failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A charge record vanished between the conflict and the re-read
    #[error("charge {0} missing from store after insert conflict")]
    ChargeMissing(String),
}

impl PaymentsError {
    /// Whether the caller should retry (webhook path: respond 500 so the
    /// processor redelivers; manual path: tell the client to poll again).
    pub fn is_transient(&self) -> bool {
        match self {
            PaymentsError::Processor(ProcessorError::Transient(_)) => true,
            PaymentsError::Processor(ProcessorError::NotFound) => false,
            PaymentsError::Database(_) => true,
            PaymentsError::ChargeMissing(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PaymentsError::Processor(ProcessorError::Transient("timeout".into())).is_transient());
        assert!(!PaymentsError::Processor(ProcessorError::NotFound).is_transient());
        assert!(PaymentsError::ChargeMissing("ch_1".into()).is_transient());
    }
}
