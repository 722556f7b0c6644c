//! Tagged result of a pipeline stage.

/// How a stage ended. The orchestrator decides what to do next with one
/// `match` per stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// The stage produced its normal output.
    Success(T),
    /// The stage fell back to a deterministic substitute.
    Degraded { value: T, reason: String },
    /// The stage produced nothing; later stages work around it.
    Skip { reason: String },
    /// The run cannot continue.
    Fatal { reason: String },
}

impl<T> StageOutcome<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self::Degraded {
            value,
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }
}
