use thiserror::Error;

/// Failure taxonomy for one reconciliation step. `Config` is fatal for
/// the controller; `Venue` is transient and the phase is retried on the
/// next tick.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("venue error: {0}")]
    Venue(#[from] anyhow::Error),
}

impl StepError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Config(_))
    }
}

pub type StepResult<T> = Result<T, StepError>;
