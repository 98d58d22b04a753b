//! Error handling.
//!
//! `SimError` carries a [`SimReason`] discriminant plus the context a
//! fatal-abort log line needs: which instruction, which field, and a
//! free-form message. `EngineError` is the two-tier split the runner
//! uses to choose an exit code: a `Fatal` simulator error (taxonomy
//! classes 1-4 of the error handling design) versus an `Io` dump-file
//! failure (class 5).

use dpu_isa::SimReason;

/// A fatal simulator error: a `SimReason` plus the instruction and
/// field it was raised against.
#[derive(Debug, Clone)]
pub struct SimError {
    /// The error-class discriminant.
    pub reason: SimReason,
    /// Index of the instruction being processed when the error was raised.
    pub instruction_index: usize,
    /// Name of the offending field, if the error is field-specific.
    pub field: Option<&'static str>,
    /// A structured message describing the offending values.
    pub message: String,
}

impl SimError {
    /// Builds a new error with no associated field.
    pub fn new(reason: SimReason, instruction_index: usize, message: impl Into<String>) -> Self {
        Self { reason, instruction_index, field: None, message: message.into() }
    }

    /// Builds a new error naming the offending field.
    pub fn with_field(
        reason: SimReason,
        instruction_index: usize,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self { reason, instruction_index, field: Some(field), message: message.into() }
    }

}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.field {
            Some(field) => write!(
                f,
                "{} at instruction {} (field `{field}`): {}",
                self.reason, self.instruction_index, self.message
            ),
            None => write!(f, "{} at instruction {}: {}", self.reason, self.instruction_index, self.message),
        }
    }
}

impl std::error::Error for SimError {}

/// Top-level error returned by the execution engine.
///
/// Per the concurrency & resource model, there is no recovery path for
/// either variant -- the run always aborts. The split exists so the
/// top-level runner can pick distinct exit codes and log formats for a
/// simulator-taxonomy failure versus a dump-file I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A fatal simulator error (error handling design taxonomy classes 1-4).
    #[error(transparent)]
    Fatal(#[from] SimError),
    /// A dump-trace file I/O failure (taxonomy class 5).
    #[error("dump I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this is a simulator-taxonomy error as opposed to I/O.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }

    /// The process exit code the runner should use for this error, per
    /// the external-interfaces exit-code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Fatal(err) => 1 + (err.reason as i32),
            EngineError::Io(_) => 100,
        }
    }
}

/// Convenience alias for fallible engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
/// Convenience alias for fallible kernel/memory operations that never
/// touch the filesystem.
pub type SimResult<T> = Result<T, SimError>;
