use thiserror::Error;

/// Failure modes of the merge engine. All of these abort the operation;
/// a partially written output file is left for the caller to discard.
#[derive(Error, Debug)]
pub enum ConciseError {
    #[error("Variable schemas are inconsistent between granules at {var_path}")]
    InconsistentSchema { var_path: String },

    #[error("A staged variable of {needed} bytes exceeds the staging budget of {budget} bytes")]
    MemoryBudgetExceeded { needed: usize, budget: usize },

    #[error("Merging failed - {detail}")]
    MergeFailed { detail: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Invariant violation: {detail}")]
    InvariantViolation { detail: String },

    #[error(transparent)]
    Netcdf(#[from] netcdf::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConciseError>;
