use thiserror::Error;

pub type Result<T> = std::result::Result<T, NeurofieldError>;

#[derive(Error, Debug)]
pub enum NeurofieldError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Geometry failure: {0}")]
    Geometry(String),

    #[error("Tissue radius failure: {0}")]
    RadiusEstimation(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Track container error: {0}")]
    TrackContainer(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NeurofieldError {
    /// Process exit code for the batch entry points.
    pub fn exit_code(&self) -> i32 {
        match self {
            NeurofieldError::InvalidInput(_)
            | NeurofieldError::DimensionMismatch { .. }
            | NeurofieldError::Cancelled
            | NeurofieldError::Serialization(_)
            | NeurofieldError::TrackContainer(_)
            | NeurofieldError::Io(_) => 1,
            NeurofieldError::Geometry(_) => 2,
            NeurofieldError::RadiusEstimation(_) => 3,
            NeurofieldError::Numerical(_) => 4,
        }
    }
}
