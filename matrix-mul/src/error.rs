//! Error types for matrix-mul operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("usage: {0}")]
    Usage(String),

    #[error("matrix dimension mismatch: A is {0}x{1}, B is {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),

    #[error("cannot allocate a {rows}x{cols} matrix")]
    Allocation { rows: usize, cols: usize },

    #[error("{len} values do not form a {rows}x{cols} matrix")]
    Shape { rows: usize, cols: usize, len: usize },

    #[error("invalid partition: {total_rows} rows across {worker_count} workers")]
    InvalidPartition {
        total_rows: usize,
        worker_count: usize,
    },

    #[error("{op} failed on worker {worker}: {reason}")]
    Communication {
        op: &'static str,
        worker: usize,
        reason: String,
    },

    #[error("cannot launch worker {worker}: {reason}")]
    Spawn { worker: usize, reason: String },

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC status error: {0}")]
    Status(#[from] tonic::Status),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn communication(op: &'static str, worker: usize, reason: impl ToString) -> Self {
        Error::Communication {
            op,
            worker,
            reason: reason.to_string(),
        }
    }
}
