//! Distributed dense matrix multiplication.
//!
//! `matrix-mul` computes C = A × B by splitting the rows of A across
//! workers, replicating B to each of them and gathering the row-blocks of C
//! back in plan order. Workers are threads sharing one address space or
//! separate processes exchanging row-blocks over gRPC; both sit behind the
//! same [`Backend`] trait and produce the same result as a sequential
//! multiply.
//!
//! # Pipeline
//!
//! 1. [`PartitionPlan`]: every participant derives the same balanced,
//!    contiguous row assignment from `(rows, workers)`.
//! 2. Replicate B, then distribute A's row-blocks by the plan.
//! 3. Each worker runs [`kernel::multiply_block`] on its block.
//! 4. Collect C's row-blocks at the offsets of the same plan.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use matrix_mul::config::Schedule;
//! use matrix_mul::{run, Matrix, Threads};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let a = Arc::new(Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0])?);
//!     let b = Arc::new(Matrix::from_vec(2, 2, vec![5.0, 6.0, 7.0, 8.0])?);
//!
//!     let mut backend = Threads::new(2, Schedule::Static, 1);
//!     let outcome = run(&mut backend, a, b).await?;
//!
//!     assert_eq!(outcome.product.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
mod error;
pub mod grpc;
pub mod kernel;
mod matrix;
pub mod plan;
pub mod report;
pub mod state;
pub mod wire;

pub use backend::{run, Backend, Distributed, Outcome, Processes, Sequential, Threads};
pub use error::Error;
pub use matrix::Matrix;
pub use plan::{PartitionPlan, RowBlock};
