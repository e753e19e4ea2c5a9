//! Buffers a worker holds between collective operations.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::Matrix;

/// A row-block together with its offset in the partitioned matrix.
#[derive(Debug, Clone)]
pub struct HeldBlock {
    /// Rank the block was addressed to.
    pub worker: usize,
    pub offset: usize,
    pub matrix: Arc<Matrix>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("B has not been replicated to this worker")]
    MissingReplica,

    #[error("no row-block of A has been distributed to this worker")]
    MissingBlock,

    #[error("the local multiply has not run")]
    MissingProduct,

    #[error("collect asked for rows {requested:?}, this worker holds rows {held:?}")]
    BlockMismatch {
        requested: (usize, usize),
        held: (usize, usize),
    },
}

#[derive(Default)]
struct Slots {
    replica: Option<Arc<Matrix>>,
    block: Option<HeldBlock>,
    product: Option<HeldBlock>,
}

/// Thread-safe holder for the replicated B, the assigned A block and the
/// computed C block of one worker.
///
/// Receiving new inputs discards any earlier product, so a stale C block
/// can never be collected for a new run.
#[derive(Default)]
pub struct WorkerState {
    inner: RwLock<Slots>,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_replica(&self, b: Matrix) {
        let mut slots = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        slots.replica = Some(Arc::new(b));
        slots.product = None;
    }

    pub fn store_block(&self, worker: usize, offset: usize, a_block: Matrix) {
        let mut slots = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        slots.block = Some(HeldBlock {
            worker,
            offset,
            matrix: Arc::new(a_block),
        });
        slots.product = None;
    }

    /// The replicated B and the assigned A block, both required to multiply.
    pub fn inputs(&self) -> Result<(Arc<Matrix>, HeldBlock), StateError> {
        let slots = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let replica = slots.replica.clone().ok_or(StateError::MissingReplica)?;
        let block = slots.block.clone().ok_or(StateError::MissingBlock)?;
        Ok((replica, block))
    }

    pub fn store_product(&self, product: HeldBlock) {
        let mut slots = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        slots.product = Some(product);
    }

    /// The computed C block, provided it covers exactly `offset..offset + rows`.
    pub fn product(&self, offset: usize, rows: usize) -> Result<HeldBlock, StateError> {
        let slots = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let product = slots.product.as_ref().ok_or(StateError::MissingProduct)?;
        let held = (product.offset, product.matrix.rows());
        if held != (offset, rows) {
            return Err(StateError::BlockMismatch {
                requested: (offset, rows),
                held,
            });
        }
        Ok(product.clone())
    }

    pub fn clear(&self) {
        let mut slots = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slots = Slots::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_needs_both_inputs() {
        let state = WorkerState::new();
        assert_eq!(state.inputs().unwrap_err(), StateError::MissingReplica);

        state.store_replica(Matrix::zeros(2, 2).unwrap());
        assert_eq!(state.inputs().unwrap_err(), StateError::MissingBlock);

        state.store_block(1, 3, Matrix::zeros(1, 2).unwrap());
        let (b, block) = state.inputs().unwrap();
        assert_eq!(b.rows(), 2);
        assert_eq!((block.worker, block.offset), (1, 3));
    }

    #[test]
    fn product_must_match_requested_rows() {
        let state = WorkerState::new();
        assert_eq!(state.product(0, 1).unwrap_err(), StateError::MissingProduct);

        state.store_product(HeldBlock {
            worker: 1,
            offset: 2,
            matrix: Arc::new(Matrix::zeros(2, 4).unwrap()),
        });
        assert!(state.product(2, 2).is_ok());
        assert_eq!(
            state.product(0, 2).unwrap_err(),
            StateError::BlockMismatch {
                requested: (0, 2),
                held: (2, 2)
            }
        );
    }

    #[test]
    fn new_inputs_discard_old_product() {
        let state = WorkerState::new();
        state.store_product(HeldBlock {
            worker: 0,
            offset: 0,
            matrix: Arc::new(Matrix::zeros(1, 1).unwrap()),
        });
        state.store_block(0, 0, Matrix::zeros(1, 1).unwrap());
        assert_eq!(state.product(0, 1).unwrap_err(), StateError::MissingProduct);

        state.clear();
        assert_eq!(state.inputs().unwrap_err(), StateError::MissingReplica);
    }
}
