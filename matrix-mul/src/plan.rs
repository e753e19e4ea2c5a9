//! Row partitioning across workers.
//!
//! Every participant computes the same plan from `(total_rows, worker_count)`
//! alone, so no message is needed to agree on who owns which rows.

use std::ops::Range;

use crate::Error;

/// The rows owned by one worker: `offset..offset + count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBlock {
    pub worker: usize,
    pub offset: usize,
    pub count: usize,
}

impl RowBlock {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Contiguous, balanced assignment of `total_rows` rows to workers.
///
/// Worker `i` gets `total_rows / worker_count + 1` rows when
/// `i < total_rows % worker_count` and `total_rows / worker_count` otherwise,
/// so block sizes differ by at most one and the extra rows go to the
/// lowest-indexed workers. Blocks are laid out in worker order with no gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    total_rows: usize,
    blocks: Vec<RowBlock>,
}

impl PartitionPlan {
    pub fn new(total_rows: usize, worker_count: usize) -> Result<Self, Error> {
        if worker_count == 0 {
            return Err(Error::InvalidPartition {
                total_rows,
                worker_count,
            });
        }

        let base = total_rows / worker_count;
        let remainder = total_rows % worker_count;

        let mut offset = 0;
        let blocks = (0..worker_count)
            .map(|worker| {
                let count = if worker < remainder { base + 1 } else { base };
                let block = RowBlock {
                    worker,
                    offset,
                    count,
                };
                offset += count;
                block
            })
            .collect();

        Ok(Self { total_rows, blocks })
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn worker_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[RowBlock] {
        &self.blocks
    }

    pub fn block(&self, worker: usize) -> Option<&RowBlock> {
        self.blocks.get(worker)
    }

    /// `(offset, count)` pairs in worker order.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        self.blocks.iter().map(|b| (b.offset, b.count)).collect()
    }
}
