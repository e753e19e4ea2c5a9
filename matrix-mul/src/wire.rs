//! Row-chunk framing for matrices that cross a process boundary.
//!
//! A row-block is sent as a sequence of [`RowChunk`]s, each carrying the
//! block header and a run of consecutive rows. Chunks stay under a fixed
//! value budget so large matrices never hit a gRPC message size limit.

use std::ops::Range;
use std::sync::Arc;

use matrix_mul_types::worker::RowChunk;

use crate::{Error, Matrix};

/// Upper bound on values per chunk (512 KiB of `f64`).
pub const CHUNK_VALUES: usize = 64 * 1024;

/// Lazily splits `source[rows]` into chunks.
///
/// The chunks describe a block that starts at `block_offset` in the matrix
/// being partitioned, which need not be where the rows sit in `source`.
/// An empty block still produces one header-only chunk so the receiver
/// learns its shape.
pub fn encode_rows(
    worker: usize,
    block_offset: usize,
    source: Arc<Matrix>,
    rows: Range<usize>,
) -> impl Iterator<Item = RowChunk> + Send + 'static {
    let cols = source.cols();
    let block_rows = rows.len();
    let header_only = block_rows == 0 || cols == 0;
    let rows_per_chunk = if header_only {
        block_rows.max(1)
    } else {
        (CHUNK_VALUES / cols).max(1)
    };
    let chunk_count = if header_only {
        1
    } else {
        block_rows.div_ceil(rows_per_chunk)
    };

    (0..chunk_count).map(move |n| {
        let first_row = n * rows_per_chunk;
        let count = rows_per_chunk.min(block_rows - first_row);
        let values = if header_only {
            Vec::new()
        } else {
            source.rows_slice(rows.start + first_row, count).to_vec()
        };
        RowChunk {
            block_offset: block_offset as u64,
            block_rows: block_rows as u64,
            cols: cols as u64,
            first_row: first_row as u64,
            rows: count as u64,
            values,
            worker: worker as u64,
        }
    })
}

/// Reassembles a row-block from its chunks, rejecting anything that would
/// misplace a row.
#[derive(Debug)]
pub struct RowAssembler {
    op: &'static str,
    worker: usize,
    header: Option<Header>,
    next_row: usize,
    data: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    block_offset: usize,
    block_rows: usize,
    cols: usize,
}

impl RowAssembler {
    pub fn new(op: &'static str, worker: usize) -> Self {
        Self {
            op,
            worker,
            header: None,
            next_row: 0,
            data: Vec::new(),
        }
    }

    /// Rank carried by the first chunk, or the one given to [`RowAssembler::new`].
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn push(&mut self, chunk: RowChunk) -> Result<(), Error> {
        let header = Header {
            block_offset: chunk.block_offset as usize,
            block_rows: chunk.block_rows as usize,
            cols: chunk.cols as usize,
        };

        match self.header {
            None => {
                let too_big = Error::Allocation {
                    rows: header.block_rows,
                    cols: header.cols,
                };
                let len = header.block_rows.checked_mul(header.cols).ok_or(too_big)?;
                self.data
                    .try_reserve_exact(len)
                    .map_err(|_| Error::Allocation {
                        rows: header.block_rows,
                        cols: header.cols,
                    })?;
                self.header = Some(header);
                self.worker = chunk.worker as usize;
            }
            Some(expected) if expected != header => {
                return Err(self.fail(format!(
                    "chunk header {:?} does not match {:?}",
                    header, expected
                )));
            }
            Some(_) => {}
        }

        let first_row = chunk.first_row as usize;
        let rows = chunk.rows as usize;
        if first_row != self.next_row {
            return Err(self.fail(format!(
                "expected row {}, got chunk starting at row {}",
                self.next_row, first_row
            )));
        }
        if first_row
            .checked_add(rows)
            .filter(|&end| end <= header.block_rows)
            .is_none()
        {
            return Err(self.fail(format!(
                "{} rows from row {} exceed block of {} rows",
                rows, first_row, header.block_rows
            )));
        }
        if rows.checked_mul(header.cols) != Some(chunk.values.len()) {
            return Err(self.fail(format!(
                "chunk of {} rows x {} cols carries {} values",
                rows,
                header.cols,
                chunk.values.len()
            )));
        }

        self.data.extend_from_slice(&chunk.values);
        self.next_row += rows;
        Ok(())
    }

    /// Returns `(block_offset, block)` once every row has arrived.
    pub fn finish(self) -> Result<(usize, Matrix), Error> {
        let Some(header) = self.header else {
            return Err(self.fail("stream ended before any chunk arrived"));
        };
        if self.next_row != header.block_rows {
            return Err(self.fail(format!(
                "stream ended after {} of {} rows",
                self.next_row, header.block_rows
            )));
        }
        let block = Matrix::from_vec(header.block_rows, header.cols, self.data)?;
        Ok((header.block_offset, block))
    }

    fn fail(&self, reason: impl ToString) -> Error {
        Error::communication(self.op, self.worker, reason)
    }
}
