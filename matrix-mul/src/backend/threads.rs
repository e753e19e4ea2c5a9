//! Shared-memory backend: worker threads in one address space.
//!
//! Replicate and distribute only share `Arc`s. Each thread writes a
//! disjoint slice of the output, so neither the inputs nor the product need
//! a lock during the multiply.

use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::debug;

use super::{Backend, Distributed};
use crate::config::{Schedule, ThreadConfig};
use crate::{kernel, Error, Matrix, PartitionPlan};

#[derive(Debug)]
pub struct Threads {
    threads: usize,
    schedule: Schedule,
    chunk_rows: usize,
    b: Option<Arc<Matrix>>,
    a: Option<Arc<Matrix>>,
    product: Option<Matrix>,
}

impl Threads {
    pub fn new(threads: usize, schedule: Schedule, chunk_rows: usize) -> Self {
        Self {
            threads: threads.max(1),
            schedule,
            chunk_rows: chunk_rows.max(1),
            b: None,
            a: None,
            product: None,
        }
    }

    /// Picks the thread count for an operand of `elements` elements.
    pub fn from_config(config: &ThreadConfig, elements: usize) -> Self {
        Self::new(
            config.thread_count(elements),
            config.schedule,
            config.chunk_rows,
        )
    }
}

#[async_trait]
impl Backend for Threads {
    fn name(&self) -> &'static str {
        "threads"
    }

    fn worker_count(&self) -> usize {
        self.threads
    }

    fn worker_label(&self) -> &'static str {
        "threads used"
    }

    async fn replicate(&mut self, b: Arc<Matrix>) -> Result<(), Error> {
        self.b = Some(b);
        self.product = None;
        Ok(())
    }

    async fn distribute<'plan>(
        &mut self,
        a: Arc<Matrix>,
        plan: &'plan PartitionPlan,
    ) -> Result<Distributed<'plan>, Error> {
        let b = self
            .b
            .as_ref()
            .ok_or_else(|| Error::communication("distribute", 0, "B was not replicated"))?;
        if plan.worker_count() != self.threads || plan.total_rows() != a.rows() {
            return Err(Error::InvalidPartition {
                total_rows: a.rows(),
                worker_count: plan.worker_count(),
            });
        }
        let cols = b.cols();
        self.a = Some(a);
        self.product = None;
        Ok(Distributed::new(plan, cols))
    }

    async fn multiply(&mut self, distributed: &Distributed<'_>) -> Result<(), Error> {
        let (Some(a), Some(b)) = (self.a.clone(), self.b.clone()) else {
            return Err(Error::communication("multiply", 0, "inputs were not delivered"));
        };
        let plan = distributed.plan().clone();
        let schedule = self.schedule;
        let threads = self.threads;
        let chunk_rows = self.chunk_rows;

        let product = tokio::task::spawn_blocking(move || match schedule {
            Schedule::Static => multiply_static(&a, &b, &plan),
            Schedule::Dynamic => multiply_dynamic(&a, &b, threads, chunk_rows),
        })
        .await??;

        self.product = Some(product);
        Ok(())
    }

    async fn collect(&mut self, distributed: Distributed<'_>) -> Result<Matrix, Error> {
        let product = self
            .product
            .take()
            .ok_or_else(|| Error::communication("collect", 0, "multiply has not run"))?;
        debug_assert_eq!(product.rows(), distributed.plan().total_rows());
        debug_assert_eq!(product.cols(), distributed.cols());
        Ok(product)
    }
}

/// One thread per plan block, each writing its own rows of C.
fn multiply_static(a: &Matrix, b: &Matrix, plan: &PartitionPlan) -> Result<Matrix, Error> {
    let m = b.cols();
    let k = a.cols();
    let mut c = Matrix::zeros(a.rows(), m)?;

    thread::scope(|scope| {
        let mut rest = c.as_mut_slice();
        let mut handles = Vec::with_capacity(plan.worker_count());
        for block in plan.blocks() {
            let (out, tail) = std::mem::take(&mut rest).split_at_mut(block.count * m);
            rest = tail;
            if block.is_empty() {
                continue;
            }
            let a_rows = a.rows_slice(block.offset, block.count);
            let worker = block.worker;
            handles.push((
                worker,
                scope.spawn(move || kernel::multiply_rows_into(a_rows, k, b, out)),
            ));
        }
        for (worker, handle) in handles {
            handle
                .join()
                .map_err(|_| Error::communication("multiply", worker, "thread panicked"))?;
        }
        Ok::<_, Error>(())
    })?;

    Ok(c)
}

/// A pool of `threads` threads works through `chunk_rows`-row chunks of C,
/// each chunk computed exactly once by whichever thread picks it up.
fn multiply_dynamic(
    a: &Matrix,
    b: &Matrix,
    threads: usize,
    chunk_rows: usize,
) -> Result<Matrix, Error> {
    let m = b.cols();
    let k = a.cols();
    let mut c = Matrix::zeros(a.rows(), m)?;
    if c.is_empty() {
        return Ok(c);
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Spawn {
            worker: 0,
            reason: e.to_string(),
        })?;

    pool.install(|| {
        c.as_mut_slice()
            .par_chunks_mut(chunk_rows * m)
            .enumerate()
            .for_each(|(i, out)| {
                let a_rows = a.rows_slice(i * chunk_rows, out.len() / m);
                kernel::multiply_rows_into(a_rows, k, b, out);
            });
    });
    debug!(threads, chunk_rows, "dynamic multiply done");

    Ok(c)
}
