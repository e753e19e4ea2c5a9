//! Execution backends.
//!
//! Every backend exposes the same collective operations. [`run`] drives
//! them in a fixed order: replicate B, distribute A by the plan, multiply,
//! collect C by the same plan.

mod processes;
mod sequential;
mod threads;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

pub use processes::Processes;
pub use sequential::Sequential;
pub use threads::Threads;

use crate::kernel::check_compatible;
use crate::{Error, Matrix, PartitionPlan};

/// Proof that A has been distributed according to a plan.
///
/// Only a backend can create one, and [`Backend::collect`] consumes it, so
/// results are always placed with the plan that was used to hand out rows.
#[derive(Debug)]
pub struct Distributed<'plan> {
    plan: &'plan PartitionPlan,
    cols: usize,
}

impl<'plan> Distributed<'plan> {
    pub(crate) fn new(plan: &'plan PartitionPlan, cols: usize) -> Self {
        Self { plan, cols }
    }

    pub fn plan(&self) -> &'plan PartitionPlan {
        self.plan
    }

    /// Column count of the product, i.e. of B.
    pub fn cols(&self) -> usize {
        self.cols
    }
}

#[async_trait]
pub trait Backend: Send {
    fn name(&self) -> &'static str;

    /// Participants that receive a row-block.
    fn worker_count(&self) -> usize;

    /// How the run report counts participants, e.g. `"processes"`.
    fn worker_label(&self) -> &'static str;

    /// Makes B available to every worker. Returns once all workers hold it.
    async fn replicate(&mut self, b: Arc<Matrix>) -> Result<(), Error>;

    /// Hands block `i` of `plan` to worker `i`. Requires a prior replicate.
    async fn distribute<'plan>(
        &mut self,
        a: Arc<Matrix>,
        plan: &'plan PartitionPlan,
    ) -> Result<Distributed<'plan>, Error>;

    /// Runs the local multiply on every worker. Returns once all are done.
    async fn multiply(&mut self, distributed: &Distributed<'_>) -> Result<(), Error>;

    /// Assembles the product from every worker's block at its plan offset.
    async fn collect(&mut self, distributed: Distributed<'_>) -> Result<Matrix, Error>;

    /// Releases workers. Called once, after the last collect.
    async fn shutdown(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Result of one distributed multiply.
#[derive(Debug)]
pub struct Outcome {
    pub product: Matrix,
    /// Wall-clock time of the multiply phase only.
    pub elapsed: Duration,
    pub workers: usize,
    pub plan: PartitionPlan,
}

/// Computes `a · b` on `backend`.
///
/// Dimensions are checked before any data moves. The timer covers the
/// multiply step alone, excluding replication, distribution and collection.
pub async fn run<B>(backend: &mut B, a: Arc<Matrix>, b: Arc<Matrix>) -> Result<Outcome, Error>
where
    B: Backend + ?Sized,
{
    check_compatible(&a, &b)?;

    let workers = backend.worker_count();
    let plan = PartitionPlan::new(a.rows(), workers)?;
    info!(
        backend = backend.name(),
        workers,
        rows = a.rows(),
        inner = a.cols(),
        cols = b.cols(),
        "starting multiply"
    );

    backend.replicate(b).await?;
    let distributed = backend.distribute(a, &plan).await?;

    let started = Instant::now();
    backend.multiply(&distributed).await?;
    let elapsed = started.elapsed();

    let product = backend.collect(distributed).await?;
    info!(?elapsed, "multiply complete");

    Ok(Outcome {
        product,
        elapsed,
        workers,
        plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Schedule, ThreadConfig};
    use crate::kernel::multiply_sequential;

    fn pattern(n: usize) -> (Arc<Matrix>, Arc<Matrix>) {
        let a = Matrix::from_fn(n, n, |i, j| (i + j) as f64).unwrap();
        let b = Matrix::from_fn(n, n, |i, j| i as f64 - j as f64).unwrap();
        (Arc::new(a), Arc::new(b))
    }

    #[tokio::test]
    async fn threads_match_sequential_for_four_by_three() {
        let (a, b) = pattern(4);
        let expected = multiply_sequential(&a, &b).unwrap();

        let mut backend = Threads::new(3, Schedule::Static, 1);
        let outcome = run(&mut backend, a, b).await.unwrap();

        assert_eq!(outcome.plan.pairs(), vec![(0, 2), (2, 1), (3, 1)]);
        assert_eq!(outcome.product, expected);
        assert_eq!(outcome.workers, 3);
    }

    #[tokio::test]
    async fn dimension_mismatch_stops_before_work() {
        let a = Arc::new(Matrix::zeros(3, 2).unwrap());
        let b = Arc::new(Matrix::zeros(3, 3).unwrap());
        let mut backend = Sequential::new();
        let err = run(&mut backend, a, b).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch(3, 2, 3, 3)));
    }

    #[tokio::test]
    async fn empty_input_gives_empty_product() {
        let a = Arc::new(Matrix::zeros(0, 0).unwrap());
        let b = Arc::new(Matrix::zeros(0, 0).unwrap());
        for mut backend in [
            Box::new(Sequential::new()) as Box<dyn Backend>,
            Box::new(Threads::from_config(&ThreadConfig::fixed(4), 0)) as Box<dyn Backend>,
        ] {
            let outcome = run(backend.as_mut(), Arc::clone(&a), Arc::clone(&b))
                .await
                .unwrap();
            assert_eq!((outcome.product.rows(), outcome.product.cols()), (0, 0));
        }
    }

    #[tokio::test]
    async fn random_hundred_on_four_workers() {
        let a = Arc::new(Matrix::random(100, 100, 1).unwrap());
        let b = Arc::new(Matrix::random(100, 100, 2).unwrap());
        let expected = multiply_sequential(&a, &b).unwrap();

        for schedule in [Schedule::Static, Schedule::Dynamic] {
            let mut backend = Threads::new(4, schedule, 7);
            let outcome = run(&mut backend, Arc::clone(&a), Arc::clone(&b))
                .await
                .unwrap();
            assert!(outcome.product.approx_eq(&expected, 1e-9));
            let secs = outcome.elapsed.as_secs_f64();
            assert!(secs > 0.0 && secs.is_finite());
        }
    }
}
