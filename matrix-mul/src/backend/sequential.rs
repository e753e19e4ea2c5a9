//! Single-worker backend: the reference against which the others are checked.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Backend, Distributed};
use crate::{kernel, Error, Matrix, PartitionPlan};

#[derive(Debug, Default)]
pub struct Sequential {
    b: Option<Arc<Matrix>>,
    a: Option<Arc<Matrix>>,
    product: Option<Matrix>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn worker_count(&self) -> usize {
        1
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
        let cols = b.cols();
        self.a = Some(a);
        Ok(Distributed::new(plan, cols))
    }

    async fn multiply(&mut self, _distributed: &Distributed<'_>) -> Result<(), Error> {
        let (Some(a), Some(b)) = (&self.a, &self.b) else {
            return Err(Error::communication("multiply", 0, "inputs were not delivered"));
        };
        self.product = Some(kernel::multiply_sequential(a, b)?);
        Ok(())
    }

    async fn collect(&mut self, distributed: Distributed<'_>) -> Result<Matrix, Error> {
        let product = self
            .product
            .take()
            .ok_or_else(|| Error::communication("collect", 0, "multiply has not run"))?;
        let plan = distributed.plan();
        if product.rows() != plan.total_rows() || product.cols() != distributed.cols() {
            return Err(Error::communication(
                "collect",
                0,
                format!(
                    "product is {}x{}, plan expects {}x{}",
                    product.rows(),
                    product.cols(),
                    plan.total_rows(),
                    distributed.cols()
                ),
            ));
        }
        Ok(product)
    }
}
