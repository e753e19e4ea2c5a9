//! gRPC service run by every worker, the coordinator's own rank included.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::Stream;
use matrix_mul_types::worker::worker_server::{Worker, WorkerServer};
use matrix_mul_types::worker::{
    Ack, CollectRequest, MultiplyRequest, MultiplyResponse, RowChunk, ShutdownRequest,
};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use crate::state::{HeldBlock, StateError, WorkerState};
use crate::wire::{self, RowAssembler};
use crate::{kernel, Error};

/// Line a spawned worker prints on stdout once it accepts connections,
/// followed by its socket address.
pub const LISTENING_PREFIX: &str = "listening on ";

#[derive(Clone)]
pub struct WorkerService {
    state: Arc<WorkerState>,
    shutdown: Arc<Notify>,
}

impl WorkerService {
    pub fn new(state: Arc<WorkerState>, shutdown: Arc<Notify>) -> Self {
        Self { state, shutdown }
    }

    async fn receive(
        &self,
        op: &'static str,
        mut stream: Streaming<RowChunk>,
    ) -> Result<(usize, usize, crate::Matrix), Status> {
        let mut assembler = RowAssembler::new(op, 0);
        while let Some(chunk) = stream.message().await? {
            assembler.push(chunk).map_err(into_status)?;
        }
        let worker = assembler.worker();
        let (offset, block) = assembler.finish().map_err(into_status)?;
        Ok((worker, offset, block))
    }
}

type CollectStream = Pin<Box<dyn Stream<Item = Result<RowChunk, Status>> + Send>>;

#[tonic::async_trait]
impl Worker for WorkerService {
    type CollectStream = CollectStream;

    async fn replicate(
        &self,
        request: Request<Streaming<RowChunk>>,
    ) -> Result<Response<Ack>, Status> {
        let (worker, _, b) = self.receive("replicate", request.into_inner()).await?;
        debug!(worker, rows = b.rows(), cols = b.cols(), "received replica of B");

        let ack = Ack {
            rows: b.rows() as u64,
            cols: b.cols() as u64,
        };
        self.state.store_replica(b);
        Ok(Response::new(ack))
    }

    async fn distribute(
        &self,
        request: Request<Streaming<RowChunk>>,
    ) -> Result<Response<Ack>, Status> {
        let (worker, offset, block) = self.receive("distribute", request.into_inner()).await?;
        debug!(worker, offset, rows = block.rows(), "received row-block of A");

        let ack = Ack {
            rows: block.rows() as u64,
            cols: block.cols() as u64,
        };
        self.state.store_block(worker, offset, block);
        Ok(Response::new(ack))
    }

    async fn multiply(
        &self,
        _request: Request<MultiplyRequest>,
    ) -> Result<Response<MultiplyResponse>, Status> {
        let (b, block) = self.state.inputs().map_err(state_status)?;

        let started = Instant::now();
        let a_block = Arc::clone(&block.matrix);
        let product = tokio::task::spawn_blocking(move || kernel::multiply_block(&a_block, &b))
            .await
            .map_err(|e| Status::internal(format!("multiply task failed: {}", e)))?
            .map_err(into_status)?;
        let elapsed = started.elapsed();

        let rows = product.rows();
        debug!(worker = block.worker, offset = block.offset, rows, ?elapsed, "local multiply done");
        self.state.store_product(HeldBlock {
            worker: block.worker,
            offset: block.offset,
            matrix: Arc::new(product),
        });

        Ok(Response::new(MultiplyResponse {
            rows: rows as u64,
            elapsed_nanos: elapsed.as_nanos() as u64,
        }))
    }

    async fn collect(
        &self,
        request: Request<CollectRequest>,
    ) -> Result<Response<Self::CollectStream>, Status> {
        let req = request.into_inner();
        let product = self
            .state
            .product(req.block_offset as usize, req.block_rows as usize)
            .map_err(state_status)?;

        let rows = product.matrix.rows();
        let chunks = wire::encode_rows(product.worker, product.offset, product.matrix, 0..rows);
        let output = async_stream::stream! {
            for chunk in chunks {
                yield Ok(chunk);
            }
        };

        Ok(Response::new(Box::pin(output)))
    }

    async fn shutdown(
        &self,
        _request: Request<ShutdownRequest>,
    ) -> Result<Response<Ack>, Status> {
        info!("shutdown requested");
        self.state.clear();
        self.shutdown.notify_one();
        Ok(Response::new(Ack::default()))
    }
}

pub fn create_server(state: Arc<WorkerState>, shutdown: Arc<Notify>) -> WorkerServer<WorkerService> {
    WorkerServer::new(WorkerService::new(state, shutdown))
}

/// Serves the worker protocol on `listener` until a `Shutdown` call arrives.
pub async fn serve(listener: TcpListener, state: Arc<WorkerState>) -> Result<(), Error> {
    let addr = listener.local_addr()?;
    let shutdown = Arc::new(Notify::new());
    let server = create_server(state, Arc::clone(&shutdown));

    info!(%addr, "worker listening");
    Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.notified().await
        })
        .await?;
    info!(%addr, "worker stopped");
    Ok(())
}

fn state_status(err: StateError) -> Status {
    warn!(%err, "rejected out-of-order call");
    Status::failed_precondition(err.to_string())
}

fn into_status(err: Error) -> Status {
    match err {
        Error::Allocation { .. } => Status::resource_exhausted(err.to_string()),
        Error::DimensionMismatch(..) | Error::Shape { .. } | Error::Communication { .. } => {
            Status::invalid_argument(err.to_string())
        }
        Error::Status(status) => status,
        other => Status::internal(other.to_string()),
    }
}
