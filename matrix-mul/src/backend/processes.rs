//! Process-parallel backend: workers are separate OS processes and every
//! byte they see arrives through a gRPC collective.
//!
//! Rank 0 is the coordinator. It serves the worker protocol in-process and
//! talks to that service over loopback exactly as it talks to the others,
//! so its row-block takes the same path as every remote one.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use futures_util::stream;
use matrix_mul_types::worker::worker_client::WorkerClient;
use matrix_mul_types::worker::{CollectRequest, MultiplyRequest, ShutdownRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use super::{Backend, Distributed};
use crate::config::ProcessConfig;
use crate::grpc::{self, LISTENING_PREFIX};
use crate::state::WorkerState;
use crate::wire::{self, RowAssembler};
use crate::{Error, Matrix, PartitionPlan};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Connection to one participant.
struct RemoteWorker {
    rank: usize,
    addr: String,
    client: WorkerClient<Channel>,
}

impl RemoteWorker {
    async fn connect(rank: usize, addr: String) -> Result<Self, Error> {
        let endpoint = Endpoint::from_shared(format!("http://{}", addr))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::communication("connect", rank, format!("{}: {}", addr, e)))?;
        debug!(rank, %addr, "connected to worker");
        Ok(Self {
            rank,
            addr,
            client: WorkerClient::new(channel),
        })
    }
}

pub struct Processes {
    workers: Vec<RemoteWorker>,
    children: Vec<Child>,
    local: Option<JoinHandle<Result<(), Error>>>,
    b_shape: Option<(usize, usize)>,
}

impl Processes {
    /// Brings up every participant and connects to it.
    ///
    /// Rank 0 is served from this process. Ranks `1..` are the configured
    /// peers if any, otherwise freshly spawned `<program> worker` children.
    /// Any failure aborts the whole launch; children already started are
    /// killed when the partial backend is dropped.
    pub async fn launch(config: &ProcessConfig) -> Result<Self, Error> {
        let count = config.worker_count();
        let mut this = Self {
            workers: Vec::with_capacity(count),
            children: Vec::new(),
            local: None,
            b_shape: None,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let mut addrs = vec![listener.local_addr()?.to_string()];
        this.local = Some(tokio::spawn(grpc::serve(
            listener,
            Arc::new(WorkerState::new()),
        )));

        if config.peers.is_empty() {
            let program = match &config.program {
                Some(program) => program.clone(),
                None => std::env::current_exe()?,
            };
            for rank in 1..count {
                let (child, addr) = spawn_worker(&program, rank, config.startup_timeout).await?;
                this.children.push(child);
                addrs.push(addr);
            }
        } else {
            addrs.extend(config.peers.iter().cloned());
        }

        for (rank, addr) in addrs.into_iter().enumerate() {
            let worker = RemoteWorker::connect(rank, addr).await?;
            this.workers.push(worker);
        }

        info!(workers = this.workers.len(), "all workers connected");
        Ok(this)
    }

    /// Addresses of the participants in rank order.
    pub fn addresses(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.addr.as_str()).collect()
    }
}

/// Starts `<program> worker --listen 127.0.0.1:0` and waits for the
/// `listening on <addr>` line it prints once ready.
async fn spawn_worker(
    program: &Path,
    rank: usize,
    timeout: Duration,
) -> Result<(Child, String), Error> {
    let spawn_error = |reason: String| Error::Spawn {
        worker: rank,
        reason,
    };

    let mut child = Command::new(program)
        .args(["worker", "--listen", "127.0.0.1:0"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(format!("{}: {}", program.display(), e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_error("stdout was not captured".into()))?;
    let mut lines = BufReader::new(stdout).lines();

    let line = tokio::time::timeout(timeout, lines.next_line())
        .await
        .map_err(|_| spawn_error(format!("no address reported within {:?}", timeout)))??
        .ok_or_else(|| spawn_error("exited before reporting its address".into()))?;
    let addr = line
        .strip_prefix(LISTENING_PREFIX)
        .ok_or_else(|| spawn_error(format!("unexpected handshake line {:?}", line)))?
        .trim()
        .to_string();

    // Keep draining stdout so the child never blocks on a full pipe.
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(rank, "worker stdout: {}", line);
        }
    });

    debug!(rank, %addr, pid = child.id(), "spawned worker");
    Ok((child, addr))
}

#[async_trait]
impl Backend for Processes {
    fn name(&self) -> &'static str {
        "processes"
    }

    fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn worker_label(&self) -> &'static str {
        "processes"
    }

    async fn replicate(&mut self, b: Arc<Matrix>) -> Result<(), Error> {
        let shape = (b.rows(), b.cols());
        let calls = self.workers.iter().map(|worker| {
            let mut client = worker.client.clone();
            let rank = worker.rank;
            let chunks = wire::encode_rows(rank, 0, Arc::clone(&b), 0..shape.0);
            async move {
                let ack = client
                    .replicate(stream::iter(chunks))
                    .await
                    .map_err(|s| Error::communication("replicate", rank, s.message()))?
                    .into_inner();
                if (ack.rows as usize, ack.cols as usize) != shape {
                    return Err(Error::communication(
                        "replicate",
                        rank,
                        format!(
                            "acknowledged {}x{}, sent {}x{}",
                            ack.rows, ack.cols, shape.0, shape.1
                        ),
                    ));
                }
                Ok::<_, Error>(())
            }
        });
        try_join_all(calls).await?;

        debug!(rows = shape.0, cols = shape.1, "B replicated");
        self.b_shape = Some(shape);
        Ok(())
    }

    async fn distribute<'plan>(
        &mut self,
        a: Arc<Matrix>,
        plan: &'plan PartitionPlan,
    ) -> Result<Distributed<'plan>, Error> {
        let (_, cols) = self
            .b_shape
            .ok_or_else(|| Error::communication("distribute", 0, "B was not replicated"))?;
        if plan.worker_count() != self.workers.len() || plan.total_rows() != a.rows() {
            return Err(Error::InvalidPartition {
                total_rows: a.rows(),
                worker_count: plan.worker_count(),
            });
        }

        let calls = plan.blocks().iter().map(|block| {
            let mut client = self.workers[block.worker].client.clone();
            let block = *block;
            let chunks = wire::encode_rows(block.worker, block.offset, Arc::clone(&a), block.range());
            async move {
                let ack = client
                    .distribute(stream::iter(chunks))
                    .await
                    .map_err(|s| Error::communication("distribute", block.worker, s.message()))?
                    .into_inner();
                if ack.rows as usize != block.count {
                    return Err(Error::communication(
                        "distribute",
                        block.worker,
                        format!("acknowledged {} rows, sent {}", ack.rows, block.count),
                    ));
                }
                Ok::<_, Error>(())
            }
        });
        try_join_all(calls).await?;

        debug!(blocks = ?plan.pairs(), "A distributed");
        Ok(Distributed::new(plan, cols))
    }

    async fn multiply(&mut self, distributed: &Distributed<'_>) -> Result<(), Error> {
        let calls = distributed.plan().blocks().iter().map(|block| {
            let mut client = self.workers[block.worker].client.clone();
            let block = *block;
            async move {
                let response = client
                    .multiply(MultiplyRequest {})
                    .await
                    .map_err(|s| Error::communication("multiply", block.worker, s.message()))?
                    .into_inner();
                if response.rows as usize != block.count {
                    return Err(Error::communication(
                        "multiply",
                        block.worker,
                        format!("computed {} rows, expected {}", response.rows, block.count),
                    ));
                }
                debug!(
                    rank = block.worker,
                    elapsed = ?Duration::from_nanos(response.elapsed_nanos),
                    "worker multiply done"
                );
                Ok::<_, Error>(())
            }
        });
        try_join_all(calls).await?;
        Ok(())
    }

    async fn collect(&mut self, distributed: Distributed<'_>) -> Result<Matrix, Error> {
        let plan = distributed.plan();
        let cols = distributed.cols();

        let calls = plan.blocks().iter().map(|block| {
            let mut client = self.workers[block.worker].client.clone();
            let block = *block;
            async move {
                let fail = |reason: String| Error::communication("collect", block.worker, reason);
                let mut stream = client
                    .collect(CollectRequest {
                        block_offset: block.offset as u64,
                        block_rows: block.count as u64,
                    })
                    .await
                    .map_err(|s| fail(s.message().to_string()))?
                    .into_inner();

                let mut assembler = RowAssembler::new("collect", block.worker);
                while let Some(chunk) = stream
                    .message()
                    .await
                    .map_err(|s| fail(s.message().to_string()))?
                {
                    assembler.push(chunk)?;
                }
                let (offset, rows) = assembler.finish()?;
                if offset != block.offset || rows.rows() != block.count || rows.cols() != cols {
                    return Err(fail(format!(
                        "returned {}x{} at row {}, plan expects {}x{} at row {}",
                        rows.rows(),
                        rows.cols(),
                        offset,
                        block.count,
                        cols,
                        block.offset
                    )));
                }
                Ok::<_, Error>((block, rows))
            }
        });
        let blocks = try_join_all(calls).await?;

        let mut c = Matrix::zeros(plan.total_rows(), cols)?;
        for (block, rows) in blocks {
            c.rows_slice_mut(block.offset, block.count)
                .copy_from_slice(rows.as_slice());
        }
        Ok(c)
    }

    async fn shutdown(&mut self) -> Result<(), Error> {
        for mut worker in self.workers.drain(..) {
            if let Err(status) = worker.client.shutdown(ShutdownRequest {}).await {
                warn!(rank = worker.rank, %status, "worker did not acknowledge shutdown");
            }
        }

        for (i, child) in self.children.iter_mut().enumerate() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(rank = i + 1, %status, "worker exited"),
                Ok(Err(e)) => warn!(rank = i + 1, error = %e, "cannot reap worker"),
                Err(_) => {
                    warn!(rank = i + 1, "worker ignored shutdown, killing it");
                    child.kill().await?;
                }
            }
        }
        self.children.clear();

        if let Some(mut local) = self.local.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut local).await {
                Ok(served) => served??,
                Err(_) => {
                    warn!("local worker did not stop, aborting it");
                    local.abort();
                }
            }
        }
        Ok(())
    }
}

impl Drop for Processes {
    fn drop(&mut self) {
        if let Some(local) = self.local.take() {
            local.abort();
        }
    }
}
