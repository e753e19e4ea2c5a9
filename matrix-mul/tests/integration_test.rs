use std::sync::Arc;

use futures_util::stream;
use matrix_mul::config::ProcessConfig;
use matrix_mul::grpc;
use matrix_mul::kernel::multiply_sequential;
use matrix_mul::state::WorkerState;
use matrix_mul::wire::{self, RowAssembler};
use matrix_mul::{run, Backend, Error, Matrix, Processes};
use matrix_mul_types::worker::worker_client::WorkerClient;
use matrix_mul_types::worker::{CollectRequest, MultiplyRequest};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::Code;

async fn start_worker() -> (String, JoinHandle<Result<(), Error>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = tokio::spawn(grpc::serve(listener, Arc::new(WorkerState::new())));
    (addr, handle)
}

/// Coordinator plus `peers` in-process workers, each on its own port.
async fn launch_with_peers(peers: usize) -> (Processes, Vec<JoinHandle<Result<(), Error>>>) {
    let mut addrs = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..peers {
        let (addr, handle) = start_worker().await;
        addrs.push(addr);
        handles.push(handle);
    }
    let backend = Processes::launch(&ProcessConfig::with_peers(addrs))
        .await
        .unwrap();
    (backend, handles)
}

async fn stop(mut backend: Processes, handles: Vec<JoinHandle<Result<(), Error>>>) {
    backend.shutdown().await.unwrap();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

fn pattern(n: usize) -> (Arc<Matrix>, Arc<Matrix>) {
    let a = Matrix::from_fn(n, n, |i, j| (i + j) as f64).unwrap();
    let b = Matrix::from_fn(n, n, |i, j| i as f64 - j as f64).unwrap();
    (Arc::new(a), Arc::new(b))
}

#[tokio::test]
async fn test_processes_four_by_three() {
    let (mut backend, handles) = launch_with_peers(2).await;
    assert_eq!(backend.worker_count(), 3);
    assert_eq!(backend.addresses().len(), 3);

    let (a, b) = pattern(4);
    let outcome = run(&mut backend, a, b).await.unwrap();

    assert_eq!(outcome.plan.pairs(), vec![(0, 2), (2, 1), (3, 1)]);
    assert_eq!(
        outcome.product.as_slice(),
        &[
            14.0, 8.0, 2.0, -4.0, //
            20.0, 10.0, 0.0, -10.0, //
            26.0, 12.0, -2.0, -16.0, //
            32.0, 14.0, -4.0, -22.0,
        ]
    );

    stop(backend, handles).await;
}

#[tokio::test]
async fn test_processes_match_sequential() {
    let (mut backend, handles) = launch_with_peers(3).await;

    let a = Arc::new(Matrix::random(100, 100, 7).unwrap());
    let b = Arc::new(Matrix::random(100, 100, 8).unwrap());
    let expected = multiply_sequential(&a, &b).unwrap();

    let outcome = run(&mut backend, a, b).await.unwrap();
    assert_eq!(outcome.workers, 4);
    assert!(outcome.product.approx_eq(&expected, 1e-9));
    assert!(outcome.elapsed.as_secs_f64() > 0.0);

    stop(backend, handles).await;
}

#[tokio::test]
async fn test_more_workers_than_rows() {
    let (mut backend, handles) = launch_with_peers(4).await;

    let a = Arc::new(Matrix::random(2, 3, 1).unwrap());
    let b = Arc::new(Matrix::random(3, 2, 2).unwrap());
    let expected = multiply_sequential(&a, &b).unwrap();

    let outcome = run(&mut backend, a, b).await.unwrap();
    assert_eq!(outcome.plan.pairs(), vec![(0, 1), (1, 1), (2, 0), (2, 0), (2, 0)]);
    assert_eq!(outcome.product, expected);

    stop(backend, handles).await;
}

#[tokio::test]
async fn test_empty_matrices() {
    let (mut backend, handles) = launch_with_peers(1).await;

    let a = Arc::new(Matrix::zeros(0, 0).unwrap());
    let b = Arc::new(Matrix::zeros(0, 0).unwrap());
    let outcome = run(&mut backend, a, b).await.unwrap();
    assert_eq!((outcome.product.rows(), outcome.product.cols()), (0, 0));

    stop(backend, handles).await;
}

#[tokio::test]
async fn test_backend_is_reusable() {
    let (mut backend, handles) = launch_with_peers(1).await;

    for n in [3, 5] {
        let (a, b) = pattern(n);
        let expected = multiply_sequential(&a, &b).unwrap();
        let outcome = run(&mut backend, a, b).await.unwrap();
        assert_eq!(outcome.product, expected);
    }

    stop(backend, handles).await;
}

#[tokio::test]
async fn test_spawned_workers() {
    let config = ProcessConfig::spawned(3, env!("CARGO_BIN_EXE_matrix-mul"));
    let mut backend = Processes::launch(&config).await.unwrap();

    let a = Arc::new(Matrix::random(17, 9, 3).unwrap());
    let b = Arc::new(Matrix::random(9, 11, 4).unwrap());
    let expected = multiply_sequential(&a, &b).unwrap();

    let outcome = run(&mut backend, a, b).await.unwrap();
    assert!(outcome.product.approx_eq(&expected, 1e-9));

    backend.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_peer_fails_launch() {
    // Bind then drop so the port is almost certainly closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = Processes::launch(&ProcessConfig::with_peers(vec![addr]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Communication { op: "connect", worker: 1, .. }));
}

#[tokio::test]
async fn test_multiply_before_replicate_is_rejected() {
    let (addr, _handle) = start_worker().await;
    let mut client = WorkerClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    let status = client.multiply(MultiplyRequest {}).await.unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
}

#[tokio::test]
async fn test_collect_checks_block() {
    let (addr, _handle) = start_worker().await;
    let mut client = WorkerClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    let (a, b) = pattern(4);
    client
        .replicate(stream::iter(wire::encode_rows(1, 0, Arc::clone(&b), 0..4)))
        .await
        .unwrap();
    let ack = client
        .distribute(stream::iter(wire::encode_rows(1, 2, Arc::clone(&a), 2..4)))
        .await
        .unwrap()
        .into_inner();
    assert_eq!((ack.rows, ack.cols), (2, 4));

    let response = client.multiply(MultiplyRequest {}).await.unwrap().into_inner();
    assert_eq!(response.rows, 2);

    let status = client
        .collect(CollectRequest {
            block_offset: 0,
            block_rows: 2,
        })
        .await
        .err()
        .unwrap();
    assert_eq!(status.code(), Code::FailedPrecondition);

    let mut stream = client
        .collect(CollectRequest {
            block_offset: 2,
            block_rows: 2,
        })
        .await
        .unwrap()
        .into_inner();
    let mut assembler = RowAssembler::new("collect", 1);
    while let Some(chunk) = stream.message().await.unwrap() {
        assembler.push(chunk).unwrap();
    }
    let (offset, rows) = assembler.finish().unwrap();
    assert_eq!(offset, 2);
    assert_eq!(rows.as_slice(), &[26.0, 12.0, -2.0, -16.0, 32.0, 14.0, -4.0, -22.0]);
}
