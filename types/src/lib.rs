//! Generated gRPC types shared by the matrix-mul coordinator and its workers.

pub mod worker {
    tonic::include_proto!("worker");
}
