fn main() {
    println!("cargo:rerun-if-changed=proto/worker.proto");
    tonic_prost_build::configure()
        .compile_protos(&["proto/worker.proto"], &["proto/"])
        .expect("Failed to compile proto/worker.proto");
}
