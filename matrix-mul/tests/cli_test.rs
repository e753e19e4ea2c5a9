use std::process::{Command, Output};

fn matrix_mul(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_matrix-mul"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_missing_size_exits_with_one() {
    let output = matrix_mul(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_non_numeric_size_exits_with_one() {
    let output = matrix_mul(&["abc"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_threads_run_reports_timing() {
    let output = matrix_mul(&["8", "--backend", "threads", "--verify"]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Top-left corner of matrix A (8x8):"));
    assert!(stdout.contains("Execution time: "));
    assert!(stdout.contains("Number of threads used: 2"));
    assert!(stdout.contains("Verification: PASSED"));
}

#[test]
fn test_processes_run_reports_process_count() {
    let output = matrix_mul(&["12", "--backend", "processes", "--workers", "3", "--verify"]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Number of processes: 3"));
    assert!(stdout.contains("Verification: PASSED"));
}

#[test]
fn test_zero_size_is_accepted() {
    let output = matrix_mul(&["0", "--backend", "sequential"]);
    assert_eq!(output.status.code(), Some(0));
}
