//! Human-readable run report.

use std::fmt::Write;

use crate::{Matrix, Outcome};

/// Top-left `max × max` corner of `m`, one row per line.
pub fn preview(m: &Matrix, max: usize) -> String {
    let mut out = String::new();
    for i in 0..m.rows().min(max) {
        let row = &m.row(i)[..m.cols().min(max)];
        for value in row {
            let _ = write!(out, "{:.6} ", value);
        }
        out.push('\n');
    }
    out
}

pub fn print_matrix(label: &str, m: &Matrix, max: usize) {
    println!("Top-left corner of matrix {} ({}x{}):", label, m.rows(), m.cols());
    print!("{}", preview(m, max));
}

/// Prints timing and worker count. `label` is the backend's
/// [`crate::Backend::worker_label`].
pub fn print_summary(label: &str, outcome: &Outcome) {
    print!("{}", summary(label, outcome));
}

fn summary(label: &str, outcome: &Outcome) -> String {
    format!(
        "Matrix multiplication completed.\nExecution time: {:.6} seconds\nNumber of {}: {}\n",
        outcome.elapsed.as_secs_f64(),
        label,
        outcome.workers
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Schedule;
    use crate::{Backend, PartitionPlan, Sequential, Threads};

    #[test]
    fn preview_is_bounded() {
        let m = Matrix::from_fn(8, 8, |i, j| (i * 8 + j) as f64).unwrap();
        let text = preview(&m, 2);
        assert_eq!(text, "0.000000 1.000000 \n8.000000 9.000000 \n");
    }

    #[test]
    fn preview_of_small_matrix_shows_everything() {
        let m = Matrix::from_vec(1, 2, vec![0.5, -1.25]).unwrap();
        assert_eq!(preview(&m, 5), "0.500000 -1.250000 \n");
        assert_eq!(preview(&Matrix::zeros(0, 3).unwrap(), 5), "");
    }

    #[test]
    fn summary_uses_backend_label() {
        let outcome = Outcome {
            product: Matrix::zeros(1, 1).unwrap(),
            elapsed: Duration::from_millis(1500),
            workers: 3,
            plan: PartitionPlan::new(1, 3).unwrap(),
        };
        assert_eq!(
            summary("processes", &outcome),
            "Matrix multiplication completed.\nExecution time: 1.500000 seconds\nNumber of processes: 3\n"
        );

        let threads = Threads::new(3, Schedule::Static, 1);
        assert!(summary(threads.worker_label(), &outcome).contains("Number of threads used: 3\n"));
        assert_eq!(Sequential::new().worker_label(), threads.worker_label());
    }
}
