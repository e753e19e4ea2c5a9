//! Run configuration.
//!
//! Everything tunable is gathered into one [`Config`] value that is built
//! once from the command line and environment and then handed to the
//! backend constructors.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Single worker, no parallelism.
    Sequential,
    /// Worker threads sharing one address space.
    Threads,
    /// Worker processes exchanging row-blocks over gRPC.
    Processes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Schedule {
    /// One plan block per thread.
    Static,
    /// Threads pull fixed-size row chunks until none are left.
    Dynamic,
}

/// Size-derived thread counts.
///
/// A matrix with fewer than `small_elements` elements runs on `small`
/// threads, one with more than `large_elements` on `large`, anything in
/// between on `medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadTiers {
    pub small_elements: usize,
    pub large_elements: usize,
    pub small: usize,
    pub medium: usize,
    pub large: usize,
}

impl Default for ThreadTiers {
    fn default() -> Self {
        Self {
            small_elements: 100 * 100,
            large_elements: 1000 * 1000,
            small: 2,
            medium: 4,
            large: 8,
        }
    }
}

impl ThreadTiers {
    pub fn threads_for(&self, elements: usize) -> usize {
        if elements < self.small_elements {
            self.small
        } else if elements > self.large_elements {
            self.large
        } else {
            self.medium
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConfig {
    /// Fixed thread count; overrides `tiers` when set.
    pub threads: Option<usize>,
    pub tiers: ThreadTiers,
    pub schedule: Schedule,
    /// Rows handed out per pull under [`Schedule::Dynamic`].
    pub chunk_rows: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            threads: None,
            tiers: ThreadTiers::default(),
            schedule: Schedule::Static,
            chunk_rows: 16,
        }
    }
}

impl ThreadConfig {
    pub fn fixed(threads: usize) -> Self {
        Self {
            threads: Some(threads),
            ..Self::default()
        }
    }

    /// Threads to use for a matrix of `elements` elements.
    pub fn thread_count(&self, elements: usize) -> usize {
        self.threads.unwrap_or_else(|| self.tiers.threads_for(elements))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Total participants, coordinator included. Ignored when `peers` is set.
    pub workers: usize,
    /// Addresses of workers already launched by the environment.
    pub peers: Vec<String>,
    /// Executable started as `<program> worker`; defaults to the running binary.
    pub program: Option<PathBuf>,
    /// How long a spawned worker may take to report its address.
    pub startup_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            workers: default_parallelism(),
            peers: Vec::new(),
            program: None,
            startup_timeout: Duration::from_secs(10),
        }
    }
}

impl ProcessConfig {
    pub fn spawned(workers: usize, program: impl Into<PathBuf>) -> Self {
        Self {
            workers,
            program: Some(program.into()),
            ..Self::default()
        }
    }

    pub fn with_peers(peers: Vec<String>) -> Self {
        Self {
            peers,
            ..Self::default()
        }
    }

    /// Number of participants in the run, coordinator included.
    pub fn worker_count(&self) -> usize {
        if self.peers.is_empty() {
            self.workers
        } else {
            self.peers.len() + 1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Dimension N of the N×N operands.
    pub size: usize,
    pub backend: BackendKind,
    pub seed: u64,
    /// Rows and columns shown in each matrix preview.
    pub preview: usize,
    /// Compare the result against the sequential product.
    pub verify: bool,
    pub threads: ThreadConfig,
    pub processes: ProcessConfig,
}

/// Command-line and environment options for a coordinator run.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Matrix dimension N (multiplies two N×N matrices)
    #[arg(value_name = "N", required = true)]
    pub size: Option<usize>,

    /// Execution backend
    #[arg(long, env = "MATRIX_MUL_BACKEND", value_enum, default_value_t = BackendKind::Threads)]
    pub backend: BackendKind,

    /// Worker processes, coordinator included (processes backend)
    #[arg(long, env = "MATRIX_MUL_WORKERS")]
    pub workers: Option<usize>,

    /// Comma-separated addresses of already running workers (processes backend)
    #[arg(long, env = "MATRIX_MUL_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Fixed thread count; otherwise derived from the matrix size (threads backend)
    #[arg(long, env = "MATRIX_MUL_THREADS")]
    pub threads: Option<usize>,

    /// Below this many elements, use the small-matrix thread count
    #[arg(long, env = "MATRIX_MUL_SMALL_ELEMENTS", default_value_t = ThreadTiers::default().small_elements)]
    pub small_elements: usize,

    /// Above this many elements, use the large-matrix thread count
    #[arg(long, env = "MATRIX_MUL_LARGE_ELEMENTS", default_value_t = ThreadTiers::default().large_elements)]
    pub large_elements: usize,

    /// Threads for matrices below --small-elements
    #[arg(long, env = "MATRIX_MUL_SMALL_THREADS", default_value_t = ThreadTiers::default().small)]
    pub small_threads: usize,

    /// Threads for matrices between the two thresholds
    #[arg(long, env = "MATRIX_MUL_MEDIUM_THREADS", default_value_t = ThreadTiers::default().medium)]
    pub medium_threads: usize,

    /// Threads for matrices above --large-elements
    #[arg(long, env = "MATRIX_MUL_LARGE_THREADS", default_value_t = ThreadTiers::default().large)]
    pub large_threads: usize,

    /// Row scheduling across threads
    #[arg(long, env = "MATRIX_MUL_SCHEDULE", value_enum, default_value_t = Schedule::Static)]
    pub schedule: Schedule,

    /// Rows per chunk for dynamic scheduling
    #[arg(long, env = "MATRIX_MUL_CHUNK_ROWS", default_value_t = 16)]
    pub chunk_rows: usize,

    /// Seed for the random input matrices
    #[arg(long, env = "MATRIX_MUL_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Rows and columns shown in each matrix preview
    #[arg(long, default_value_t = 5)]
    pub preview: usize,

    /// Check the result against a sequential multiply
    #[arg(long)]
    pub verify: bool,

    /// Seconds a spawned worker may take to start
    #[arg(long, env = "MATRIX_MUL_STARTUP_TIMEOUT", default_value_t = 10)]
    pub startup_timeout: u64,
}

impl RunArgs {
    pub fn into_config(self) -> Result<Config, Error> {
        let size = self
            .size
            .ok_or_else(|| Error::Usage("missing matrix dimension N".into()))?;

        let workers = self.workers.unwrap_or_else(default_parallelism);
        if workers == 0 {
            return Err(Error::Usage("--workers must be at least 1".into()));
        }
        if self.threads == Some(0) {
            return Err(Error::Usage("--threads must be at least 1".into()));
        }
        if self.small_threads == 0 || self.medium_threads == 0 || self.large_threads == 0 {
            return Err(Error::Usage("tier thread counts must be at least 1".into()));
        }
        if self.chunk_rows == 0 {
            return Err(Error::Usage("--chunk-rows must be at least 1".into()));
        }
        if self.small_elements > self.large_elements {
            return Err(Error::Usage(format!(
                "--small-elements ({}) exceeds --large-elements ({})",
                self.small_elements, self.large_elements
            )));
        }

        let peers = self
            .peers
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Config {
            size,
            backend: self.backend,
            seed: self.seed,
            preview: self.preview,
            verify: self.verify,
            threads: ThreadConfig {
                threads: self.threads,
                tiers: ThreadTiers {
                    small_elements: self.small_elements,
                    large_elements: self.large_elements,
                    small: self.small_threads,
                    medium: self.medium_threads,
                    large: self.large_threads,
                },
                schedule: self.schedule,
                chunk_rows: self.chunk_rows,
            },
            processes: ProcessConfig {
                workers,
                peers,
                program: None,
                startup_timeout: Duration::from_secs(self.startup_timeout),
            },
        })
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> Result<Config, Error> {
        let mut argv = vec!["matrix-mul"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv)
            .map_err(|e| Error::Usage(e.to_string()))?
            .run
            .into_config()
    }

    #[test]
    fn tiers_follow_element_thresholds() {
        let tiers = ThreadTiers::default();
        assert_eq!(tiers.threads_for(50 * 50), 2);
        assert_eq!(tiers.threads_for(100 * 100), 4);
        assert_eq!(tiers.threads_for(500 * 500), 4);
        assert_eq!(tiers.threads_for(1000 * 1000), 4);
        assert_eq!(tiers.threads_for(1001 * 1001), 8);
    }

    #[test]
    fn fixed_threads_override_tiers() {
        assert_eq!(ThreadConfig::fixed(3).thread_count(10), 3);
        assert_eq!(ThreadConfig::default().thread_count(10), 2);
    }

    #[test]
    fn peers_define_worker_count() {
        let config = ProcessConfig::with_peers(vec!["a:1".into(), "b:2".into()]);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(ProcessConfig::spawned(4, "/bin/true").worker_count(), 4);
    }

    #[test]
    fn parses_size_and_options() {
        let config = parse(&[
            "100",
            "--backend",
            "processes",
            "--workers",
            "4",
            "--peers",
            "127.0.0.1:1, 127.0.0.1:2",
            "--small-elements",
            "16",
        ])
        .unwrap();
        assert_eq!(config.size, 100);
        assert_eq!(config.backend, BackendKind::Processes);
        assert_eq!(config.processes.workers, 4);
        assert_eq!(config.processes.peers, vec!["127.0.0.1:1", "127.0.0.1:2"]);
        assert_eq!(config.threads.tiers.small_elements, 16);
        assert_eq!(config.preview, 5);
    }

    #[test]
    fn tier_thread_counts_are_tunable() {
        let config = parse(&[
            "10",
            "--small-threads",
            "1",
            "--medium-threads",
            "3",
            "--large-threads",
            "16",
        ])
        .unwrap();
        let tiers = config.threads.tiers;
        assert_eq!((tiers.small, tiers.medium, tiers.large), (1, 3, 16));
        assert_eq!(config.threads.thread_count(10 * 10), 1);
        assert_eq!(config.threads.thread_count(2000 * 2000), 16);

        let defaults = parse(&["10"]).unwrap().threads.tiers;
        assert_eq!(defaults, ThreadTiers::default());
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(matches!(parse(&[]), Err(Error::Usage(_))));
        assert!(matches!(parse(&["ten"]), Err(Error::Usage(_))));
        assert!(matches!(parse(&["10", "20"]), Err(Error::Usage(_))));
        assert!(matches!(parse(&["10", "--threads", "0"]), Err(Error::Usage(_))));
        assert!(matches!(parse(&["10", "--large-threads", "0"]), Err(Error::Usage(_))));
        assert!(matches!(
            parse(&["10", "--small-elements", "9", "--large-elements", "3"]),
            Err(Error::Usage(_))
        ));
    }
}
