use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::error;
use tracing_subscriber::EnvFilter;

use matrix_mul::config::{BackendKind, Config, RunArgs};
use matrix_mul::grpc::{self, LISTENING_PREFIX};
use matrix_mul::state::WorkerState;
use matrix_mul::{kernel, report, run, Backend, Error, Matrix, Processes, Sequential, Threads};

/// Distributed dense matrix multiplication
#[derive(Parser)]
#[command(
    name = "matrix-mul",
    version,
    about,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the worker protocol for a processes-backend coordinator
    Worker {
        /// Address to listen on; port 0 picks a free port
        #[arg(long, default_value = "127.0.0.1:0")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Some(Command::Worker { listen }) => worker(&listen).await,
        None => match cli.run.into_config() {
            Ok(config) => coordinate(config).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            if matches!(e, Error::Usage(_)) {
                eprintln!("Usage: matrix-mul <N> [OPTIONS]");
            }
            ExitCode::from(1)
        }
    }
}

async fn worker(listen: &str) -> Result<ExitCode, Error> {
    let listener = TcpListener::bind(listen).await?;
    let addr = listener.local_addr()?;

    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}{}", LISTENING_PREFIX, addr)?;
    stdout.flush()?;

    grpc::serve(listener, Arc::new(WorkerState::new())).await?;
    Ok(ExitCode::SUCCESS)
}

async fn coordinate(config: Config) -> Result<ExitCode, Error> {
    let n = config.size;
    let a = Arc::new(Matrix::random(n, n, config.seed)?);
    let b = Arc::new(Matrix::random(n, n, config.seed.wrapping_add(1))?);

    report::print_matrix("A", &a, config.preview);
    report::print_matrix("B", &b, config.preview);

    let mut backend: Box<dyn Backend> = match config.backend {
        BackendKind::Sequential => Box::new(Sequential::new()),
        BackendKind::Threads => Box::new(Threads::from_config(&config.threads, n * n)),
        BackendKind::Processes => Box::new(Processes::launch(&config.processes).await?),
    };

    let outcome = run(backend.as_mut(), Arc::clone(&a), Arc::clone(&b)).await;
    let shutdown = backend.shutdown().await;
    let outcome = outcome?;
    shutdown?;

    report::print_summary(backend.worker_label(), &outcome);
    report::print_matrix("C", &outcome.product, config.preview);

    if config.verify {
        let expected = kernel::multiply_sequential(&a, &b)?;
        if outcome.product.approx_eq(&expected, 1e-9) {
            println!("Verification: PASSED");
        } else {
            println!("Verification: FAILED");
            return Ok(ExitCode::from(1));
        }
    }

    Ok(ExitCode::SUCCESS)
}
