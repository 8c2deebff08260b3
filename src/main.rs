//! QuadNet CLI entry point

use anyhow::{Context, Result};
use quadnet::config::{Cli, ExecutionMode};
use quadnet::coordinator::{Coordinator, CoordinatorConfig};
use quadnet::worker::{WorkerConfig, WorkerEngine};

fn main() -> Result<()> {
    println!("QuadNet v{}", env!("CARGO_PKG_VERSION"));
    println!("Distributed numerical integration of 1/ln(x)");
    println!();

    let cli = Cli::parse_args();
    cli.validate()?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    match cli.mode {
        ExecutionMode::Coordinator => {
            let config = CoordinatorConfig {
                listen_port: cli.listen_port,
                expected_workers: cli.workers,
                lower: cli.lower,
                upper: cli.upper,
                step: cli.step,
                method: cli.method.into(),
            };
            runtime.block_on(async {
                let coordinator = Coordinator::bind(config).await?;
                coordinator.run().await
            })?;
            Ok(())
        }
        ExecutionMode::Worker => {
            let config = WorkerConfig::new(cli.host.clone(), cli.port, cli.parallelism);
            runtime.block_on(WorkerEngine::new(config).run())
        }
    }
}
