//! CLI argument parsing using clap

use crate::integrator::Method;
use clap::{Parser, ValueEnum};

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Coordinator mode - listen for workers, partition the interval, reduce results
    Coordinator,
    /// Worker mode - dial the coordinator and compute one assigned sub-interval
    Worker,
}

/// Quadrature rule selection on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    /// Midpoint rectangles
    Midpoint,
    /// Trapezoids
    Trapezoid,
    /// Composite Simpson's rule
    Simpson,
}

impl From<MethodArg> for Method {
    fn from(v: MethodArg) -> Method {
        match v {
            MethodArg::Midpoint => Method::Midpoint,
            MethodArg::Trapezoid => Method::Trapezoid,
            MethodArg::Simpson => Method::Simpson,
        }
    }
}

/// QuadNet - distributed numerical integration of 1/ln(x)
#[derive(Parser, Debug)]
#[command(name = "quadnet")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: coordinator or worker
    #[arg(long, value_enum)]
    pub mode: ExecutionMode,

    // === Coordinator Options ===
    /// Port for the coordinator to listen on
    #[arg(long, default_value = "5555")]
    pub listen_port: u16,

    /// Number of worker connections to wait for before dispatching
    #[arg(short = 'n', long, default_value = "1")]
    pub workers: usize,

    /// Integration interval lower bound A
    #[arg(short = 'a', long, default_value = "2.0", allow_hyphen_values = true)]
    pub lower: f64,

    /// Integration interval upper bound B
    #[arg(short = 'b', long, default_value = "10.0", allow_hyphen_values = true)]
    pub upper: f64,

    /// Integration step h (must be > 0)
    #[arg(short = 's', long, default_value = "1e-4")]
    pub step: f64,

    /// Quadrature rule
    #[arg(short = 'm', long, value_enum, default_value = "simpson")]
    pub method: MethodArg,

    // === Worker Options ===
    /// Coordinator host to connect to (worker mode)
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Coordinator port to connect to (worker mode)
    #[arg(long, default_value = "5555")]
    pub port: u16,

    /// Local parallel chunk count; defaults to the detected CPU core count
    #[arg(short = 'p', long)]
    pub parallelism: Option<usize>,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations beyond what clap enforces
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.mode {
            ExecutionMode::Coordinator => {
                if self.workers == 0 {
                    anyhow::bail!("--workers must be at least 1");
                }
                if !(self.step > 0.0) {
                    anyhow::bail!("--step must be > 0, got {}", self.step);
                }
            }
            ExecutionMode::Worker => {
                if self.host.trim().is_empty() {
                    anyhow::bail!("--host must not be empty");
                }
                if self.port == 0 {
                    anyhow::bail!("--port must not be 0");
                }
                if self.parallelism == Some(0) {
                    anyhow::bail!("--parallelism must be at least 1");
                }
            }
        }
        Ok(())
    }
}
