//! QuadNet - distributed numerical integration
//!
//! QuadNet computes a definite integral of f(x) = 1/ln(x) by splitting the
//! integration interval across a fixed set of networked workers, proportionally
//! to each worker's declared CPU core count, and reducing their partial sums
//! into one final value.
//!
//! # Architecture
//!
//! - **Integrator**: numeric core evaluating one sub-interval with a selected
//!   quadrature rule (midpoint, trapezoid, Simpson)
//! - **Protocol**: typed messages with a validating envelope, fixed-layout wire codec
//! - **Framing**: length-prefixed frames over a TCP byte stream
//! - **Worker**: consumes one task, fans it out across local cores, reports one result
//! - **Coordinator**: accepts a fixed set of workers, partitions the interval
//!   proportionally, collects and reduces partial sums

pub mod config;
pub mod coordinator;
pub mod framing;
pub mod integrator;
pub mod protocol;
pub mod worker;

// Re-export commonly used types
pub use integrator::Method;
pub use protocol::Message;

/// Result type used throughout QuadNet
pub type Result<T> = anyhow::Result<T>;
