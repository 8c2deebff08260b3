//! Worker engine
//!
//! A worker dials the coordinator, announces its parallelism, waits for one
//! integration task, fans the task out across local cores, reduces the
//! partial values, and reports exactly one result or error message back.
//!
//! The worker is process-per-task: after emitting its message it is terminal
//! and closes the connection rather than returning to idle.

use crate::framing::{write_frame, FrameReader};
use crate::integrator;
use crate::protocol::{
    decode_message, encode_message, ErrorMsg, HelloMsg, Message, ResultMsg, TaskMsg,
};
use anyhow::{Context, Result};
use tokio::net::TcpStream;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator host to dial
    pub host: String,
    /// Coordinator port
    pub port: u16,
    /// Local parallel chunk count; also advertised as the core count.
    /// Defaults to the detected CPU core count, minimum 1.
    pub parallelism: usize,
}

impl WorkerConfig {
    pub fn new(host: String, port: u16, parallelism: Option<usize>) -> Self {
        Self {
            host,
            port,
            parallelism: parallelism.unwrap_or_else(num_cpus::get).max(1),
        }
    }
}

/// Task lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerPhase {
    /// Hello sent, waiting for a task
    Idle,
    /// Task frame decoded
    TaskReceived,
    /// Chunk integrations in flight
    Computing,
    /// Result or error emitted; terminal
    Completed,
}

/// Worker engine
pub struct WorkerEngine {
    config: WorkerConfig,
    phase: WorkerPhase,
}

impl WorkerEngine {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            phase: WorkerPhase::Idle,
        }
    }

    /// Dial the coordinator, serve one task, and return.
    pub async fn run(mut self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        println!("Connecting to coordinator at {}...", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        stream.set_nodelay(true).ok();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);

        // The hello is unconditional and always the first outbound frame.
        let cores = self.config.parallelism as u32;
        let hello = Message::Hello(HelloMsg { cores });
        write_frame(&mut write_half, &encode_message(&hello))
            .await
            .context("Failed to send HELLO")?;
        println!("Sent HELLO, cores={}", cores);

        loop {
            let payload = match reader.next_frame().await? {
                Some(p) => p,
                None => {
                    if reader.closed_mid_frame() {
                        eprintln!("Coordinator closed the connection mid-frame");
                    } else {
                        println!("Coordinator closed the connection");
                    }
                    return Ok(());
                }
            };

            let msg = match decode_message(&payload) {
                Ok(msg) => msg,
                Err(e) if e.is_fatal() => {
                    anyhow::bail!("Protocol rejection from coordinator frame: {}", e);
                }
                Err(e) => {
                    eprintln!("Dropping malformed frame from coordinator: {}", e);
                    continue;
                }
            };

            match msg {
                Message::Task(task) => {
                    self.phase = WorkerPhase::TaskReceived;
                    println!(
                        "TASK received: [{}, {}], h={}, method={}, worker {}/{}",
                        task.a,
                        task.b,
                        task.h,
                        task.method.name(),
                        task.worker_index,
                        task.worker_count
                    );
                    self.compute_and_send(&mut write_half, task).await?;
                    self.phase = WorkerPhase::Completed;
                    return Ok(());
                }
                Message::Error(err) => {
                    eprintln!("Coordinator reported error: {}", err.text);
                    return Ok(());
                }
                other => {
                    eprintln!("Unexpected {} message from coordinator", other.name());
                }
            }
        }
    }

    /// Integrate the task in parallel and emit exactly one RESULT or ERROR.
    async fn compute_and_send(
        &mut self,
        write_half: &mut tokio::net::tcp::OwnedWriteHalf,
        task: TaskMsg,
    ) -> Result<()> {
        debug_assert_eq!(self.phase, WorkerPhase::TaskReceived);
        self.phase = WorkerPhase::Computing;
        let started = std::time::Instant::now();

        let reply = match compute_task(&task, self.config.parallelism).await {
            Ok(sum) => {
                println!(
                    "Computed local sum={} in {:.3}s",
                    sum,
                    started.elapsed().as_secs_f64()
                );
                Message::Result(ResultMsg { value: sum })
            }
            Err(e) => {
                eprintln!("Computation failed: {:#}", e);
                Message::Error(ErrorMsg {
                    text: format!("{:#}", e),
                })
            }
        };

        write_frame(write_half, &encode_message(&reply))
            .await
            .context("Failed to send computation outcome")?;
        println!("Sent {}", reply.name());
        Ok(())
    }
}

/// Split [a,b] into `parts` contiguous equal-length chunks.
///
/// The last chunk's upper bound is pinned exactly to `b` so floating-point
/// drift cannot open a gap or overlap at the boundary.
pub fn split_chunks(a: f64, b: f64, parts: usize) -> Vec<(f64, f64)> {
    let parts = parts.max(1);
    let part_len = (b - a) / parts as f64;

    (0..parts)
        .map(|i| {
            let lo = a + i as f64 * part_len;
            let hi = if i + 1 == parts { b } else { lo + part_len };
            (lo, hi)
        })
        .collect()
}

/// Integrate each chunk concurrently, then sum in chunk-index order.
///
/// The fixed summation order keeps the reduced value reproducible regardless
/// of which chunk finishes first. A panicked chunk is an internal fault and
/// is reported like a numeric failure.
async fn compute_task(task: &TaskMsg, parallelism: usize) -> Result<f64> {
    let chunks = split_chunks(task.a, task.b, parallelism);

    let handles: Vec<_> = chunks
        .into_iter()
        .map(|(lo, hi)| {
            let h = task.h;
            let method = task.method;
            tokio::task::spawn_blocking(move || integrator::integrate(lo, hi, h, method))
        })
        .collect();

    let mut sum = 0.0;
    for (i, handle) in handles.into_iter().enumerate() {
        let partial = handle
            .await
            .with_context(|| format!("Integration chunk {} failed", i))??;
        sum += partial;
    }
    Ok(sum)
}
