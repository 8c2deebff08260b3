//! Coordinator engine
//!
//! The coordinator accepts a fixed number of worker connections, waits for
//! each worker's capability announcement, partitions the integration interval
//! proportionally to the announced core counts, dispatches one task per
//! worker, and reduces the collected partial sums into the final value.
//!
//! # Concurrency model
//!
//! Socket reads happen in one task per connection, but every connection event
//! (hello, result, error, malformed frame, disconnect) is funneled through a
//! single mpsc channel into one event loop that exclusively owns the
//! per-connection state table. The two gates (`maybe_dispatch`,
//! `maybe_finalize`) therefore never race and need no locking. Both gates are
//! idempotent: they are invoked after every event and execute their effect at
//! most once.

use crate::framing::{write_frame, FrameReader};
use crate::integrator::Method;
use crate::protocol::{decode_message, encode_message, Message, TaskMsg};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Port to listen on
    pub listen_port: u16,
    /// Exact number of worker connections to wait for
    pub expected_workers: usize,
    /// Interval lower bound A
    pub lower: f64,
    /// Interval upper bound B
    pub upper: f64,
    /// Integration step H
    pub step: f64,
    /// Quadrature rule
    pub method: Method,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Reduced integral value
    pub total: f64,
    /// Wall time from dispatch to the last collected result
    pub elapsed: Duration,
    /// Number of workers whose error was scored as a zero-value result
    pub degraded: usize,
}

/// Per-connection lifecycle phase; transitions are monotonic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Connected,
    HelloReceived,
    ResultReceived,
}

/// Coordinator-owned state for one accepted connection
struct ConnectionState {
    addr: SocketAddr,
    /// Write half; dropped (closing the socket) on fatal protocol rejection
    writer: Option<OwnedWriteHalf>,
    cores: u32,
    phase: Phase,
    result: f64,
    /// Whether the result slot was filled by an error scored as zero
    errored: bool,
}

/// Serialized connection events consumed by the coordinator event loop
enum Event {
    Connected {
        addr: SocketAddr,
        writer: Option<OwnedWriteHalf>,
    },
    Frame {
        index: usize,
        payload: Vec<u8>,
    },
    Disconnected {
        index: usize,
        mid_frame: bool,
    },
}

/// Coordinator engine
pub struct Coordinator {
    config: CoordinatorConfig,
    listener: TcpListener,
}

impl Coordinator {
    /// Bind the listen socket.
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", config.listen_port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to listen on {}", addr))?;
        println!(
            "Coordinator listening on port {}, expecting {} workers",
            listener.local_addr()?.port(),
            config.expected_workers
        );
        Ok(Self { config, listener })
    }

    /// Actual bound address (useful when listen_port is 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run one full distribution/reduction cycle and return the final value.
    pub async fn run(self) -> Result<RunSummary> {
        let expected = self.config.expected_workers;
        let (tx, mut rx) = mpsc::channel::<Event>(64);

        // Accept exactly the expected number of connections, then stop.
        // Each connection gets a reader task that forwards frames and the
        // eventual disconnect into the shared event channel.
        let listener = self.listener;
        tokio::spawn(async move {
            for index in 0..expected {
                let (stream, addr) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        eprintln!("Accept failed: {}", e);
                        return;
                    }
                };
                stream.set_nodelay(true).ok();
                let (read_half, write_half) = stream.into_split();

                if tx
                    .send(Event::Connected {
                        addr,
                        writer: Some(write_half),
                    })
                    .await
                    .is_err()
                {
                    return;
                }

                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut reader = FrameReader::new(read_half);
                    loop {
                        match reader.next_frame().await {
                            Ok(Some(payload)) => {
                                if tx.send(Event::Frame { index, payload }).await.is_err() {
                                    return;
                                }
                            }
                            Ok(None) => {
                                let _ = tx
                                    .send(Event::Disconnected {
                                        index,
                                        mid_frame: reader.closed_mid_frame(),
                                    })
                                    .await;
                                return;
                            }
                            Err(e) => {
                                eprintln!("Read error on connection {}: {:#}", index, e);
                                let _ = tx
                                    .send(Event::Disconnected {
                                        index,
                                        mid_frame: true,
                                    })
                                    .await;
                                return;
                            }
                        }
                    }
                });
            }
        });

        let mut state = RunState::new(self.config);
        while let Some(event) = rx.recv().await {
            if let Some(summary) = state.handle(event).await {
                return Ok(summary);
            }
        }

        // Every reader task is gone: no event can ever open the finalize
        // gate. There is deliberately no timeout before this point.
        anyhow::bail!("All worker connections closed before the run completed")
    }
}

/// Event-loop state: connection table plus the two idempotent gates
struct RunState {
    config: CoordinatorConfig,
    connections: Vec<ConnectionState>,
    dispatched: bool,
    finished: bool,
    dispatch_time: Option<Instant>,
}

impl RunState {
    fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            connections: Vec::new(),
            dispatched: false,
            finished: false,
            dispatch_time: None,
        }
    }

    async fn handle(&mut self, event: Event) -> Option<RunSummary> {
        match event {
            Event::Connected { addr, writer } => {
                self.connections.push(ConnectionState {
                    addr,
                    writer,
                    cores: 0,
                    phase: Phase::Connected,
                    result: 0.0,
                    errored: false,
                });
                println!(
                    "Worker {} connected from {}",
                    self.connections.len() - 1,
                    addr
                );
                if self.connections.len() == self.config.expected_workers {
                    println!("All workers connected. Waiting for HELLO from each...");
                }
                None
            }
            Event::Frame { index, payload } => self.on_frame(index, &payload).await,
            Event::Disconnected { index, mid_frame } => {
                self.on_disconnected(index, mid_frame);
                None
            }
        }
    }

    async fn on_frame(&mut self, index: usize, payload: &[u8]) -> Option<RunSummary> {
        let msg = match decode_message(payload) {
            Ok(msg) => msg,
            Err(e) if e.is_fatal() => {
                // Peer is not speaking our protocol; close it out. The
                // connection stays in the table and keeps the gates shut.
                eprintln!("Protocol rejection on connection {}: {}", index, e);
                self.connections[index].writer = None;
                return None;
            }
            Err(e) => {
                eprintln!("Dropping malformed frame from connection {}: {}", index, e);
                return None;
            }
        };

        match msg {
            Message::Hello(hello) => {
                let conn = &mut self.connections[index];
                if conn.phase != Phase::Connected {
                    eprintln!("Duplicate HELLO from connection {}, ignoring", index);
                    return None;
                }
                conn.cores = hello.cores;
                conn.phase = Phase::HelloReceived;
                println!("HELLO from worker {}, cores={}", index, hello.cores);
                self.maybe_dispatch().await;
                None
            }
            Message::Result(result) => {
                let conn = &mut self.connections[index];
                if conn.phase == Phase::ResultReceived {
                    eprintln!("Duplicate RESULT from connection {}, ignoring", index);
                    return None;
                }
                conn.result = result.value;
                conn.phase = Phase::ResultReceived;
                println!("RESULT from worker {}: {}", index, result.value);
                self.maybe_finalize()
            }
            Message::Error(err) => {
                // A reported worker error is scored as a zero-value result;
                // it neither aborts the other workers nor gets retried, so
                // the aggregate is degraded rather than failed.
                let conn = &mut self.connections[index];
                if conn.phase == Phase::ResultReceived {
                    eprintln!("ERROR after RESULT from connection {}, ignoring", index);
                    return None;
                }
                eprintln!("ERROR from worker {}: {}", index, err.text);
                conn.result = 0.0;
                conn.errored = true;
                conn.phase = Phase::ResultReceived;
                self.maybe_finalize()
            }
            Message::Task(_) => {
                eprintln!("Unexpected TASK message from connection {}", index);
                None
            }
        }
    }

    fn on_disconnected(&mut self, index: usize, mid_frame: bool) {
        let conn = &mut self.connections[index];
        conn.writer = None;
        if mid_frame {
            eprintln!("Worker {} ({}) disconnected mid-frame", index, conn.addr);
        } else {
            eprintln!("Worker {} ({}) disconnected", index, conn.addr);
        }
        if conn.phase < Phase::ResultReceived && !self.finished {
            // No retry and no timeout: the run waits indefinitely unless the
            // remaining connections also go away.
            eprintln!(
                "Worker {} left before reporting; the final gate cannot open",
                index
            );
        }
    }

    /// Dispatch gate: idempotent, effective at most once.
    ///
    /// Precondition: every expected connection is present and has announced
    /// its core count. Effect: carve the interval proportionally in
    /// connection order, send one TASK per worker, start the elapsed timer.
    async fn maybe_dispatch(&mut self) {
        if self.dispatched {
            return;
        }
        if self.config.expected_workers == 0
            || self.connections.len() != self.config.expected_workers
        {
            return;
        }
        if self
            .connections
            .iter()
            .any(|c| c.phase < Phase::HelloReceived)
        {
            return;
        }

        let cores: Vec<u32> = self.connections.iter().map(|c| c.cores).collect();
        let parts = partition_interval(self.config.lower, self.config.upper, &cores);
        let total_cores: u64 = cores.iter().map(|&c| u64::from(c.max(1))).sum();

        println!(
            "Dispatching tasks: total cores={}, method={}, interval=[{}, {}], h={}",
            total_cores,
            self.config.method.name(),
            self.config.lower,
            self.config.upper,
            self.config.step
        );

        let worker_count = self.connections.len() as u32;
        for (i, (lo, hi)) in parts.into_iter().enumerate() {
            let task = Message::Task(TaskMsg {
                a: lo,
                b: hi,
                h: self.config.step,
                method: self.config.method,
                worker_index: i as u32,
                worker_count,
            });
            let encoded = encode_message(&task);
            match self.connections[i].writer.as_mut() {
                Some(writer) => match write_frame(writer, &encoded).await {
                    Ok(()) => println!("Sent TASK to worker {}: [{}, {}]", i, lo, hi),
                    Err(e) => eprintln!("Failed to send TASK to worker {}: {:#}", i, e),
                },
                None => eprintln!("Worker {} already gone, cannot send TASK", i),
            }
        }

        self.dispatch_time = Some(Instant::now());
        self.dispatched = true;
    }

    /// Finalize gate: idempotent, effective at most once.
    ///
    /// Requires dispatch to have happened and every connection to have
    /// reported. Reduces partial sums in connection order.
    fn maybe_finalize(&mut self) -> Option<RunSummary> {
        if !self.dispatched || self.finished {
            return None;
        }
        if self
            .connections
            .iter()
            .any(|c| c.phase < Phase::ResultReceived)
        {
            return None;
        }

        let total: f64 = self.connections.iter().map(|c| c.result).sum();
        let degraded = self.connections.iter().filter(|c| c.errored).count();
        let elapsed = self
            .dispatch_time
            .map(|t| t.elapsed())
            .unwrap_or_default();

        if degraded > 0 {
            eprintln!(
                "{} of {} workers reported errors; their shares were scored as 0",
                degraded,
                self.connections.len()
            );
        }
        println!(
            "FINAL RESULT: {} (elapsed {:.3}s)",
            total,
            elapsed.as_secs_f64()
        );

        self.finished = true;
        Some(RunSummary {
            total,
            elapsed,
            degraded,
        })
    }
}

/// Carve [a,b] into per-worker sub-intervals proportional to core counts.
///
/// A zero core count is treated as 1. Sub-intervals are contiguous in
/// connection order; the last upper bound is pinned exactly to `b` so
/// floating-point drift cannot open a gap or overlap at the boundary.
pub fn partition_interval(a: f64, b: f64, cores: &[u32]) -> Vec<(f64, f64)> {
    let total: u64 = cores.iter().map(|&c| u64::from(c.max(1))).sum();
    let len = b - a;

    let mut out = Vec::with_capacity(cores.len());
    let mut cursor = a;
    for (i, &c) in cores.iter().enumerate() {
        let frac = u64::from(c.max(1)) as f64 / total as f64;
        let hi = if i + 1 == cores.len() {
            b
        } else {
            cursor + len * frac
        };
        out.push((cursor, hi));
        cursor = hi;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_message, ErrorMsg, HelloMsg, Message, ResultMsg};

    fn test_config(workers: usize) -> CoordinatorConfig {
        CoordinatorConfig {
            listen_port: 0,
            expected_workers: workers,
            lower: 2.0,
            upper: 10.0,
            step: 1e-4,
            method: Method::Simpson,
        }
    }

    fn connect_all(state: &mut RunState, n: usize) {
        for _ in 0..n {
            state.connections.push(ConnectionState {
                addr: "127.0.0.1:0".parse().unwrap(),
                writer: None,
                cores: 0,
                phase: Phase::Connected,
                result: 0.0,
                errored: false,
            });
        }
    }

    async fn feed(state: &mut RunState, index: usize, msg: &Message) -> Option<RunSummary> {
        state.on_frame(index, &encode_message(msg)).await
    }

    #[test]
    fn partition_is_proportional_to_cores() {
        let parts = partition_interval(2.0, 10.0, &[1, 3]);
        assert_eq!(parts, vec![(2.0, 4.0), (4.0, 10.0)]);
    }

    #[test]
    fn partition_covers_interval_contiguously() {
        let parts = partition_interval(-3.0, 7.0, &[2, 5, 1, 8]);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].0, -3.0);
        assert_eq!(parts.last().unwrap().1, 7.0);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn partition_treats_zero_cores_as_one() {
        let parts = partition_interval(0.0, 4.0, &[0, 0]);
        assert_eq!(parts, vec![(0.0, 2.0), (2.0, 4.0)]);
    }

    #[test]
    fn partition_last_bound_pinned_exactly() {
        let parts = partition_interval(0.0, 0.3, &[1, 1, 1]);
        assert_eq!(parts.last().unwrap().1, 0.3);
    }

    #[tokio::test]
    async fn dispatch_waits_for_every_hello() {
        let mut state = RunState::new(test_config(2));
        connect_all(&mut state, 2);

        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 4 })).await;
        assert!(!state.dispatched);

        feed(&mut state, 1, &Message::Hello(HelloMsg { cores: 2 })).await;
        assert!(state.dispatched);
    }

    #[tokio::test]
    async fn dispatch_waits_for_every_connection() {
        let mut state = RunState::new(test_config(3));
        connect_all(&mut state, 2);

        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 1 })).await;
        feed(&mut state, 1, &Message::Hello(HelloMsg { cores: 1 })).await;
        assert!(!state.dispatched, "two of three workers must not dispatch");
    }

    #[tokio::test]
    async fn dispatch_gate_is_idempotent() {
        let mut state = RunState::new(test_config(1));
        connect_all(&mut state, 1);

        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 2 })).await;
        assert!(state.dispatched);
        let t = state.dispatch_time;

        // A duplicate hello must not re-dispatch or restart the timer
        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 8 })).await;
        assert_eq!(state.connections[0].cores, 2);
        assert_eq!(state.dispatch_time, t);
    }

    #[tokio::test]
    async fn results_reduce_in_connection_order() {
        let mut state = RunState::new(test_config(2));
        connect_all(&mut state, 2);
        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 1 })).await;
        feed(&mut state, 1, &Message::Hello(HelloMsg { cores: 3 })).await;

        // Arrival order reversed relative to connection order
        let none = feed(&mut state, 1, &Message::Result(ResultMsg { value: 3.5 })).await;
        assert!(none.is_none(), "finalize must wait for all results");

        let summary = feed(&mut state, 0, &Message::Result(ResultMsg { value: 1.25 }))
            .await
            .expect("all results in, finalize must fire");
        assert_eq!(summary.total, 4.75);
        assert_eq!(summary.degraded, 0);
        assert!(state.finished);
    }

    #[tokio::test]
    async fn worker_error_scores_as_zero_and_does_not_block() {
        let mut state = RunState::new(test_config(2));
        connect_all(&mut state, 2);
        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 1 })).await;
        feed(&mut state, 1, &Message::Hello(HelloMsg { cores: 1 })).await;

        feed(
            &mut state,
            0,
            &Message::Error(ErrorMsg {
                text: "singularity".to_string(),
            }),
        )
        .await;

        let summary = feed(&mut state, 1, &Message::Result(ResultMsg { value: 2.5 }))
            .await
            .expect("error counts as a received result");
        assert_eq!(summary.total, 2.5);
        assert_eq!(summary.degraded, 1);
    }

    #[tokio::test]
    async fn result_before_dispatch_does_not_finalize() {
        let mut state = RunState::new(test_config(2));
        connect_all(&mut state, 2);

        let none = feed(&mut state, 0, &Message::Result(ResultMsg { value: 9.0 })).await;
        assert!(none.is_none());
        assert!(!state.finished);
    }

    #[tokio::test]
    async fn phase_never_regresses() {
        let mut state = RunState::new(test_config(1));
        connect_all(&mut state, 1);
        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 1 })).await;
        feed(&mut state, 0, &Message::Result(ResultMsg { value: 1.0 })).await;

        // Late duplicates must neither change the stored value nor the phase
        feed(&mut state, 0, &Message::Result(ResultMsg { value: 7.0 })).await;
        feed(
            &mut state,
            0,
            &Message::Error(ErrorMsg {
                text: "late".to_string(),
            }),
        )
        .await;
        assert_eq!(state.connections[0].phase, Phase::ResultReceived);
        assert_eq!(state.connections[0].result, 1.0);
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_connection_continues() {
        let mut state = RunState::new(test_config(1));
        connect_all(&mut state, 1);

        state.on_frame(0, &[1, 2, 3]).await;
        assert_eq!(state.connections[0].phase, Phase::Connected);

        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 1 })).await;
        assert_eq!(state.connections[0].phase, Phase::HelloReceived);
    }

    #[tokio::test]
    async fn disconnect_before_result_keeps_gate_shut() {
        let mut state = RunState::new(test_config(2));
        connect_all(&mut state, 2);
        feed(&mut state, 0, &Message::Hello(HelloMsg { cores: 1 })).await;
        feed(&mut state, 1, &Message::Hello(HelloMsg { cores: 1 })).await;

        state.on_disconnected(0, false);
        let none = feed(&mut state, 1, &Message::Result(ResultMsg { value: 2.0 })).await;
        assert!(none.is_none(), "missing worker 0 must keep finalize shut");
        assert!(!state.finished);
    }
}
