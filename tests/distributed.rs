//! End-to-end tests: a real coordinator and real workers over localhost

use quadnet::coordinator::{Coordinator, CoordinatorConfig};
use quadnet::integrator::Method;
use quadnet::worker::{WorkerConfig, WorkerEngine};

fn config(workers: usize, lower: f64, upper: f64) -> CoordinatorConfig {
    CoordinatorConfig {
        listen_port: 0,
        expected_workers: workers,
        lower,
        upper,
        step: 1e-4,
        method: Method::Simpson,
    }
}

async fn spawn_worker(port: u16, parallelism: usize) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = WorkerConfig::new("127.0.0.1".to_string(), port, Some(parallelism));
        WorkerEngine::new(config).run().await.expect("worker failed");
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn two_workers_reduce_to_the_reference_integral() {
    let coordinator = Coordinator::bind(config(2, 2.0, 10.0)).await.unwrap();
    let port = coordinator.local_addr().unwrap().port();

    let w1 = spawn_worker(port, 1).await;
    let w2 = spawn_worker(port, 3).await;

    let summary = coordinator.run().await.unwrap();
    assert!(
        (summary.total - 5.120435).abs() < 2e-3,
        "got {}",
        summary.total
    );
    assert_eq!(summary.degraded, 0);

    w1.await.unwrap();
    w2.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn single_worker_matches_multi_worker_result() {
    let coordinator = Coordinator::bind(config(1, 2.0, 10.0)).await.unwrap();
    let port = coordinator.local_addr().unwrap().port();

    let w = spawn_worker(port, 4).await;

    let summary = coordinator.run().await.unwrap();
    assert!(
        (summary.total - 5.120435).abs() < 2e-3,
        "got {}",
        summary.total
    );

    w.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn singular_interval_degrades_to_zero_without_hanging() {
    // Both partitions of [0.5, 1.5] touch the x=1 singularity, so every
    // worker reports an error; each is scored as a zero-value result and the
    // run still completes.
    let coordinator = Coordinator::bind(config(2, 0.5, 1.5)).await.unwrap();
    let port = coordinator.local_addr().unwrap().port();

    let w1 = spawn_worker(port, 2).await;
    let w2 = spawn_worker(port, 2).await;

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.total, 0.0);
    assert_eq!(summary.degraded, 2);

    w1.await.unwrap();
    w2.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn run_errors_out_when_all_workers_vanish_before_reporting() {
    let coordinator = Coordinator::bind(config(1, 2.0, 10.0)).await.unwrap();
    let addr = coordinator.local_addr().unwrap();

    // Connect and immediately hang up without ever sending a hello.
    let ghost = tokio::spawn(async move {
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        drop(stream);
    });

    let err = coordinator.run().await.unwrap_err();
    assert!(
        err.to_string().contains("closed before the run completed"),
        "got {err:#}"
    );
    ghost.await.unwrap();
}
