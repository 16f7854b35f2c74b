//! Load testing for the admission gateway.

use std::sync::atomic::Ordering;
use std::time::Instant;

mod common;

#[tokio::test]
async fn test_cached_endpoint_under_load() {
    // 1. Setup Mock Upstream
    let (upstream, calls) = common::start_counting_backend(r#"{"trades":[]}"#).await;

    // 2. Start Gateway
    let gateway = common::start_gateway(common::gateway_config(upstream)).await;

    // 3. Run Load Test: one subject per task so quotas stay per-identity
    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let client = common::client();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for task in 0..concurrency {
        let client = client.clone();
        let url = gateway.url("/api/trades/history?page=1");
        tasks.push(tokio::spawn(async move {
            let subject = format!("user-{task}");
            let token = format!("token-{task}");
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                let request = common::with_identity(client.get(&url), &subject, &token, common::now_secs() - 60);
                if let Ok(res) = request.send().await {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        let latencies = task.await.unwrap();
        all_latencies.extend(latencies);
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert_eq!(all_latencies.len(), total_requests, "Every request should be admitted");
    let upstream_calls = calls.load(Ordering::SeqCst) as usize;
    assert!(
        upstream_calls <= concurrency,
        "Only initial concurrent misses should reach the upstream, saw {upstream_calls}"
    );

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("Upstream Calls: {}", upstream_calls);
    println!("-------------------------\n");
}
