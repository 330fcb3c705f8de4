use std::sync::Arc;
use std::time::{Duration, Instant};

use spotbook::engine::{EngineError, WalEngine, WalStore};
use spotbook::model::Day;
use ulid::Ulid;

const RESOURCES: usize = 10;
const CLIENTS: usize = 32;
const ATTEMPTS_PER_CLIENT: usize = 50;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Cheap deterministic generator so runs are comparable.
fn next(seed: &mut u64) -> u64 {
    *seed ^= *seed << 13;
    *seed ^= *seed >> 7;
    *seed ^= *seed << 17;
    *seed
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let dir = std::env::temp_dir().join("spotbook_bench");
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let path = dir.join(format!("stress_{}.wal", Ulid::new()));
    let store = Arc::new(WalStore::open(&path).expect("open wal"));
    let engine = Arc::new(WalEngine::new(store));

    let mut resources = Vec::with_capacity(RESOURCES);
    for _ in 0..RESOURCES {
        let rid = Ulid::new();
        engine.create_resource(rid).await.expect("create resource");
        resources.push(rid);
    }
    let resources = Arc::new(resources);
    let base: Day = "2025-01-01".parse().expect("base date");

    println!("spotbook stress: {CLIENTS} clients x {ATTEMPTS_PER_CLIENT} attempts over {RESOURCES} resources");
    let started = Instant::now();
    let mut handles = Vec::new();
    for client in 0..CLIENTS {
        let engine = engine.clone();
        let resources = resources.clone();
        handles.push(tokio::spawn(async move {
            let mut seed = 0x9E37_79B9_7F4A_7C15u64 ^ (client as u64 + 1);
            let mut admitted = Vec::new();
            let mut rejected = Vec::new();
            for _ in 0..ATTEMPTS_PER_CLIENT {
                let rid = resources[(next(&mut seed) % RESOURCES as u64) as usize];
                let start = base + chrono::Duration::days((next(&mut seed) % 365) as i64);
                let end = start + chrono::Duration::days(1 + (next(&mut seed) % 6) as i64);
                let t = Instant::now();
                match engine.try_reserve(rid, Ulid::new(), start, end).await {
                    Ok(_) => admitted.push(t.elapsed()),
                    Err(EngineError::Conflict { .. }) => rejected.push(t.elapsed()),
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            (admitted, rejected)
        }));
    }

    let mut admitted = Vec::new();
    let mut rejected = Vec::new();
    for h in handles {
        let (a, r) = h.await.expect("client task");
        admitted.extend(a);
        rejected.extend(r);
    }
    let elapsed = started.elapsed();
    let total = admitted.len() + rejected.len();
    println!(
        "  {total} attempts in {:.2}s ({:.0} ops/s), {} admitted, {} rejected",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64(),
        admitted.len(),
        rejected.len()
    );
    print_latency("admitted", &mut admitted);
    print_latency("rejected", &mut rejected);

    let _ = std::fs::remove_file(&path);
}
