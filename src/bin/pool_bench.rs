use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use sqlbridge_lib::{init_tracing, Bridge, BridgeConfig, Request};

#[derive(Debug, Clone)]
struct PoolBenchOptions {
    databases: usize,
    operations: usize,
    workers: usize,
    page_size: usize,
}

#[derive(Debug, Serialize)]
struct PhaseReport {
    phase: String,
    requests: usize,
    elapsed_ms: f64,
    requests_per_sec: f64,
    errors: usize,
}

#[derive(Debug, Serialize)]
struct PoolBenchReport {
    databases: usize,
    operations_per_database: usize,
    workers: usize,
    page_size: usize,
    phases: Vec<PhaseReport>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(error) = run().await {
        eprintln!("pool benchmark failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let mut options = PoolBenchOptions {
        databases: 4,
        operations: 2000,
        workers: 2,
        page_size: 100,
    };
    let mut output_path: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }

        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("{flag} requires a value"))
        };

        match flag.as_str() {
            "--databases" => options.databases = parse_positive_usize(&value()?, "--databases")?,
            "--operations" => options.operations = parse_positive_usize(&value()?, "--operations")?,
            "--workers" => options.workers = parse_positive_usize(&value()?, "--workers")?,
            "--page-size" => options.page_size = parse_positive_usize(&value()?, "--page-size")?,
            "--output" => output_path = Some(PathBuf::from(value()?)),
            _ => return Err(format!("unknown argument: {arg}")),
        }
    }

    let report = run_pool_benchmark(&options).await?;
    print_summary_table(&report);

    if let Some(output_path) = output_path {
        let output_json = serde_json::to_string_pretty(&report)
            .map_err(|error| format!("failed to serialize benchmark output: {error}"))?;
        std::fs::write(&output_path, output_json)
            .map_err(|error| format!("failed to write '{}': {error}", output_path.display()))?;
        println!("\nSaved benchmark output to {}", output_path.display());
    }
    Ok(())
}

async fn run_pool_benchmark(options: &PoolBenchOptions) -> Result<PoolBenchReport, String> {
    let bridge = Bridge::new(BridgeConfig {
        worker_count: options.workers,
        pool_name: "bench".to_string(),
        ..BridgeConfig::default()
    });

    let mut ids = Vec::with_capacity(options.databases);
    for _ in 0..options.databases {
        let opened = call(&bridge, "openDatabase", json!({"path": ":memory:"})).await?;
        let id = opened["id"]
            .as_i64()
            .ok_or_else(|| "open result has no id".to_string())?;
        call(
            &bridge,
            "execute",
            json!({"id": id, "sql": "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, score REAL)"}),
        )
        .await?;
        ids.push(id);
    }

    let mut phases = Vec::new();

    let inserts = ids.iter().flat_map(|&id| {
        (0..options.operations).map(move |n| {
            Request::new(
                "insert",
                json!({
                    "id": id,
                    "sql": "INSERT INTO items (label, score) VALUES (?, ?)",
                    "arguments": [format!("item-{n}"), n as f64 / 3.0]
                }),
            )
        })
    });
    phases.push(measure(&bridge, "insert", inserts.collect()).await);

    let lookups = ids.iter().flat_map(|&id| {
        (0..options.operations).map(move |n| {
            Request::new(
                "query",
                json!({"id": id, "sql": "SELECT label FROM items WHERE id = ?", "arguments": [n + 1]}),
            )
        })
    });
    phases.push(measure(&bridge, "point query", lookups.collect()).await);

    let started = Instant::now();
    let mut pages = 0usize;
    let mut errors = 0usize;
    for &id in &ids {
        let mut response = bridge
            .invoke(Request::new(
                "query",
                json!({"id": id, "sql": "SELECT * FROM items", "cursorPageSize": options.page_size}),
            ))
            .await;
        loop {
            pages += 1;
            let cursor_id = match &response {
                Ok(page) => page.get("cursorId").cloned(),
                Err(_) => {
                    errors += 1;
                    None
                }
            };
            let Some(cursor_id) = cursor_id else {
                break;
            };
            response = bridge
                .invoke(Request::new("queryCursorNext", json!({"id": id, "cursorId": cursor_id})))
                .await;
        }
    }
    phases.push(phase_report("cursor paging", pages, started.elapsed(), errors));

    for &id in &ids {
        call(&bridge, "closeDatabase", json!({"id": id})).await?;
    }
    bridge.shutdown();

    Ok(PoolBenchReport {
        databases: options.databases,
        operations_per_database: options.operations,
        workers: options.workers,
        page_size: options.page_size,
        phases,
    })
}

async fn call(bridge: &Bridge, method: &str, arguments: serde_json::Value) -> Result<serde_json::Value, String> {
    bridge
        .invoke(Request::new(method, arguments))
        .await
        .map_err(|error| format!("{method} failed: {error}"))
}

/// Submit every request at once and wait for all of them.
async fn measure(bridge: &Bridge, phase: &str, requests: Vec<Request>) -> PhaseReport {
    let count = requests.len();
    let started = Instant::now();
    let responses = join_all(requests.into_iter().map(|request| bridge.invoke(request))).await;
    let errors = responses.iter().filter(|response| response.is_err()).count();
    phase_report(phase, count, started.elapsed(), errors)
}

fn phase_report(phase: &str, requests: usize, elapsed: Duration, errors: usize) -> PhaseReport {
    let secs = elapsed.as_secs_f64();
    PhaseReport {
        phase: phase.to_string(),
        requests,
        elapsed_ms: secs * 1000.0,
        requests_per_sec: if secs > 0.0 { requests as f64 / secs } else { 0.0 },
        errors,
    }
}

fn print_help() {
    println!("Worker pool benchmark runner");
    println!();
    println!("Usage:");
    println!("  cargo run --release --bin pool_bench -- [options]");
    println!();
    println!("Options:");
    println!("  --databases <n>     In-memory databases driven concurrently (default: 4)");
    println!("  --operations <n>    Requests per database and phase (default: 2000)");
    println!("  --workers <n>       Worker threads in the pool (default: 2)");
    println!("  --page-size <n>     Cursor page size for the paging phase (default: 100)");
    println!("  --output <path>     Also write the report as JSON");
}

fn parse_positive_usize(value: &str, flag: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|_| format!("{flag} expects a positive integer, got '{value}'"))?;
    if parsed == 0 {
        return Err(format!("{flag} expects a value greater than 0"));
    }
    Ok(parsed)
}

fn print_summary_table(report: &PoolBenchReport) {
    println!(
        "\n{} database(s), {} worker(s), {} operation(s) per database",
        report.databases, report.workers, report.operations_per_database
    );
    println!("{:<16} {:>10} {:>12} {:>14} {:>8}", "phase", "requests", "elapsed ms", "req/s", "errors");
    for phase in &report.phases {
        println!(
            "{:<16} {:>10} {:>12.1} {:>14.0} {:>8}",
            phase.phase, phase.requests, phase.elapsed_ms, phase.requests_per_sec, phase.errors
        );
    }
}
