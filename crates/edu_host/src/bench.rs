use crate::session::Session;
use crate::stats::LatencyStats;
use anyhow::{Context, Result, bail};
use edu_core::DriverConfig;
use edu_hw::{SimConfig, factorial};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Operands cycle through this range so results stay distinct.
const MAX_OPERAND: u32 = 12;

struct DeviceRun {
    stats: LatencyStats,
    mismatches: u64,
    spurious: u64,
}

fn run_device(index: usize, cycles: u64, latency: Duration, bucket_ns: u64) -> Result<DeviceRun> {
    let session = Session::open(
        SimConfig {
            latency,
            ..SimConfig::default()
        },
        DriverConfig::default(),
    )
    .with_context(|| format!("device {index}"))?;

    let mut stats = LatencyStats::new(bucket_ns);
    let mut mismatches = 0;
    for i in 0..cycles {
        let n = (i % u64::from(MAX_OPERAND)) as u32 + 1;
        let start = Instant::now();
        let value = session.factorial(n)?;
        stats.update(start.elapsed().as_nanos() as u64);
        if value != factorial(n) {
            mismatches += 1;
        }
    }

    let gate = session.device().gate_stats();
    if gate.signals != gate.consumed {
        bail!(
            "device {index}: {} completions signalled, {} consumed",
            gate.signals,
            gate.consumed
        );
    }
    Ok(DeviceRun {
        stats,
        mismatches,
        spurious: session.device().irq_stats().spurious,
    })
}

/// Drives `devices` independent cards in parallel, `cycles` round trips each.
pub fn run_benchmark(devices: usize, cycles: u64, latency: Duration) -> Result<()> {
    if devices == 0 {
        bail!("need at least one device");
    }
    // Twenty buckets spanning four times the card's latency.
    let bucket_ns = (latency.as_nanos() as u64 / 5).max(1_000);

    println!("EDU BENCHMARK");
    println!("Devices: {devices}");
    println!("Cycles per device: {cycles}");
    println!("Card latency: {latency:?}");
    println!("-------------------------------");

    let start = Instant::now();
    let runs = (0..devices)
        .into_par_iter()
        .map(|i| run_device(i, cycles, latency, bucket_ns))
        .collect::<Result<Vec<_>>>()?;
    let elapsed = start.elapsed().as_secs_f64();

    let total = runs
        .iter()
        .fold(LatencyStats::new(bucket_ns), |acc, run| acc.merge(&run.stats));
    let mismatches: u64 = runs.iter().map(|r| r.mismatches).sum();
    let spurious: u64 = runs.iter().map(|r| r.spurious).sum();

    println!("Results");
    println!("Time: {elapsed:.4} s");
    println!("Throughput: {:.2} cycles/s", total.count as f64 / elapsed);
    println!("Wrong results: {mismatches}");
    println!("Spurious interrupts: {spurious}");
    total.print_report();

    if mismatches > 0 {
        bail!("{mismatches} cycles returned a wrong result");
    }
    Ok(())
}
