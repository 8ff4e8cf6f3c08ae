//! Normalizes raw engine counters into dashboard metrics.

use augments_common::{RawContainerStats, ResourceSnapshot};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Translate one counter read into percentages and megabytes, rounded to two decimals.
///
/// Disk usage is not part of the engine's stats payload and is always reported as zero.
pub fn compute_snapshot(raw: &RawContainerStats) -> ResourceSnapshot {
    let cpu_delta = raw.cpu_total_usage.saturating_sub(raw.precpu_total_usage) as f64;
    let system_delta = raw.system_cpu_usage.saturating_sub(raw.presystem_cpu_usage) as f64;
    // First sample after start has no previous system reading
    let cpu_usage = if system_delta > 0.0 {
        cpu_delta / system_delta * 100.0
    } else {
        0.0
    };

    let memory_usage = if raw.memory_limit > 0 {
        raw.memory_usage as f64 / raw.memory_limit as f64 * 100.0
    } else {
        0.0
    };

    let (rx, tx) = raw
        .networks
        .iter()
        .fold((0u64, 0u64), |(rx, tx), net| {
            (rx.saturating_add(net.rx_bytes), tx.saturating_add(net.tx_bytes))
        });

    ResourceSnapshot {
        cpu_usage: round2(cpu_usage),
        memory_usage: round2(memory_usage),
        disk_usage: 0.0,
        network_in: round2(rx as f64 / BYTES_PER_MB),
        network_out: round2(tx as f64 / BYTES_PER_MB),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
