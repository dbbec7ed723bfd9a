//! Helpers shared by the vmpack components.

use std::fs::{create_dir_all, OpenOptions};
use std::path::Path;

use env_logger::Target;
use indexmap::IndexMap;
use log::LevelFilter;
use sha1::{Digest, Sha1};

use crate::Result;

/// Parses a comma/whitespace separated list of host names.
pub fn parse_compute_hosts(hosts: &str) -> Vec<String> {
    hosts
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Returns the SHA-1 hex digest of a string, as used by the reallocation
/// request authentication.
pub fn sha1_hex(data: &str) -> String {
    hex::encode(Sha1::digest(data.as_bytes()))
}

/// Converts per-VM MHz histories plus the host hypervisor history into the
/// host CPU utilization history.
///
/// Histories may have different lengths (VMs appear at different times), so
/// all of them are aligned to the longest one by left-padding with zeros
/// before the elementwise sum. The result is a dimensionless fraction of the
/// host CPU capacity; values above 1.0 are possible when the capacity passed
/// in is derated.
pub fn host_utilization_history(
    vms_cpu: &IndexMap<String, Vec<u64>>,
    host_cpu: &[u64],
    physical_cpu_mhz_total: u64,
) -> Vec<f64> {
    let length = vms_cpu
        .values()
        .map(|h| h.len())
        .chain([host_cpu.len()])
        .max()
        .unwrap_or(0);
    let mut totals = vec![0u64; length];
    for history in vms_cpu.values().map(|h| h.as_slice()).chain([host_cpu]) {
        let offset = length - history.len();
        for (i, value) in history.iter().enumerate() {
            totals[offset + i] += value;
        }
    }
    totals
        .iter()
        .map(|&mhz| mhz as f64 / physical_cpu_mhz_total as f64)
        .collect()
}

/// Calculates the mean VM migration time in seconds from the VM RAM sizes in
/// MB and the network bandwidth in MB/s.
pub fn calculate_migration_time(vms_ram: &IndexMap<String, u64>, bandwidth: f64) -> f64 {
    if vms_ram.is_empty() {
        return 0.;
    }
    let mean = vms_ram.values().sum::<u64>() as f64 / vms_ram.len() as f64;
    mean / bandwidth
}

/// A range iterator over floats, inclusive of the end value.
pub fn frange(start: f64, end: f64, step: f64) -> impl Iterator<Item = f64> {
    let mut current = start;
    std::iter::from_fn(move || {
        if current <= end {
            let value = current;
            current += step;
            Some(value)
        } else {
            None
        }
    })
}

/// Initializes logging for a component: `<log_directory>/<file_name>`,
/// created if absent, at the configured verbosity (0=off, 1=warn, 2=info,
/// 3=debug).
pub fn init_logging(log_directory: &str, file_name: &str, log_level: u8) -> Result<()> {
    let level = match log_level {
        0 => LevelFilter::Off,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    create_dir_all(log_directory)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(Path::new(log_directory).join(file_name))?;
    env_logger::Builder::new()
        .filter_level(level)
        .target(Target::Pipe(Box::new(log_file)))
        .try_init()
        .ok();
    Ok(())
}
