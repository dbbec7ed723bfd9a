//! VM selection policies.
//!
//! Given the CPU histories and RAM sizes of the VMs on an overloaded host,
//! a policy picks the VM whose migration relieves the host. All policies
//! return a single UUID per invocation; the local manager re-evaluates on the
//! next tick if the host is still overloaded.

use indexmap::IndexMap;
use rand::seq::IteratorRandom;

use crate::algorithms::VmSelector;

/// Picks a uniformly random VM.
pub struct RandomSelector;

impl VmSelector for RandomSelector {
    fn select(
        &mut self,
        vms_cpu: &IndexMap<String, Vec<u64>>,
        _vms_ram: &IndexMap<String, u64>,
    ) -> Vec<String> {
        let mut rng = rand::thread_rng();
        vms_cpu.keys().choose(&mut rng).cloned().into_iter().collect()
    }
}

/// Picks the VM with the smallest last CPU sample.
pub struct MinimumUtilizationSelector;

impl VmSelector for MinimumUtilizationSelector {
    fn select(
        &mut self,
        vms_cpu: &IndexMap<String, Vec<u64>>,
        _vms_ram: &IndexMap<String, u64>,
    ) -> Vec<String> {
        let mut selected: Option<(&String, u64)> = None;
        for (uuid, history) in vms_cpu {
            let last = history.last().copied().unwrap_or(0);
            if selected.map_or(true, |(_, best)| last < best) {
                selected = Some((uuid, last));
            }
        }
        selected.map(|(uuid, _)| uuid.clone()).into_iter().collect()
    }
}

/// Picks the VM with the smallest RAM, i.e. the shortest migration.
pub struct MinimumMigrationTimeSelector;

impl VmSelector for MinimumMigrationTimeSelector {
    fn select(
        &mut self,
        _vms_cpu: &IndexMap<String, Vec<u64>>,
        vms_ram: &IndexMap<String, u64>,
    ) -> Vec<String> {
        let mut selected: Option<(&String, u64)> = None;
        for (uuid, &ram) in vms_ram {
            if selected.map_or(true, |(_, best)| ram < best) {
                selected = Some((uuid, ram));
            }
        }
        selected.map(|(uuid, _)| uuid.clone()).into_iter().collect()
    }
}

/// Among the VMs with the smallest RAM, picks the one with the largest mean
/// of the last `last_n` CPU samples.
pub struct MinimumMigrationTimeMaxCpuSelector {
    last_n: usize,
}

impl MinimumMigrationTimeMaxCpuSelector {
    pub fn new(last_n: usize) -> Self {
        Self { last_n }
    }
}

impl VmSelector for MinimumMigrationTimeMaxCpuSelector {
    fn select(
        &mut self,
        vms_cpu: &IndexMap<String, Vec<u64>>,
        vms_ram: &IndexMap<String, u64>,
    ) -> Vec<String> {
        let min_ram = match vms_ram.values().min() {
            Some(&min_ram) => min_ram,
            None => return Vec::new(),
        };
        let mut max_cpu = 0.;
        let mut selected = None;
        for (uuid, history) in vms_cpu {
            if vms_ram.get(uuid).copied().unwrap_or(u64::MAX) > min_ram || history.is_empty() {
                continue;
            }
            let tail = &history[history.len().saturating_sub(self.last_n)..];
            let average = tail.iter().sum::<u64>() as f64 / tail.len() as f64;
            if max_cpu < average || selected.is_none() {
                max_cpu = average;
                selected = Some(uuid.clone());
            }
        }
        selected.into_iter().collect()
    }
}
