//! The data collector.
//!
//! Runs on every compute host. Each tick it derives the average MHz consumed
//! by every running VM and by the hypervisor itself since the previous tick,
//! appends the samples to the local history files and the central database,
//! and raises or clears the host overload flag. MHz samples are absolute
//! integers, so histories stay meaningful when a VM lands on a host with a
//! different CPU.

use std::collections::HashMap;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use log::{debug, error, info};

use crate::config::Config;
use crate::db::Database;
use crate::hypervisor::Hypervisor;
use crate::local_store::LocalStore;
use crate::Result;

pub struct DataCollector {
    db: Database,
    hypervisor: Box<dyn Hypervisor>,
    store: LocalStore,
    interval: u64,
    hostname: String,
    data_length: usize,
    /// Overload threshold in MHz, already derated by the usable fraction.
    overload_threshold_mhz: f64,
    physical_core_mhz: u64,
    physical_cpu_mhz_total: u64,
    previous_time: f64,
    previous_cpu_time: HashMap<String, u64>,
    previous_cpu_mhz: IndexMap<String, u64>,
    previous_host_cpu_time_total: f64,
    previous_host_cpu_time_busy: f64,
    previous_overload: Option<bool>,
}

impl DataCollector {
    /// Prepares the collector: wipes stale local history, registers the host
    /// capacity in the central database. Errors here are fatal.
    pub fn new(config: &Config, db: Database, hypervisor: Box<dyn Hypervisor>) -> Result<Self> {
        let store = LocalStore::open(&config.local_data_directory, config.data_collector_data_length)?;
        store.cleanup_all()?;

        let hostname = hypervisor.hostname()?;
        let host_info = hypervisor.host_info()?;
        let cpu_mhz_total = host_info.cpu_mhz_total();
        db.update_host(
            &hostname,
            (cpu_mhz_total as f64 * config.host_cpu_usable_by_vms) as u64,
            host_info.cpu_cores,
            host_info.ram_mb,
        )?;
        info!(
            "host {}: {} cores at {} MHz, {} MB RAM",
            hostname, host_info.cpu_cores, host_info.cpu_mhz, host_info.ram_mb
        );

        Ok(Self {
            db,
            hypervisor,
            store,
            interval: config.data_collector_interval,
            hostname,
            data_length: config.data_collector_data_length,
            overload_threshold_mhz: config.host_cpu_overload_threshold
                * config.host_cpu_usable_by_vms
                * cpu_mhz_total as f64,
            physical_core_mhz: host_info.cpu_mhz,
            physical_cpu_mhz_total: cpu_mhz_total,
            previous_time: 0.,
            previous_cpu_time: HashMap::new(),
            previous_cpu_mhz: IndexMap::new(),
            previous_host_cpu_time_total: 0.,
            previous_host_cpu_time_busy: 0.,
            previous_overload: None,
        })
    }

    /// Runs the collection loop; per-tick failures are logged and the loop
    /// continues.
    pub fn run(&mut self) {
        info!("starting the data collector, iterations every {} seconds", self.interval);
        loop {
            if let Err(e) = self.tick(now_seconds()) {
                error!("data collection iteration failed: {}", e);
            }
            sleep(Duration::from_secs(self.interval));
        }
    }

    /// Executes one collection iteration at the given wall-clock time.
    pub fn tick(&mut self, current_time: f64) -> Result<()> {
        let vms_previous = self.store.list_vms()?;
        let domains = self.hypervisor.active_domains()?;
        // Domains in a non-running state are migrating in; they are picked up
        // once running.
        let vms_current: Vec<String> = domains
            .iter()
            .filter(|d| d.running)
            .map(|d| d.uuid.clone())
            .collect();

        let added = added_vms(&vms_previous, &vms_current);
        let mut added_vm_data: IndexMap<String, Vec<u64>> = IndexMap::new();
        if !added.is_empty() {
            debug!("added VMs: {:?}", added);
            for uuid in &added {
                let data = self.db.select_cpu_mhz_for_vm(uuid, self.data_length)?;
                self.store.write_vm(uuid, &data)?;
                added_vm_data.insert(uuid.clone(), data);
            }
        }
        let removed = removed_vms(&vms_previous, &vms_current);
        if !removed.is_empty() {
            debug!("removed VMs: {:?}", removed);
            self.store.remove_vms(&removed)?;
            for uuid in &removed {
                self.previous_cpu_time.remove(uuid);
                self.previous_cpu_mhz.remove(uuid);
            }
        }

        let cpu_mhz = self.collect_vm_mhz(current_time, &vms_current, &added_vm_data)?;

        let (host_cpu_time_total, host_cpu_time_busy) = self.hypervisor.host_cpu_times()?;
        let host_busy_mhz = host_cpu_mhz(
            self.physical_cpu_mhz_total,
            self.previous_host_cpu_time_total,
            self.previous_host_cpu_time_busy,
            host_cpu_time_total,
            host_cpu_time_busy,
        );

        if self.previous_time > 0. {
            for (uuid, &mhz) in &cpu_mhz {
                self.store.append_vm(uuid, mhz)?;
            }
            self.db.insert_vm_cpu_mhz(&cpu_mhz)?;

            let vm_mhz_total: u64 = cpu_mhz.values().sum();
            let hypervisor_mhz = host_busy_mhz.unwrap_or(0).saturating_sub(vm_mhz_total);
            self.store.append_host(hypervisor_mhz)?;
            self.db.insert_host_cpu_mhz(&self.hostname, hypervisor_mhz)?;
            debug!(
                "collected VM MHz {:?}, hypervisor MHz {}",
                cpu_mhz, hypervisor_mhz
            );

            let overload = self.overload_threshold_mhz < vm_mhz_total as f64;
            if self.previous_overload != Some(overload) {
                self.db.insert_host_overload(&self.hostname, overload)?;
                info!("host overload flag changed to {}", overload);
            }
            self.previous_overload = Some(overload);
        }

        self.previous_time = current_time;
        self.previous_cpu_mhz = cpu_mhz;
        self.previous_host_cpu_time_total = host_cpu_time_total;
        self.previous_host_cpu_time_busy = host_cpu_time_busy;
        Ok(())
    }

    /// Derives the per-VM MHz samples and advances the CPU time baselines.
    fn collect_vm_mhz(
        &mut self,
        current_time: f64,
        vms_current: &[String],
        added_vm_data: &IndexMap<String, Vec<u64>>,
    ) -> Result<IndexMap<String, u64>> {
        let known: Vec<String> = self.previous_cpu_time.keys().cloned().collect();
        let added = added_vms(&known, vms_current);
        let removed = removed_vms(&known, vms_current);
        for uuid in &removed {
            self.previous_cpu_time.remove(uuid);
        }

        let mut cpu_mhz = IndexMap::new();
        let mut tracked: Vec<String> = self.previous_cpu_time.keys().cloned().collect();
        tracked.sort();
        for uuid in tracked {
            let previous = self.previous_cpu_time[&uuid];
            // A vanished domain reports as zero, which the counter-reset path
            // below absorbs.
            let current = self.hypervisor.domain_cpu_time(&uuid)?.unwrap_or(0);
            let mhz = if current < previous {
                // Counter went backwards (domain restart); repeat the last
                // sample instead of emitting garbage.
                self.previous_cpu_mhz.get(&uuid).copied().unwrap_or(0)
            } else {
                calculate_cpu_mhz(
                    self.physical_core_mhz,
                    self.previous_time,
                    current_time,
                    previous,
                    current,
                )
            };
            cpu_mhz.insert(uuid.clone(), mhz);
            self.previous_cpu_time.insert(uuid, current);
        }

        for uuid in &added {
            if let Some(last) = added_vm_data.get(uuid).and_then(|data| data.last()) {
                cpu_mhz.insert(uuid.clone(), *last);
            }
            let baseline = self.hypervisor.domain_cpu_time(uuid)?.unwrap_or(0);
            self.previous_cpu_time.insert(uuid.clone(), baseline);
        }
        Ok(cpu_mhz)
    }
}

/// The VMs present now but not at the previous tick.
pub fn added_vms(previous: &[String], current: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|&uuid| !previous.contains(uuid))
        .cloned()
        .collect()
}

/// The VMs present at the previous tick but gone now.
pub fn removed_vms(previous: &[String], current: &[String]) -> Vec<String> {
    added_vms(current, previous)
}

/// Average MHz consumed by a domain between two CPU time readings.
pub fn calculate_cpu_mhz(
    core_mhz: u64,
    previous_time: f64,
    current_time: f64,
    previous_cpu_time: u64,
    current_cpu_time: u64,
) -> u64 {
    let elapsed = current_time - previous_time;
    if elapsed <= 0. {
        return 0;
    }
    let delta = current_cpu_time.saturating_sub(previous_cpu_time);
    (core_mhz as f64 * delta as f64 / (elapsed * 1e9)) as u64
}

/// Average MHz consumed by the whole host between two counter readings, or
/// `None` when the counters did not advance.
pub fn host_cpu_mhz(
    cpu_mhz_total: u64,
    previous_total: f64,
    previous_busy: f64,
    current_total: f64,
    current_busy: f64,
) -> Option<u64> {
    let delta_total = current_total - previous_total;
    if delta_total <= 0. {
        return None;
    }
    let usage = cpu_mhz_total as f64 * (current_busy - previous_busy) / delta_total;
    Some(usage.max(0.) as u64)
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.)
}
