//! Best Fit Decreasing VM placement.

use indexmap::IndexMap;
use log::debug;

use crate::algorithms::{PlacementRequest, VmPlacement};

/// Packs VMs onto the active hosts with the least spare capacity first,
/// activating inactive hosts only when nothing else fits.
///
/// Host capacity offered to the packing is `threshold * total - usage` per
/// resource. VMs are ordered by decreasing CPU demand (the mean of the last
/// `last_n_vm_cpu` samples), hosts by increasing spare CPU at the time they
/// entered the scan order. A placement is returned only when every VM fits;
/// the empty map signals the request cannot be satisfied.
pub struct BestFitDecreasing {
    cpu_threshold: f64,
    ram_threshold: f64,
    last_n_vm_cpu: usize,
}

impl BestFitDecreasing {
    pub fn new(cpu_threshold: f64, ram_threshold: f64, last_n_vm_cpu: usize) -> Self {
        Self {
            cpu_threshold,
            ram_threshold,
            last_n_vm_cpu,
        }
    }
}

impl VmPlacement for BestFitDecreasing {
    fn place(&mut self, request: &PlacementRequest) -> IndexMap<String, String> {
        let hosts_cpu = available_resources(
            self.cpu_threshold,
            &request.hosts_cpu_usage,
            &request.hosts_cpu_total,
        );
        let hosts_ram = available_resources(
            self.ram_threshold,
            &request.hosts_ram_usage,
            &request.hosts_ram_total,
        );
        best_fit_decreasing(
            self.last_n_vm_cpu,
            hosts_cpu,
            hosts_ram,
            &request.inactive_hosts_cpu,
            &request.inactive_hosts_ram,
            &request.vms_cpu,
            &request.vms_ram,
        )
    }
}

/// Spare capacity per host after derating the total by the threshold.
/// Negative values are possible when a host already runs above the threshold.
pub fn available_resources(
    threshold: f64,
    usage: &IndexMap<String, u64>,
    total: &IndexMap<String, u64>,
) -> IndexMap<String, i64> {
    usage
        .iter()
        .map(|(host, &used)| {
            let capacity = (threshold * total[host] as f64) as i64;
            (host.clone(), capacity - used as i64)
        })
        .collect()
}

/// The mean of the last `n` samples, truncated to whole MHz.
fn cpu_demand(history: &[u64], n: usize) -> u64 {
    if history.is_empty() || n == 0 {
        return 0;
    }
    let tail = &history[history.len().saturating_sub(n)..];
    tail.iter().sum::<u64>() / tail.len() as u64
}

/// The Best Fit Decreasing heuristic proper. Returns a complete VM to host
/// assignment, or the empty map when some VM fits nowhere.
pub fn best_fit_decreasing(
    last_n_vm_cpu: usize,
    mut hosts_cpu: IndexMap<String, i64>,
    mut hosts_ram: IndexMap<String, i64>,
    inactive_hosts_cpu: &IndexMap<String, u64>,
    inactive_hosts_ram: &IndexMap<String, u64>,
    vms_cpu: &IndexMap<String, Vec<u64>>,
    vms_ram: &IndexMap<String, u64>,
) -> IndexMap<String, String> {
    // Sorted descending so the hardest VMs are placed while capacity is
    // plentiful. Ties resolve by RAM, then by UUID.
    let mut vms: Vec<(u64, u64, &String)> = vms_cpu
        .iter()
        .map(|(uuid, history)| (cpu_demand(history, last_n_vm_cpu), vms_ram[uuid], uuid))
        .collect();
    vms.sort();
    vms.reverse();

    // Hosts keep the scan position given by their spare capacity at entry;
    // the availability maps track the effect of earlier assignments.
    let mut hosts: Vec<(i64, i64, String)> = hosts_cpu
        .iter()
        .map(|(host, &cpu)| (cpu, hosts_ram[host], host.clone()))
        .collect();
    hosts.sort();
    let mut inactive: Vec<(i64, i64, String)> = inactive_hosts_cpu
        .iter()
        .map(|(host, &cpu)| (cpu as i64, inactive_hosts_ram[host] as i64, host.clone()))
        .collect();
    inactive.sort();

    let mut mapping: IndexMap<String, String> = IndexMap::new();
    for (vm_cpu, vm_ram, vm_uuid) in vms {
        let mut mapped = false;
        while !mapped {
            for (_, _, host) in &hosts {
                if hosts_cpu[host] >= vm_cpu as i64 && hosts_ram[host] >= vm_ram as i64 {
                    mapping.insert(vm_uuid.clone(), host.clone());
                    *hosts_cpu.get_mut(host).unwrap() -= vm_cpu as i64;
                    *hosts_ram.get_mut(host).unwrap() -= vm_ram as i64;
                    mapped = true;
                    break;
                }
            }
            if !mapped {
                if inactive.is_empty() {
                    break;
                }
                let activated = inactive.remove(0);
                debug!("placement activates host {}", activated.2);
                hosts_cpu.insert(activated.2.clone(), activated.0);
                hosts_ram.insert(activated.2.clone(), activated.1);
                let position = hosts.partition_point(|entry| *entry < activated);
                hosts.insert(position, activated);
            }
        }
    }

    if mapping.len() == vms_cpu.len() {
        mapping
    } else {
        IndexMap::new()
    }
}
