//! The local manager.
//!
//! Runs on every compute host. Each tick it rebuilds the host CPU
//! utilization history from the local store, asks the configured underload
//! and overload detectors for a verdict, and posts a reallocation request to
//! the global manager when either fires. The detectors and the VM selection
//! policy are created on first use and keep their state across ticks.

use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use log::{debug, error, info, warn};

use crate::algorithms::{self, OverloadDetector, UnderloadDetector, VmSelector};
use crate::common::{calculate_migration_time, host_utilization_history, sha1_hex};
use crate::config::Config;
use crate::hypervisor::Hypervisor;
use crate::local_store::LocalStore;
use crate::Result;

/// The two reallocation request reasons.
pub const REASON_UNDERLOAD: u8 = 0;
pub const REASON_OVERLOAD: u8 = 1;

struct Policies {
    underload: Box<dyn UnderloadDetector>,
    overload: Box<dyn OverloadDetector>,
    selector: Box<dyn VmSelector>,
}

pub struct LocalManager {
    config: Config,
    store: LocalStore,
    hypervisor: Box<dyn Hypervisor>,
    http: reqwest::blocking::Client,
    hostname: String,
    /// Host capacity derated by the usable fraction, the utilization
    /// denominator.
    physical_cpu_mhz_total: f64,
    hashed_username: String,
    hashed_password: String,
    policies: Option<Policies>,
}

/// Outcome of a tick, mostly of interest to tests.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    NoAction,
    Underload,
    Overload(Vec<String>),
}

impl LocalManager {
    pub fn new(config: Config, hypervisor: Box<dyn Hypervisor>) -> Result<Self> {
        let store = LocalStore::open(&config.local_data_directory, config.data_collector_data_length)?;
        let hostname = hypervisor.hostname()?;
        let physical_cpu_mhz_total =
            hypervisor.host_info()?.cpu_mhz_total() as f64 * config.host_cpu_usable_by_vms;
        Ok(Self {
            hashed_username: sha1_hex(&config.os_admin_user),
            hashed_password: sha1_hex(&config.os_admin_password),
            store,
            hypervisor,
            http: reqwest::blocking::Client::new(),
            hostname,
            physical_cpu_mhz_total,
            policies: None,
            config,
        })
    }

    /// Runs the decision loop; per-tick failures are logged and the loop
    /// continues.
    pub fn run(&mut self) {
        info!(
            "starting the local manager, iterations every {} seconds",
            self.config.local_manager_interval
        );
        loop {
            match self.tick() {
                Ok(outcome) => debug!("tick outcome: {:?}", outcome),
                Err(e) => error!("local manager iteration failed: {}", e),
            }
            sleep(Duration::from_secs(self.config.local_manager_interval));
        }
    }

    /// Executes one decision iteration.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let mut vms_cpu = self.store.read_all_vms()?;
        let mut vms_ram: IndexMap<String, u64> = IndexMap::new();
        for uuid in vms_cpu.keys() {
            if let Some(ram) = self.hypervisor.domain_max_ram(uuid)? {
                vms_ram.insert(uuid.clone(), ram);
            }
        }
        // A VM without a resolvable RAM limit is gone from the hypervisor;
        // its history is ignored this tick.
        vms_cpu.retain(|uuid, _| vms_ram.contains_key(uuid));
        if vms_cpu.is_empty() {
            info!("no VMs on the host, nothing to do");
            return Ok(TickOutcome::Idle);
        }

        let host_cpu = self.store.read_host()?;
        let utilization =
            host_utilization_history(&vms_cpu, &host_cpu, self.physical_cpu_mhz_total as u64);

        if self.policies.is_none() {
            self.policies = Some(self.build_policies(&vms_ram)?);
        }
        let policies = self.policies.as_mut().unwrap();

        if policies.underload.detect(&utilization) {
            info!("underload detected");
            self.send_request(REASON_UNDERLOAD, &[])?;
            return Ok(TickOutcome::Underload);
        }
        if policies.overload.detect(&utilization) {
            info!("overload detected");
            let vms = policies.selector.select(&vms_cpu, &vms_ram);
            if vms.is_empty() {
                warn!("overload detected but no VM was selected");
                return Ok(TickOutcome::NoAction);
            }
            info!("selected VMs to migrate: {:?}", vms);
            self.send_request(REASON_OVERLOAD, &vms)?;
            return Ok(TickOutcome::Overload(vms));
        }
        Ok(TickOutcome::NoAction)
    }

    fn build_policies(&self, vms_ram: &IndexMap<String, u64>) -> Result<Policies> {
        let time_step = self.config.data_collector_interval;
        let migration_time =
            calculate_migration_time(vms_ram, self.config.network_migration_bandwidth);
        Ok(Policies {
            underload: algorithms::underload_detector(
                &self.config.algorithm_underload_detection_factory,
                time_step,
                migration_time,
                &self.config.algorithm_underload_detection_parameters,
            )?,
            overload: algorithms::overload_detector(
                &self.config.algorithm_overload_detection_factory,
                time_step,
                migration_time,
                &self.config.algorithm_overload_detection_parameters,
            )?,
            selector: algorithms::vm_selector(
                &self.config.algorithm_vm_selection_factory,
                time_step,
                migration_time,
                &self.config.algorithm_vm_selection_parameters,
            )?,
        })
    }

    /// Posts a reallocation request to the global manager.
    fn send_request(&self, reason: u8, vm_uuids: &[String]) -> Result<()> {
        let url = format!(
            "http://{}:{}/",
            self.config.global_manager_host, self.config.global_manager_port
        );
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.);
        let mut form = vec![
            ("username".to_string(), self.hashed_username.clone()),
            ("password".to_string(), self.hashed_password.clone()),
            ("time".to_string(), time.to_string()),
            ("reason".to_string(), reason.to_string()),
            ("host".to_string(), self.hostname.clone()),
        ];
        if reason == REASON_OVERLOAD {
            form.push(("vm_uuids".to_string(), vm_uuids.join(",")));
        }
        let response = self.http.put(&url).form(&form).send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            warn!("global manager rejected the request: {} {}", status, body.trim());
        }
        Ok(())
    }
}
