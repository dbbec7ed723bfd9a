//! The global manager.
//!
//! The single serialization point for cluster-wide placement decisions and
//! host power transitions. It exposes one HTTP resource, `PUT /`, accepting
//! authenticated reallocation requests from the local managers; everything
//! else is rejected with the canonical status codes. Accepted requests are
//! executed one at a time: cluster state is assembled from the central
//! database and the cloud controller, the placement policy computes the
//! destinations, and the migration sequencer and power manager carry the
//! decision out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum::Router;
use indexmap::IndexMap;
use log::{error, info, warn};

use crate::algorithms::{self, PlacementRequest, VmPlacement};
use crate::cloud::{self, CloudController};
use crate::common::{calculate_migration_time, parse_compute_hosts, sha1_hex};
use crate::config::Config;
use crate::db::Database;
use crate::local_manager::{REASON_OVERLOAD, REASON_UNDERLOAD};
use crate::migration::MigrationSequencer;
use crate::power::{CommandRunner, PowerManager};
use crate::{Error, Result};

/// Maximum age of an accepted request timestamp, seconds.
pub const REQUEST_FRESHNESS_WINDOW: f64 = 5.;

/// Canonical response bodies per status class.
pub fn canonical_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "Bad input parameter: incorrect or missing parameters",
        StatusCode::UNAUTHORIZED => "Unauthorized: user credentials are missing",
        StatusCode::FORBIDDEN => {
            "Forbidden: user credentials do not match the ones specified in the configuration file"
        }
        StatusCode::METHOD_NOT_ALLOWED => {
            "Method not allowed: the request is made with a method other than the only supported PUT"
        }
        StatusCode::PRECONDITION_FAILED => "Precondition failed: the request timestamp is too old",
        _ => "Unknown error",
    }
}

/// A validated reallocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReallocationRequest {
    pub reason: u8,
    pub host: String,
    pub vm_uuids: Vec<String>,
}

/// Validates the request form in the canonical order: missing credentials
/// (401), credential mismatch (403), missing or malformed operational fields
/// (400), stale timestamp (412).
pub fn validate_request(
    params: &HashMap<String, String>,
    hashed_username: &str,
    hashed_password: &str,
    now: f64,
) -> std::result::Result<ReallocationRequest, StatusCode> {
    let username = params.get("username").ok_or(StatusCode::UNAUTHORIZED)?;
    let password = params.get("password").ok_or(StatusCode::UNAUTHORIZED)?;
    if username != hashed_username || password != hashed_password {
        return Err(StatusCode::FORBIDDEN);
    }

    let reason: u8 = params
        .get("reason")
        .and_then(|value| value.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;
    if reason != REASON_UNDERLOAD && reason != REASON_OVERLOAD {
        return Err(StatusCode::BAD_REQUEST);
    }
    let host = params
        .get("host")
        .filter(|host| !host.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let vm_uuids: Vec<String> = params
        .get("vm_uuids")
        .map(|value| {
            value
                .split(',')
                .filter(|uuid| !uuid.is_empty())
                .map(|uuid| uuid.to_string())
                .collect()
        })
        .unwrap_or_default();
    if reason == REASON_OVERLOAD && vm_uuids.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let time: f64 = params
        .get("time")
        .and_then(|value| value.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    if now - time > REQUEST_FRESHNESS_WINDOW {
        return Err(StatusCode::PRECONDITION_FAILED);
    }

    Ok(ReallocationRequest {
        reason,
        host: host.clone(),
        vm_uuids,
    })
}

pub struct GlobalManager {
    config: Config,
    db: Database,
    cloud: Box<dyn CloudController>,
    power: PowerManager,
    runner: Box<dyn CommandRunner>,
    compute_hosts: Vec<String>,
    placement: Option<Box<dyn VmPlacement>>,
}

/// What a handled request did, for the response body and for tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    NothingToMigrate,
    Migrated {
        placement: IndexMap<String, String>,
        failed: Vec<String>,
        activated: Vec<String>,
        deactivated: Vec<String>,
    },
}

impl GlobalManager {
    pub fn new(
        config: Config,
        db: Database,
        cloud: Box<dyn CloudController>,
        power: PowerManager,
        runner: Box<dyn CommandRunner>,
    ) -> Result<Self> {
        let compute_hosts = parse_compute_hosts(&config.compute_hosts);
        if compute_hosts.is_empty() {
            return Err(Error::Config("compute_hosts is empty".to_string()));
        }
        Ok(Self {
            config,
            db,
            cloud,
            power,
            runner,
            compute_hosts,
            placement: None,
        })
    }

    /// The central database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Wakes every managed host so the cluster starts in a known-on state.
    pub fn wake_all_hosts(&mut self) -> Result<()> {
        info!("waking all compute hosts: {:?}", self.compute_hosts);
        self.power.switch_hosts_on(&self.db, &self.compute_hosts)
    }

    /// Handles a validated reallocation request.
    pub fn handle(&mut self, request: &ReallocationRequest) -> Result<Outcome> {
        if request.reason == REASON_UNDERLOAD {
            info!("processing an underload request from host {}", request.host);
            self.execute_underload(&request.host)
        } else {
            info!(
                "processing an overload request from host {} for VMs {:?}",
                request.host, request.vm_uuids
            );
            self.execute_overload(&request.host, &request.vm_uuids)
        }
    }

    /// Shared state assembly: capacities, usages, host to VM mapping and the
    /// set of hosts that must stay active because a resident VM has no
    /// history yet.
    fn assemble_cluster_state(&mut self) -> Result<ClusterState> {
        let (hosts_cpu_total, hosts_ram_total) = self.db.select_host_characteristics()?;
        let hosts_to_vms = cloud::vms_by_hosts(self.cloud.as_ref(), &self.compute_hosts)?;
        let vms_last_cpu = self.db.select_last_cpu_mhz_for_vms()?;
        let hosts_last_mhz = self.db.select_last_host_cpu_mhz()?;

        let mut state = ClusterState {
            hosts_cpu_total,
            hosts_ram_total,
            hosts_to_vms,
            vms_last_cpu,
            ..ClusterState::default()
        };

        for (host, vms) in &state.hosts_to_vms {
            let mut cpu_usage = 0u64;
            let mut missing_history = false;
            for uuid in vms {
                match state.vms_last_cpu.get(uuid) {
                    Some(&mhz) => cpu_usage += mhz,
                    None => missing_history = true,
                }
            }
            if missing_history {
                // A VM without history cannot be placed; its host keeps its
                // load and must not be powered down in this request.
                state.keep_active.insert(host.clone());
                continue;
            }
            if !vms.is_empty() {
                state.active_cpu_usage.insert(
                    host.clone(),
                    cpu_usage + hosts_last_mhz.get(host).copied().unwrap_or(0),
                );
                state
                    .active_ram_usage
                    .insert(host.clone(), self.cloud.host_used_ram(host)?);
            } else {
                state.inactive_hosts.insert(host.clone());
            }
        }
        Ok(state)
    }

    /// Builds the per-VM placement inputs, dropping VMs that vanished or
    /// have no retained history.
    fn vm_details(&mut self, vms: &[String]) -> Result<(IndexMap<String, Vec<u64>>, IndexMap<String, u64>)> {
        let mut vms_ram = cloud::vms_ram_limit(self.cloud.as_ref(), vms)?;
        let mut vms_cpu = IndexMap::new();
        for uuid in vms_ram.keys() {
            let history = self
                .db
                .select_cpu_mhz_for_vm(uuid, self.config.data_collector_data_length)?;
            if history.is_empty() {
                warn!("VM {} has no CPU history, leaving it in place", uuid);
                continue;
            }
            vms_cpu.insert(uuid.clone(), history);
        }
        vms_ram.retain(|uuid, _| vms_cpu.contains_key(uuid));
        Ok((vms_cpu, vms_ram))
    }

    fn placement_policy(&mut self, vms_ram: &IndexMap<String, u64>) -> Result<&mut Box<dyn VmPlacement>> {
        if self.placement.is_none() {
            let migration_time =
                calculate_migration_time(vms_ram, self.config.network_migration_bandwidth);
            self.placement = Some(algorithms::vm_placement(
                &self.config.algorithm_vm_placement_factory,
                self.config.data_collector_interval,
                migration_time,
                &self.config.algorithm_vm_placement_parameters,
            )?);
        }
        Ok(self.placement.as_mut().unwrap())
    }

    /// Evacuates an underloaded host and powers down hosts left empty.
    fn execute_underload(&mut self, underloaded_host: &str) -> Result<Outcome> {
        let state = self.assemble_cluster_state()?;

        let candidates = state
            .hosts_to_vms
            .get(underloaded_host)
            .cloned()
            .unwrap_or_default();
        let (vms_cpu, vms_ram) = self.vm_details(&candidates)?;
        if vms_cpu.is_empty() {
            info!("nothing to migrate");
            return Ok(Outcome::NothingToMigrate);
        }

        let mut request = PlacementRequest {
            vms_cpu,
            vms_ram,
            ..PlacementRequest::default()
        };
        for (host, cpu_usage) in &state.active_cpu_usage {
            if host == underloaded_host || state.keep_active.contains(host) {
                continue;
            }
            let (Some(&cpu_total), Some(&ram_total)) = (
                state.hosts_cpu_total.get(host),
                state.hosts_ram_total.get(host),
            ) else {
                continue;
            };
            request.hosts_cpu_usage.insert(host.clone(), *cpu_usage);
            request.hosts_cpu_total.insert(host.clone(), cpu_total);
            request
                .hosts_ram_usage
                .insert(host.clone(), state.active_ram_usage[host]);
            request.hosts_ram_total.insert(host.clone(), ram_total);
        }

        let placement = self.placement_policy(&request.vms_ram)?.place(&request);
        if placement.is_empty() {
            info!("nothing to migrate");
            return Ok(Outcome::NothingToMigrate);
        }
        info!("placement: {:?}", placement);

        let sequencer =
            MigrationSequencer::new(self.cloud.as_ref(), &self.db, self.runner.as_ref(), &self.config);
        let failed = sequencer.migrate(&placement)?;

        // The evacuated host is powered down once it is really empty: every
        // resident VM was placed and none of the migrations failed.
        let mut deactivated = Vec::new();
        let fully_evacuated = failed.is_empty() && placement.len() == candidates.len();
        if fully_evacuated && !state.keep_active.contains(underloaded_host) {
            deactivated.push(underloaded_host.to_string());
            self.power.switch_hosts_off(&self.db, &deactivated)?;
        }

        Ok(Outcome::Migrated {
            placement,
            failed,
            activated: Vec::new(),
            deactivated,
        })
    }

    /// Relocates the named VMs away from an overloaded host, waking inactive
    /// hosts when the active ones cannot absorb them.
    fn execute_overload(&mut self, overloaded_host: &str, vm_uuids: &[String]) -> Result<Outcome> {
        let state = self.assemble_cluster_state()?;

        let (vms_cpu, vms_ram) = self.vm_details(vm_uuids)?;
        if vms_cpu.is_empty() {
            info!("nothing to migrate");
            return Ok(Outcome::NothingToMigrate);
        }

        let mut request = PlacementRequest {
            vms_cpu,
            vms_ram,
            ..PlacementRequest::default()
        };
        for (host, cpu_usage) in &state.active_cpu_usage {
            // The overloaded host is no placement target: its residents are
            // being evicted.
            if host == overloaded_host || state.keep_active.contains(host) {
                continue;
            }
            let (Some(&cpu_total), Some(&ram_total)) = (
                state.hosts_cpu_total.get(host),
                state.hosts_ram_total.get(host),
            ) else {
                continue;
            };
            request.hosts_cpu_usage.insert(host.clone(), *cpu_usage);
            request.hosts_cpu_total.insert(host.clone(), cpu_total);
            request
                .hosts_ram_usage
                .insert(host.clone(), state.active_ram_usage[host]);
            request.hosts_ram_total.insert(host.clone(), ram_total);
        }
        for host in &state.inactive_hosts {
            if let (Some(&cpu), Some(&ram)) = (
                state.hosts_cpu_total.get(host),
                state.hosts_ram_total.get(host),
            ) {
                request.inactive_hosts_cpu.insert(host.clone(), cpu);
                request.inactive_hosts_ram.insert(host.clone(), ram);
            }
        }

        let placement = self.placement_policy(&request.vms_ram)?.place(&request);
        if placement.is_empty() {
            info!("nothing to migrate");
            return Ok(Outcome::NothingToMigrate);
        }
        info!("placement: {:?}", placement);

        // Inactive destinations come up before anything moves toward them.
        let activated: Vec<String> = placement
            .values()
            .filter(|host| state.inactive_hosts.contains(*host))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if !activated.is_empty() {
            info!("activating hosts: {:?}", activated);
            self.power.switch_hosts_on(&self.db, &activated)?;
        }

        let sequencer =
            MigrationSequencer::new(self.cloud.as_ref(), &self.db, self.runner.as_ref(), &self.config);
        let failed = sequencer.migrate(&placement)?;

        Ok(Outcome::Migrated {
            placement,
            failed,
            activated,
            deactivated: Vec::new(),
        })
    }
}

#[derive(Default)]
struct ClusterState {
    hosts_cpu_total: IndexMap<String, u64>,
    hosts_ram_total: IndexMap<String, u64>,
    hosts_to_vms: IndexMap<String, Vec<String>>,
    vms_last_cpu: IndexMap<String, u64>,
    active_cpu_usage: IndexMap<String, u64>,
    active_ram_usage: IndexMap<String, u64>,
    inactive_hosts: HashSet<String>,
    keep_active: HashSet<String>,
}

/// Shared state of the HTTP service.
pub struct AppState {
    pub manager: Mutex<GlobalManager>,
    pub hashed_username: String,
    pub hashed_password: String,
}

/// Builds the HTTP router exposing the single reallocation resource.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", put(handle_request).fallback(method_not_allowed))
        .with_state(state)
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        canonical_message(StatusCode::METHOD_NOT_ALLOWED),
    )
}

async fn handle_request(
    State(state): State<Arc<AppState>>,
    Form(params): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.);
    let request =
        match validate_request(&params, &state.hashed_username, &state.hashed_password, now) {
            Ok(request) => request,
            Err(status) => return (status, canonical_message(status).to_string()),
        };

    let result = tokio::task::spawn_blocking(move || {
        let mut manager = match state.manager.lock() {
            Ok(manager) => manager,
            Err(poisoned) => poisoned.into_inner(),
        };
        manager.handle(&request)
    })
    .await;

    match result {
        Ok(Ok(Outcome::NothingToMigrate)) => (StatusCode::OK, "Nothing to migrate".to_string()),
        Ok(Ok(Outcome::Migrated { placement, failed, .. })) => (
            StatusCode::OK,
            format!("OK: migrated {} VMs", placement.len() - failed.len()),
        ),
        Ok(Err(e)) => {
            error!("request handling failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Unknown error".to_string())
        }
        Err(e) => {
            error!("request task panicked: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Unknown error".to_string())
        }
    }
}

/// Starts the global manager service: wakes the cluster, then serves the
/// reallocation endpoint until terminated.
pub fn run(config: Config) -> Result<()> {
    let db = Database::open(&config.sql_connection)?;
    let cloud = Box::new(cloud::ComputeClient::new(
        &config.os_auth_url,
        &config.os_admin_user,
        &config.os_admin_password,
        &config.os_admin_tenant_name,
    ));
    let power = PowerManager::new(
        Box::new(crate::power::SystemCommandRunner),
        &config.compute_user,
        &config.sleep_command,
        &config.ether_wake_interface,
    );
    let hashed_username = sha1_hex(&config.os_admin_user);
    let hashed_password = sha1_hex(&config.os_admin_password);
    let bind_address = format!("{}:{}", config.global_manager_host, config.global_manager_port);

    let mut manager = GlobalManager::new(
        config,
        db,
        cloud,
        power,
        Box::new(crate::power::SystemCommandRunner),
    )?;
    manager.wake_all_hosts()?;

    let state = Arc::new(AppState {
        manager: Mutex::new(manager),
        hashed_username,
        hashed_password,
    });

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!("global manager listening on {}", bind_address);
        axum::serve(listener, router(state)).await?;
        Ok::<(), std::io::Error>(())
    })?;
    Ok(())
}
