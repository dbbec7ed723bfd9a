//! Cloud controller contract and its compute-API client.
//!
//! The global manager drives live migrations and reads the authoritative VM
//! placement through this trait. The bundled implementation speaks a
//! Nova-compatible compute API over HTTP using the admin credentials from
//! the configuration; tests substitute fakes.

use std::collections::HashMap;
use std::sync::Mutex;

use indexmap::IndexMap;
use log::{debug, warn};
use serde_json::{json, Value};

use crate::{Error, Result};

/// A VM as reported by the cloud controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub uuid: String,
    /// The host currently running the VM.
    pub hostname: String,
    pub status: String,
    pub flavor_id: String,
}

pub trait CloudController: Send {
    /// All servers of the cluster with their current placement.
    fn servers(&self) -> Result<Vec<Server>>;
    /// One server by UUID, `None` if unknown.
    fn server(&self, uuid: &str) -> Result<Option<Server>>;
    /// Issues a non-blocking live migration of a VM to a host.
    fn live_migrate(&self, uuid: &str, host: &str, block_migration: bool) -> Result<()>;
    /// The projected used RAM of a host in MB.
    fn host_used_ram(&self, host: &str) -> Result<u64>;
    /// RAM limits of all flavors in MB, by flavor id.
    fn flavors_ram(&self) -> Result<HashMap<String, u64>>;
}

/// The UUIDs of the VMs running on one host.
pub fn vms_by_host(cloud: &dyn CloudController, host: &str) -> Result<Vec<String>> {
    Ok(cloud
        .servers()?
        .into_iter()
        .filter(|server| server.hostname == host)
        .map(|server| server.uuid)
        .collect())
}

/// A map of host names to the UUIDs of their VMs. Every listed host is
/// present in the result, hosting VMs or not.
pub fn vms_by_hosts(cloud: &dyn CloudController, hosts: &[String]) -> Result<IndexMap<String, Vec<String>>> {
    let mut result: IndexMap<String, Vec<String>> =
        hosts.iter().map(|host| (host.clone(), Vec::new())).collect();
    for server in cloud.servers()? {
        if let Some(vms) = result.get_mut(&server.hostname) {
            vms.push(server.uuid);
        }
    }
    Ok(result)
}

/// RAM limits for a set of VMs, resolved through their flavors. VMs whose
/// flavor cannot be resolved are dropped with a warning.
pub fn vms_ram_limit(cloud: &dyn CloudController, vms: &[String]) -> Result<IndexMap<String, u64>> {
    let flavors = cloud.flavors_ram()?;
    let mut result = IndexMap::new();
    for uuid in vms {
        let Some(server) = cloud.server(uuid)? else {
            warn!("VM {} vanished while resolving its RAM limit", uuid);
            continue;
        };
        match flavors.get(&server.flavor_id) {
            Some(&ram) => {
                result.insert(uuid.clone(), ram);
            }
            None => warn!("VM {} has unknown flavor {}", uuid, server.flavor_id),
        }
    }
    Ok(result)
}

/// HTTP client for a Nova-compatible compute API, using password
/// authentication against the configured identity service.
pub struct ComputeClient {
    http: reqwest::blocking::Client,
    auth_url: String,
    username: String,
    password: String,
    tenant: String,
    session: Mutex<Option<Session>>,
}

struct Session {
    token: String,
    compute_url: String,
}

impl ComputeClient {
    pub fn new(auth_url: &str, username: &str, password: &str, tenant: &str) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            auth_url: auth_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            tenant: tenant.to_string(),
            session: Mutex::new(None),
        }
    }

    fn authenticate(&self) -> Result<Session> {
        let body = json!({
            "auth": {
                "passwordCredentials": {
                    "username": self.username,
                    "password": self.password,
                },
                "tenantName": self.tenant,
            }
        });
        let response: Value = self
            .http
            .post(format!("{}/tokens", self.auth_url))
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        let token = response["access"]["token"]["id"]
            .as_str()
            .ok_or_else(|| Error::Cloud("token missing from identity response".to_string()))?
            .to_string();
        let compute_url = response["access"]["serviceCatalog"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|service| service["type"] == "compute")
            .and_then(|service| service["endpoints"][0]["publicURL"].as_str())
            .ok_or_else(|| Error::Cloud("no compute endpoint in service catalog".to_string()))?
            .to_string();
        debug!("authenticated against {}", self.auth_url);
        Ok(Session { token, compute_url })
    }

    fn with_session<T>(&self, call: impl Fn(&Session) -> Result<T>) -> Result<T> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::Cloud("session lock poisoned".to_string()))?;
        if session.is_none() {
            *session = Some(self.authenticate()?);
        }
        match call(session.as_ref().unwrap()) {
            // One re-authentication attempt on an expired token.
            Err(Error::Http(e)) if e.status() == Some(reqwest::StatusCode::UNAUTHORIZED) => {
                *session = Some(self.authenticate()?);
                call(session.as_ref().unwrap())
            }
            result => result,
        }
    }

    fn get(&self, session: &Session, path: &str) -> Result<Value> {
        Ok(self
            .http
            .get(format!("{}{}", session.compute_url, path))
            .header("X-Auth-Token", &session.token)
            .send()?
            .error_for_status()?
            .json()?)
    }

    fn server_from_json(server: &Value) -> Server {
        Server {
            uuid: server["id"].as_str().unwrap_or_default().to_string(),
            hostname: server["OS-EXT-SRV-ATTR:host"].as_str().unwrap_or_default().to_string(),
            status: server["status"].as_str().unwrap_or_default().to_string(),
            flavor_id: server["flavor"]["id"].as_str().unwrap_or_default().to_string(),
        }
    }
}

impl CloudController for ComputeClient {
    fn servers(&self) -> Result<Vec<Server>> {
        self.with_session(|session| {
            let response = self.get(session, "/servers/detail")?;
            Ok(response["servers"]
                .as_array()
                .into_iter()
                .flatten()
                .map(Self::server_from_json)
                .collect())
        })
    }

    fn server(&self, uuid: &str) -> Result<Option<Server>> {
        self.with_session(|session| {
            let response = self
                .http
                .get(format!("{}/servers/{}", session.compute_url, uuid))
                .header("X-Auth-Token", &session.token)
                .send()?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let body: Value = response.error_for_status()?.json()?;
            Ok(Some(Self::server_from_json(&body["server"])))
        })
    }

    fn live_migrate(&self, uuid: &str, host: &str, block_migration: bool) -> Result<()> {
        self.with_session(|session| {
            let body = json!({
                "os-migrateLive": {
                    "host": host,
                    "block_migration": block_migration,
                    "disk_over_commit": false,
                }
            });
            self.http
                .post(format!("{}/servers/{}/action", session.compute_url, uuid))
                .header("X-Auth-Token", &session.token)
                .json(&body)
                .send()?
                .error_for_status()?;
            Ok(())
        })
    }

    fn host_used_ram(&self, host: &str) -> Result<u64> {
        self.with_session(|session| {
            let response = self.get(session, &format!("/os-hosts/{}", host))?;
            let rows: Vec<&Value> = response["host"].as_array().into_iter().flatten().collect();
            // The projected row is labeled "(used_now)"; older controllers
            // only order the rows, with the projection second.
            let projected = rows
                .iter()
                .find(|row| row["resource"]["project"].as_str() == Some("(used_now)"))
                .or_else(|| rows.get(1.min(rows.len().saturating_sub(1))))
                .ok_or_else(|| Error::Cloud(format!("no memory report for host {}", host)))?;
            projected["resource"]["memory_mb"]
                .as_u64()
                .ok_or_else(|| Error::Cloud(format!("no memory_mb for host {}", host)))
        })
    }

    fn flavors_ram(&self) -> Result<HashMap<String, u64>> {
        self.with_session(|session| {
            let response = self.get(session, "/flavors/detail")?;
            Ok(response["flavors"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|flavor| {
                    Some((flavor["id"].as_str()?.to_string(), flavor["ram"].as_u64()?))
                })
                .collect())
        })
    }
}
