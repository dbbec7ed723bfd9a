//! Hypervisor introspection contract.
//!
//! The data collector and the local manager read everything they need about
//! the host and its domains through this trait. The production
//! implementation is backed by libvirt and compiled in with the `libvirt`
//! feature; tests substitute fakes.

use std::fs::read_to_string;

use crate::{Error, Result};

/// Static host characteristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostInfo {
    /// Frequency of one core in MHz.
    pub cpu_mhz: u64,
    pub cpu_cores: u64,
    pub ram_mb: u64,
}

impl HostInfo {
    /// Total frequency of the host CPU in MHz.
    pub fn cpu_mhz_total(&self) -> u64 {
        self.cpu_mhz * self.cpu_cores
    }
}

/// A domain as seen at enumeration time.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainInfo {
    pub uuid: String,
    pub running: bool,
}

pub trait Hypervisor: Send {
    fn hostname(&self) -> Result<String>;
    fn host_info(&self) -> Result<HostInfo>;
    /// Enumerates the domains present right now. A domain that vanishes
    /// mid-enumeration is simply absent from the result.
    fn active_domains(&self) -> Result<Vec<DomainInfo>>;
    /// Cumulative CPU time of a domain in nanoseconds, `None` once the
    /// domain is gone.
    fn domain_cpu_time(&self, uuid: &str) -> Result<Option<u64>>;
    /// Maximum RAM of a domain in MB, `None` once the domain is gone.
    fn domain_max_ram(&self, uuid: &str) -> Result<Option<u64>>;
    /// Cumulative (total, busy) CPU time of the host, in clock ticks.
    fn host_cpu_times(&self) -> Result<(f64, f64)>;
}

/// Parses the aggregate CPU line of `/proc/stat` into cumulative (total,
/// busy) tick counts. Total spans the first seven fields, busy the first
/// three (user, nice, system).
pub fn parse_proc_stat_line(line: &str) -> Option<(f64, f64)> {
    let values: Vec<f64> = line
        .split_whitespace()
        .skip(1)
        .take(7)
        .map(|field| field.parse::<f64>().ok())
        .collect::<Option<_>>()?;
    if values.len() < 7 {
        return None;
    }
    Some((values.iter().sum(), values[0..3].iter().sum()))
}

/// Reads the host CPU time counters from `/proc/stat`.
pub fn read_host_cpu_times() -> Result<(f64, f64)> {
    let content = read_to_string("/proc/stat")?;
    content
        .lines()
        .next()
        .and_then(parse_proc_stat_line)
        .ok_or_else(|| Error::Hypervisor("malformed /proc/stat".to_string()))
}

#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtHypervisor;

#[cfg(feature = "libvirt")]
mod libvirt {
    use virt::connect::Connect;
    use virt::domain::Domain;
    use virt::sys::VIR_DOMAIN_RUNNING;

    use super::{DomainInfo, HostInfo, Hypervisor};
    use crate::{Error, Result};

    /// Libvirt backed hypervisor access over a read-only connection.
    pub struct LibvirtHypervisor {
        connection: Connect,
    }

    impl LibvirtHypervisor {
        /// Opens a read-only connection to the local hypervisor. Failure here
        /// is fatal for the calling component.
        pub fn open() -> Result<Self> {
            let connection = Connect::open_read_only(None)
                .map_err(|e| Error::Hypervisor(format!("failed to connect: {}", e)))?;
            Ok(Self { connection })
        }

        fn lookup(&self, uuid: &str) -> Option<Domain> {
            Domain::lookup_by_uuid_string(&self.connection, uuid).ok()
        }
    }

    impl Hypervisor for LibvirtHypervisor {
        fn hostname(&self) -> Result<String> {
            self.connection
                .get_hostname()
                .map_err(|e| Error::Hypervisor(e.to_string()))
        }

        fn host_info(&self) -> Result<HostInfo> {
            let info = self
                .connection
                .get_node_info()
                .map_err(|e| Error::Hypervisor(e.to_string()))?;
            Ok(HostInfo {
                cpu_mhz: info.mhz as u64,
                cpu_cores: info.cpus as u64,
                ram_mb: info.memory / 1024,
            })
        }

        fn active_domains(&self) -> Result<Vec<DomainInfo>> {
            let ids = self
                .connection
                .list_domains()
                .map_err(|e| Error::Hypervisor(e.to_string()))?;
            let mut domains = Vec::new();
            for id in ids {
                // Racing against domain destruction: a failed lookup means
                // the domain is gone this tick.
                let Ok(domain) = Domain::lookup_by_id(&self.connection, id) else {
                    continue;
                };
                let (Ok(uuid), Ok((state, _))) = (domain.get_uuid_string(), domain.get_state()) else {
                    continue;
                };
                domains.push(DomainInfo {
                    uuid,
                    running: state == VIR_DOMAIN_RUNNING,
                });
            }
            Ok(domains)
        }

        fn domain_cpu_time(&self, uuid: &str) -> Result<Option<u64>> {
            Ok(self.lookup(uuid).and_then(|domain| domain.get_info().ok()).map(|info| info.cpu_time))
        }

        fn domain_max_ram(&self, uuid: &str) -> Result<Option<u64>> {
            Ok(self
                .lookup(uuid)
                .and_then(|domain| domain.get_max_memory().ok())
                .map(|kib| kib / 1024))
        }

        fn host_cpu_times(&self) -> Result<(f64, f64)> {
            super::read_host_cpu_times()
        }
    }
}
