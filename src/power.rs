//! Host power transitions.
//!
//! Hosts are put to sleep over SSH and woken with Wake-on-LAN magic packets.
//! MAC addresses are discovered lazily by probing the ARP cache the first
//! time a host has to be woken. Every transition is recorded in the central
//! database, which is the authoritative power state log.

use std::collections::HashMap;
use std::process::Command;

use log::{info, warn};

use crate::db::Database;
use crate::{Error, Result};

/// Captured result of an external command.
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands; tests substitute a scripted fake.
pub trait CommandRunner: Send {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands through `std::process`.
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub struct PowerManager {
    runner: Box<dyn CommandRunner>,
    compute_user: String,
    sleep_command: String,
    ether_wake_interface: String,
    mac_cache: HashMap<String, String>,
}

impl PowerManager {
    pub fn new(
        runner: Box<dyn CommandRunner>,
        compute_user: &str,
        sleep_command: &str,
        ether_wake_interface: &str,
    ) -> Self {
        Self {
            runner,
            compute_user: compute_user.to_string(),
            sleep_command: sleep_command.to_string(),
            ether_wake_interface: ether_wake_interface.to_string(),
            mac_cache: HashMap::new(),
        }
    }

    /// Switches hosts to sleep and records the transitions. With an empty
    /// sleep command only the database records are written (test mode).
    pub fn switch_hosts_off(&mut self, db: &Database, hosts: &[String]) -> Result<()> {
        for host in hosts {
            if !self.sleep_command.is_empty() {
                let target = format!("{}@{}", self.compute_user, host);
                let output = self.runner.run("ssh", &[&target, &self.sleep_command])?;
                if !output.success {
                    warn!("sleep command on {} failed: {}", host, output.stderr.trim());
                }
            }
            info!("switched host {} off", host);
        }
        db.insert_host_states(hosts, 0)
    }

    /// Wakes hosts with magic packets and records the transitions.
    pub fn switch_hosts_on(&mut self, db: &Database, hosts: &[String]) -> Result<()> {
        for host in hosts {
            match self.host_mac(host) {
                Ok(mac) => {
                    let output = self
                        .runner
                        .run("ether-wake", &["-i", &self.ether_wake_interface, &mac])?;
                    if !output.success {
                        warn!("ether-wake for {} failed: {}", host, output.stderr.trim());
                    }
                }
                Err(e) => warn!("cannot resolve MAC of {}: {}", host, e),
            }
            info!("switched host {} on", host);
        }
        db.insert_host_states(hosts, 1)
    }

    /// The MAC address of a host, from the cache or an ARP probe.
    pub fn host_mac(&mut self, host: &str) -> Result<String> {
        if let Some(mac) = self.mac_cache.get(host) {
            return Ok(mac.clone());
        }
        let output = self.runner.run("arp", &[host])?;
        let mac = parse_mac(&output.stdout)
            .ok_or_else(|| Error::Power(format!("no MAC for host {} in ARP output", host)))?;
        self.mac_cache.insert(host.to_string(), mac.clone());
        Ok(mac)
    }
}

/// Extracts the first MAC address from command output.
pub fn parse_mac(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|token| {
            let groups: Vec<&str> = token.split(':').collect();
            groups.len() == 6
                && groups
                    .iter()
                    .all(|group| group.len() == 2 && group.chars().all(|c| c.is_ascii_hexdigit()))
        })
        .map(|token| token.to_string())
}
