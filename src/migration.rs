//! The migration sequencer.
//!
//! Migrations run in small chunks (one VM by default) to bound network and
//! disk pressure. For every VM the sequencer issues a non-blocking live
//! migration, then polls the cloud controller until the VM reports the
//! target host and ACTIVE status. VMs exceeding the per-VM budget are set
//! aside and retried in later rounds, up to the configured retry bound.

use std::thread::sleep;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{info, warn};

use crate::cloud::CloudController;
use crate::config::Config;
use crate::db::Database;
use crate::power::CommandRunner;
use crate::Result;

pub struct MigrationSequencer<'a> {
    cloud: &'a dyn CloudController,
    db: &'a Database,
    runner: &'a dyn CommandRunner,
    config: &'a Config,
}

impl<'a> MigrationSequencer<'a> {
    pub fn new(
        cloud: &'a dyn CloudController,
        db: &'a Database,
        runner: &'a dyn CommandRunner,
        config: &'a Config,
    ) -> Self {
        Self {
            cloud,
            db,
            runner,
            config,
        }
    }

    /// Executes a placement. Returns the VMs that could not be migrated
    /// within the retry bound.
    pub fn migrate(&self, placement: &IndexMap<String, String>) -> Result<Vec<String>> {
        let mut pending: Vec<String> = placement.keys().cloned().collect();
        for round in 0..=self.config.migration_retries {
            if pending.is_empty() {
                return Ok(pending);
            }
            if round > 0 {
                warn!("retrying migration of {:?}, round {}", pending, round);
            }
            pending = self.migrate_round(placement, &pending)?;
        }
        if !pending.is_empty() {
            warn!("giving up on migrating {:?} after {} retries", pending, self.config.migration_retries);
        }
        Ok(pending)
    }

    fn migrate_round(&self, placement: &IndexMap<String, String>, vms: &[String]) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        let chunk_size = self.config.migration_chunk_size.max(1);
        for chunk in vms.chunks(chunk_size) {
            let mut in_flight = Vec::new();
            for uuid in chunk {
                let target = &placement[uuid];
                self.chown_instance_directory(uuid);
                info!("live-migrating VM {} to host {}", uuid, target);
                match self.cloud.live_migrate(uuid, target, self.config.block_migration) {
                    Ok(()) => in_flight.push(uuid.clone()),
                    Err(e) => {
                        warn!("live migration request for {} failed: {}", uuid, e);
                        failed.push(uuid.clone());
                    }
                }
            }
            failed.extend(self.drain_chunk(placement, in_flight)?);
        }
        Ok(failed)
    }

    /// Polls the cloud controller until every VM of the chunk has converged
    /// on its target or timed out.
    fn drain_chunk(
        &self,
        placement: &IndexMap<String, String>,
        mut chunk: Vec<String>,
    ) -> Result<Vec<String>> {
        if chunk.is_empty() {
            return Ok(chunk);
        }
        self.pause(self.config.migration_settle_time);
        let budget = Duration::from_secs(self.config.migration_timeout);
        let started = Instant::now();
        loop {
            let mut remaining = Vec::new();
            for uuid in chunk {
                let target = &placement[&uuid];
                match self.cloud.server(&uuid)? {
                    Some(server) if server.hostname == *target && server.status == "ACTIVE" => {
                        info!("VM {} arrived on host {}", uuid, target);
                        self.db.insert_vm_migration(&uuid, target)?;
                    }
                    Some(_) => remaining.push(uuid),
                    None => {
                        warn!("VM {} vanished during migration", uuid);
                    }
                }
            }
            if remaining.is_empty() {
                return Ok(remaining);
            }
            if started.elapsed() >= budget {
                warn!("migration of {:?} exceeded the {}s budget", remaining, self.config.migration_timeout);
                return Ok(remaining);
            }
            self.pause(self.config.migration_poll_interval);
            chunk = remaining;
        }
    }

    /// Hands the instance directory to the hypervisor service identity, a
    /// workaround for live-migration ownership issues on the underlying
    /// stack.
    fn chown_instance_directory(&self, uuid: &str) {
        if self.config.vm_instance_directory.is_empty() {
            return;
        }
        let path = format!("{}/{}", self.config.vm_instance_directory, uuid);
        match self.runner.run("chown", &["-R", &self.config.vm_instance_owner, &path]) {
            Ok(output) if !output.success => {
                warn!("chown of {} failed: {}", path, output.stderr.trim());
            }
            Err(e) => warn!("chown of {} failed: {}", path, e),
            Ok(_) => {}
        }
    }

    fn pause(&self, seconds: u64) {
        if seconds > 0 {
            sleep(Duration::from_secs(seconds));
        }
    }
}
