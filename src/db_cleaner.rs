//! The database cleaner.
//!
//! Periodically deletes MHz samples older than the retention cutoff so the
//! central database stays bounded. The capacity, state, overload and
//! migration tables are kept in full.

use std::thread::sleep;
use std::time::Duration;

use chrono::Utc;
use log::{error, info};

use crate::db::Database;
use crate::Result;

pub struct DbCleaner {
    db: Database,
    interval: u64,
    retention: u64,
}

impl DbCleaner {
    pub fn new(db: Database, interval: u64, retention: u64) -> Self {
        Self {
            db,
            interval,
            retention,
        }
    }

    /// Runs the cleaning loop; per-tick failures are logged and the loop
    /// continues.
    pub fn run(&mut self) {
        info!("starting the database cleaner, iterations every {} seconds", self.interval);
        loop {
            if let Err(e) = self.tick() {
                error!("database cleaning iteration failed: {}", e);
            }
            sleep(Duration::from_secs(self.interval));
        }
    }

    /// Executes one cleaning iteration.
    pub fn tick(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp() - self.retention as i64;
        let vm_rows = self.db.cleanup_vm_resource_usage(cutoff)?;
        let host_rows = self.db.cleanup_host_resource_usage(cutoff)?;
        info!("deleted {} VM and {} host sample rows", vm_rows, host_rows);
        Ok(())
    }
}
