//! Central database shared by all components.
//!
//! The store keeps host capacities, the append-only MHz sample streams, the
//! edge-triggered host overload log, the host power state log, and the
//! completed migration log. Writers own disjoint tables: the data collector
//! writes hosts and samples, the global manager writes host states and
//! migrations. Reads are plain selects; writes rely on SQLite row atomicity.

use chrono::Utc;
use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension};

use crate::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hosts (
    id INTEGER PRIMARY KEY,
    hostname TEXT NOT NULL UNIQUE,
    cpu_mhz INTEGER NOT NULL,
    cpu_cores INTEGER NOT NULL,
    ram INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS vms (
    id INTEGER PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS vm_resource_usage (
    id INTEGER PRIMARY KEY,
    vm_id INTEGER NOT NULL REFERENCES vms (id),
    timestamp INTEGER NOT NULL,
    cpu_mhz INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vm_resource_usage_vm ON vm_resource_usage (vm_id);
CREATE TABLE IF NOT EXISTS host_resource_usage (
    id INTEGER PRIMARY KEY,
    host_id INTEGER NOT NULL REFERENCES hosts (id),
    timestamp INTEGER NOT NULL,
    cpu_mhz INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_host_resource_usage_host ON host_resource_usage (host_id);
CREATE TABLE IF NOT EXISTS host_states (
    id INTEGER PRIMARY KEY,
    host_id INTEGER NOT NULL REFERENCES hosts (id),
    timestamp INTEGER NOT NULL,
    state INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS host_overload (
    id INTEGER PRIMARY KEY,
    host_id INTEGER NOT NULL REFERENCES hosts (id),
    timestamp INTEGER NOT NULL,
    overload INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS vm_migrations (
    id INTEGER PRIMARY KEY,
    vm_id INTEGER NOT NULL REFERENCES vms (id),
    host_id INTEGER NOT NULL REFERENCES hosts (id),
    timestamp INTEGER NOT NULL
);
";

/// Handle to the central database.
pub struct Database {
    connection: Connection,
}

impl Database {
    /// Opens the database at the given path (`:memory:` is accepted) and
    /// creates missing tables.
    pub fn open(sql_connection: &str) -> Result<Self> {
        let connection = if sql_connection == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(sql_connection)?
        };
        connection.execute_batch(SCHEMA)?;
        Ok(Self { connection })
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    /// Returns the id of a host, creating a placeholder row for hosts not yet
    /// registered by their data collector.
    fn host_id(&self, hostname: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .connection
            .query_row("SELECT id FROM hosts WHERE hostname = ?1", [hostname], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.connection.execute(
            "INSERT INTO hosts (hostname, cpu_mhz, cpu_cores, ram) VALUES (?1, 0, 0, 0)",
            [hostname],
        )?;
        Ok(self.connection.last_insert_rowid())
    }

    /// Returns the id of a VM, creating the row on first sight of the UUID.
    fn vm_id(&self, uuid: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .connection
            .query_row("SELECT id FROM vms WHERE uuid = ?1", [uuid], |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.connection
            .execute("INSERT INTO vms (uuid) VALUES (?1)", [uuid])?;
        Ok(self.connection.last_insert_rowid())
    }

    /// Creates or updates the capacity record of a host.
    pub fn update_host(&self, hostname: &str, cpu_mhz: u64, cpu_cores: u64, ram: u64) -> Result<i64> {
        let id = self.host_id(hostname)?;
        self.connection.execute(
            "UPDATE hosts SET cpu_mhz = ?1, cpu_cores = ?2, ram = ?3 WHERE id = ?4",
            params![cpu_mhz, cpu_cores, ram, id],
        )?;
        Ok(id)
    }

    /// Returns the CPU and RAM capacities of all registered hosts.
    pub fn select_host_characteristics(&self) -> Result<(IndexMap<String, u64>, IndexMap<String, u64>)> {
        let mut stmt = self
            .connection
            .prepare("SELECT hostname, cpu_mhz, ram FROM hosts WHERE cpu_mhz > 0 ORDER BY hostname")?;
        let mut cpu = IndexMap::new();
        let mut ram = IndexMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?, row.get::<_, u64>(2)?))
        })?;
        for row in rows {
            let (hostname, host_cpu, host_ram) = row?;
            cpu.insert(hostname.clone(), host_cpu);
            ram.insert(hostname, host_ram);
        }
        Ok((cpu, ram))
    }

    /// Returns the last `n` CPU MHz samples of a VM, oldest first.
    pub fn select_cpu_mhz_for_vm(&self, uuid: &str, n: usize) -> Result<Vec<u64>> {
        let mut stmt = self.connection.prepare(
            "SELECT u.cpu_mhz FROM vm_resource_usage u
             JOIN vms v ON v.id = u.vm_id
             WHERE v.uuid = ?1 ORDER BY u.id DESC LIMIT ?2",
        )?;
        let mut values: Vec<u64> = stmt
            .query_map(params![uuid, n as i64], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        values.reverse();
        Ok(values)
    }

    /// Returns the most recent CPU MHz sample of every known VM.
    pub fn select_last_cpu_mhz_for_vms(&self) -> Result<IndexMap<String, u64>> {
        let mut stmt = self.connection.prepare(
            "SELECT v.uuid, u.cpu_mhz FROM vm_resource_usage u
             JOIN vms v ON v.id = u.vm_id
             WHERE u.id IN (SELECT MAX(id) FROM vm_resource_usage GROUP BY vm_id)",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?;
        let mut result = IndexMap::new();
        for row in rows {
            let (uuid, mhz) = row?;
            result.insert(uuid, mhz);
        }
        Ok(result)
    }

    /// Appends one CPU MHz sample per VM.
    pub fn insert_vm_cpu_mhz(&self, samples: &IndexMap<String, u64>) -> Result<()> {
        let timestamp = Self::now();
        for (uuid, mhz) in samples {
            let vm_id = self.vm_id(uuid)?;
            self.connection.execute(
                "INSERT INTO vm_resource_usage (vm_id, timestamp, cpu_mhz) VALUES (?1, ?2, ?3)",
                params![vm_id, timestamp, mhz],
            )?;
        }
        Ok(())
    }

    /// Appends one hypervisor CPU MHz sample for a host.
    pub fn insert_host_cpu_mhz(&self, hostname: &str, cpu_mhz: u64) -> Result<()> {
        let host_id = self.host_id(hostname)?;
        self.connection.execute(
            "INSERT INTO host_resource_usage (host_id, timestamp, cpu_mhz) VALUES (?1, ?2, ?3)",
            params![host_id, Self::now(), cpu_mhz],
        )?;
        Ok(())
    }

    /// Returns the most recent hypervisor CPU MHz sample of every host.
    pub fn select_last_host_cpu_mhz(&self) -> Result<IndexMap<String, u64>> {
        let mut stmt = self.connection.prepare(
            "SELECT h.hostname, u.cpu_mhz FROM host_resource_usage u
             JOIN hosts h ON h.id = u.host_id
             WHERE u.id IN (SELECT MAX(id) FROM host_resource_usage GROUP BY host_id)",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?;
        let mut result = IndexMap::new();
        for row in rows {
            let (hostname, mhz) = row?;
            result.insert(hostname, mhz);
        }
        Ok(result)
    }

    /// Records a host overload flag transition.
    pub fn insert_host_overload(&self, hostname: &str, overload: bool) -> Result<()> {
        let host_id = self.host_id(hostname)?;
        self.connection.execute(
            "INSERT INTO host_overload (host_id, timestamp, overload) VALUES (?1, ?2, ?3)",
            params![host_id, Self::now(), overload as i64],
        )?;
        Ok(())
    }

    /// Returns the overload flag history of a host, oldest first.
    pub fn select_host_overload(&self, hostname: &str) -> Result<Vec<bool>> {
        let mut stmt = self.connection.prepare(
            "SELECT o.overload FROM host_overload o
             JOIN hosts h ON h.id = o.host_id
             WHERE h.hostname = ?1 ORDER BY o.id",
        )?;
        let values = stmt
            .query_map([hostname], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values.into_iter().map(|v| v != 0).collect())
    }

    /// Records a power state transition for each of the given hosts.
    pub fn insert_host_states(&self, hostnames: &[String], state: i64) -> Result<()> {
        let timestamp = Self::now();
        for hostname in hostnames {
            let host_id = self.host_id(hostname)?;
            self.connection.execute(
                "INSERT INTO host_states (host_id, timestamp, state) VALUES (?1, ?2, ?3)",
                params![host_id, timestamp, state],
            )?;
        }
        Ok(())
    }

    /// Returns the last recorded power state of every host. Hosts without a
    /// record are assumed on by the callers.
    pub fn select_host_states(&self) -> Result<IndexMap<String, i64>> {
        let mut stmt = self.connection.prepare(
            "SELECT h.hostname, s.state FROM host_states s
             JOIN hosts h ON h.id = s.host_id
             WHERE s.id IN (SELECT MAX(id) FROM host_states GROUP BY host_id)",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut result = IndexMap::new();
        for row in rows {
            let (hostname, state) = row?;
            result.insert(hostname, state);
        }
        Ok(result)
    }

    /// Records a completed VM migration.
    pub fn insert_vm_migration(&self, uuid: &str, hostname: &str) -> Result<()> {
        let vm_id = self.vm_id(uuid)?;
        let host_id = self.host_id(hostname)?;
        self.connection.execute(
            "INSERT INTO vm_migrations (vm_id, host_id, timestamp) VALUES (?1, ?2, ?3)",
            params![vm_id, host_id, Self::now()],
        )?;
        Ok(())
    }

    /// Returns the migration log of a VM as target host names, oldest first.
    pub fn select_vm_migrations(&self, uuid: &str) -> Result<Vec<String>> {
        let mut stmt = self.connection.prepare(
            "SELECT h.hostname FROM vm_migrations m
             JOIN vms v ON v.id = m.vm_id
             JOIN hosts h ON h.id = m.host_id
             WHERE v.uuid = ?1 ORDER BY m.id",
        )?;
        let values = stmt
            .query_map([uuid], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values)
    }

    /// Deletes VM samples older than the cutoff timestamp.
    pub fn cleanup_vm_resource_usage(&self, cutoff: i64) -> Result<usize> {
        Ok(self
            .connection
            .execute("DELETE FROM vm_resource_usage WHERE timestamp < ?1", [cutoff])?)
    }

    /// Deletes host samples older than the cutoff timestamp.
    pub fn cleanup_host_resource_usage(&self, cutoff: i64) -> Result<usize> {
        Ok(self
            .connection
            .execute("DELETE FROM host_resource_usage WHERE timestamp < ?1", [cutoff])?)
    }
}
