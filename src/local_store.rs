//! Local file-based MHz history.
//!
//! The data collector keeps the recent history next to the data it is
//! computed from so the local manager never needs the central database on its
//! hot path. Layout under the local data directory:
//!
//! - `vms/<uuid>`: per-VM history, one decimal MHz value per line, newest
//!   last, at most `data_length` lines, trailing newline;
//! - `host`: the host hypervisor history in the same format.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::Result;

pub struct LocalStore {
    vm_directory: PathBuf,
    host_path: PathBuf,
    data_length: usize,
}

impl LocalStore {
    /// Opens the store rooted at the local data directory, creating the
    /// layout if absent.
    pub fn open(local_data_directory: &str, data_length: usize) -> Result<Self> {
        let root = Path::new(local_data_directory);
        let vm_directory = root.join("vms");
        fs::create_dir_all(&vm_directory)?;
        Ok(Self {
            vm_directory,
            host_path: root.join("host"),
            data_length,
        })
    }

    /// Returns the UUIDs of the VMs present at the previous collection, i.e.
    /// the file names in the VM directory.
    pub fn list_vms(&self) -> Result<Vec<String>> {
        let mut uuids = Vec::new();
        for entry in fs::read_dir(&self.vm_directory)? {
            uuids.push(entry?.file_name().to_string_lossy().into_owned());
        }
        uuids.sort();
        Ok(uuids)
    }

    fn read_values(path: &Path) -> Result<Vec<u64>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(content
            .lines()
            .filter_map(|line| line.trim().parse::<u64>().ok())
            .collect())
    }

    fn write_values(path: &Path, values: &[u64], data_length: usize) -> Result<()> {
        let skip = values.len().saturating_sub(data_length);
        let mut content = String::new();
        for value in &values[skip..] {
            content.push_str(&value.to_string());
            content.push('\n');
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn append_value(path: &Path, value: u64, data_length: usize) -> Result<()> {
        let mut values: VecDeque<u64> = Self::read_values(path)?.into();
        while values.len() >= data_length {
            values.pop_front();
        }
        values.push_back(value);
        Self::write_values(path, &Vec::from(values), data_length)
    }

    /// Reads the history of one VM, oldest first.
    pub fn read_vm(&self, uuid: &str) -> Result<Vec<u64>> {
        Self::read_values(&self.vm_directory.join(uuid))
    }

    /// Reads the histories of all VMs present in the store.
    pub fn read_all_vms(&self) -> Result<IndexMap<String, Vec<u64>>> {
        let mut result = IndexMap::new();
        for uuid in self.list_vms()? {
            let values = self.read_vm(&uuid)?;
            result.insert(uuid, values);
        }
        Ok(result)
    }

    /// Replaces the history of a VM, truncated to the newest `data_length`
    /// entries.
    pub fn write_vm(&self, uuid: &str, values: &[u64]) -> Result<()> {
        Self::write_values(&self.vm_directory.join(uuid), values, self.data_length)
    }

    /// Appends one value to the history of a VM.
    pub fn append_vm(&self, uuid: &str, value: u64) -> Result<()> {
        Self::append_value(&self.vm_directory.join(uuid), value, self.data_length)
    }

    /// Deletes the local data of VMs that left the host.
    pub fn remove_vms(&self, uuids: &[String]) -> Result<()> {
        for uuid in uuids {
            let path = self.vm_directory.join(uuid);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Reads the host hypervisor history, oldest first.
    pub fn read_host(&self) -> Result<Vec<u64>> {
        Self::read_values(&self.host_path)
    }

    /// Appends one value to the host hypervisor history.
    pub fn append_host(&self, value: u64) -> Result<()> {
        Self::append_value(&self.host_path, value, self.data_length)
    }

    /// Deletes all VM and host history. Invoked on collector startup since
    /// data from a previous boot no longer lines up with the counters.
    pub fn cleanup_all(&self) -> Result<()> {
        let uuids = self.list_vms()?;
        self.remove_vms(&uuids)?;
        if self.host_path.exists() {
            fs::remove_file(&self.host_path)?;
        }
        Ok(())
    }
}
