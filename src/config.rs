//! Controller configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vmpack/vmpack.yaml";

/// Auxiliary structure to parse Config from a file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct ConfigRaw {
    /// path of the central SQLite database
    pub sql_connection: Option<String>,
    /// comma/whitespace separated list of managed compute hosts
    pub compute_hosts: Option<String>,
    /// address the global manager binds to
    pub global_manager_host: Option<String>,
    /// port the global manager binds to
    pub global_manager_port: Option<u16>,
    /// root directory of the local MHz history
    pub local_data_directory: Option<String>,
    /// directory for component log files
    pub log_directory: Option<String>,
    /// log verbosity: 0=off, 1=warn, 2=info, 3=debug
    pub log_level: Option<u8>,
    /// local manager tick period, seconds
    pub local_manager_interval: Option<u64>,
    /// data collector tick period, seconds
    pub data_collector_interval: Option<u64>,
    /// database cleaner tick period, seconds
    pub db_cleaner_interval: Option<u64>,
    /// age cutoff for sample rows, seconds
    pub db_cleaner_retention: Option<u64>,
    /// number of retained samples per VM
    pub data_collector_data_length: Option<usize>,
    /// CPU utilization above which the host overload flag is raised
    pub host_cpu_overload_threshold: Option<f64>,
    /// fraction of the host CPU capacity usable by VMs
    pub host_cpu_usable_by_vms: Option<f64>,
    /// network bandwidth available to migrations, MB/s
    pub network_migration_bandwidth: Option<f64>,
    /// SSH user for host power management
    pub compute_user: Option<String>,
    /// SSH password for host power management (unused with key-based auth)
    pub compute_password: Option<String>,
    /// command switching a host to sleep; empty records the transition only
    pub sleep_command: Option<String>,
    /// interface the wake-on-LAN packets are sent from
    pub ether_wake_interface: Option<String>,
    /// cloud controller admin user
    pub os_admin_user: Option<String>,
    /// cloud controller admin password
    pub os_admin_password: Option<String>,
    /// cloud controller tenant
    pub os_admin_tenant_name: Option<String>,
    /// cloud controller authentication URL
    pub os_auth_url: Option<String>,
    /// directory holding VM instance files
    pub vm_instance_directory: Option<String>,
    /// identity the instance directory is chown'd to before migration
    pub vm_instance_owner: Option<String>,
    /// number of VMs migrated concurrently
    pub migration_chunk_size: Option<usize>,
    /// per-VM migration budget, seconds
    pub migration_timeout: Option<u64>,
    /// placement re-check period during migration, seconds
    pub migration_poll_interval: Option<u64>,
    /// delay before the first migration poll, seconds
    pub migration_settle_time: Option<u64>,
    /// bound on migration retry rounds
    pub migration_retries: Option<u32>,
    /// request block migration from the cloud controller
    pub block_migration: Option<bool>,
    /// underload detector factory name
    pub algorithm_underload_detection_factory: Option<String>,
    /// underload detector parameters
    pub algorithm_underload_detection_parameters: Option<serde_json::Value>,
    /// overload detector factory name
    pub algorithm_overload_detection_factory: Option<String>,
    /// overload detector parameters
    pub algorithm_overload_detection_parameters: Option<serde_json::Value>,
    /// VM selection factory name
    pub algorithm_vm_selection_factory: Option<String>,
    /// VM selection parameters
    pub algorithm_vm_selection_parameters: Option<serde_json::Value>,
    /// VM placement factory name
    pub algorithm_vm_placement_factory: Option<String>,
    /// VM placement parameters
    pub algorithm_vm_placement_parameters: Option<serde_json::Value>,
}

/// Controller configuration shared by all components.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct Config {
    pub sql_connection: String,
    pub compute_hosts: String,
    pub global_manager_host: String,
    pub global_manager_port: u16,
    pub local_data_directory: String,
    pub log_directory: String,
    pub log_level: u8,
    pub local_manager_interval: u64,
    pub data_collector_interval: u64,
    pub db_cleaner_interval: u64,
    pub db_cleaner_retention: u64,
    pub data_collector_data_length: usize,
    pub host_cpu_overload_threshold: f64,
    pub host_cpu_usable_by_vms: f64,
    pub network_migration_bandwidth: f64,
    pub compute_user: String,
    pub compute_password: String,
    pub sleep_command: String,
    pub ether_wake_interface: String,
    pub os_admin_user: String,
    pub os_admin_password: String,
    pub os_admin_tenant_name: String,
    pub os_auth_url: String,
    pub vm_instance_directory: String,
    pub vm_instance_owner: String,
    pub migration_chunk_size: usize,
    pub migration_timeout: u64,
    pub migration_poll_interval: u64,
    pub migration_settle_time: u64,
    pub migration_retries: u32,
    pub block_migration: bool,
    pub algorithm_underload_detection_factory: String,
    pub algorithm_underload_detection_parameters: serde_json::Value,
    pub algorithm_overload_detection_factory: String,
    pub algorithm_overload_detection_parameters: serde_json::Value,
    pub algorithm_vm_selection_factory: String,
    pub algorithm_vm_selection_parameters: serde_json::Value,
    pub algorithm_vm_placement_factory: String,
    pub algorithm_vm_placement_parameters: serde_json::Value,
}

impl Config {
    /// Creates a configuration with default parameter values.
    pub fn new() -> Self {
        let empty = serde_json::json!({});
        Self {
            sql_connection: "/var/lib/vmpack/vmpack.db".to_string(),
            compute_hosts: String::new(),
            global_manager_host: "localhost".to_string(),
            global_manager_port: 60080,
            local_data_directory: "/var/lib/vmpack".to_string(),
            log_directory: "/var/log/vmpack".to_string(),
            log_level: 2,
            local_manager_interval: 300,
            data_collector_interval: 300,
            db_cleaner_interval: 7200,
            db_cleaner_retention: 7200,
            data_collector_data_length: 100,
            host_cpu_overload_threshold: 0.8,
            host_cpu_usable_by_vms: 1.0,
            network_migration_bandwidth: 10.,
            compute_user: "vmpack".to_string(),
            compute_password: String::new(),
            sleep_command: "pm-suspend".to_string(),
            ether_wake_interface: "eth0".to_string(),
            os_admin_user: "admin".to_string(),
            os_admin_password: "admin".to_string(),
            os_admin_tenant_name: "admin".to_string(),
            os_auth_url: "http://localhost:5000/v2.0/".to_string(),
            vm_instance_directory: "/var/lib/nova/instances".to_string(),
            vm_instance_owner: "nova:nova".to_string(),
            migration_chunk_size: 1,
            migration_timeout: 300,
            migration_poll_interval: 3,
            migration_settle_time: 10,
            migration_retries: 3,
            block_migration: false,
            algorithm_underload_detection_factory: "threshold".to_string(),
            algorithm_underload_detection_parameters: serde_json::json!({"threshold": 0.5}),
            algorithm_overload_detection_factory: "threshold".to_string(),
            algorithm_overload_detection_parameters: serde_json::json!({"threshold": 0.9}),
            algorithm_vm_selection_factory: "minimum_migration_time".to_string(),
            algorithm_vm_selection_parameters: empty.clone(),
            algorithm_vm_placement_factory: "best_fit_decreasing".to_string(),
            algorithm_vm_placement_parameters: serde_json::json!({
                "cpu_threshold": 0.8, "ram_threshold": 0.9, "last_n_vm_cpu": 2}),
        }
    }

    /// Creates a configuration by reading parameter values from a YAML file
    /// (uses default values for absent parameters).
    pub fn from_file(file_name: &str) -> Result<Self> {
        let raw: ConfigRaw = serde_yaml::from_str(&std::fs::read_to_string(file_name)?)?;
        Ok(Self::from_raw(raw))
    }

    /// Resolves a raw parsed configuration against the defaults.
    pub fn from_raw(raw: ConfigRaw) -> Self {
        let default = Config::new();
        Self {
            sql_connection: raw.sql_connection.unwrap_or(default.sql_connection),
            compute_hosts: raw.compute_hosts.unwrap_or(default.compute_hosts),
            global_manager_host: raw.global_manager_host.unwrap_or(default.global_manager_host),
            global_manager_port: raw.global_manager_port.unwrap_or(default.global_manager_port),
            local_data_directory: raw.local_data_directory.unwrap_or(default.local_data_directory),
            log_directory: raw.log_directory.unwrap_or(default.log_directory),
            log_level: raw.log_level.unwrap_or(default.log_level),
            local_manager_interval: raw.local_manager_interval.unwrap_or(default.local_manager_interval),
            data_collector_interval: raw.data_collector_interval.unwrap_or(default.data_collector_interval),
            db_cleaner_interval: raw.db_cleaner_interval.unwrap_or(default.db_cleaner_interval),
            db_cleaner_retention: raw
                .db_cleaner_retention
                .or(raw.db_cleaner_interval)
                .unwrap_or(default.db_cleaner_retention),
            data_collector_data_length: raw
                .data_collector_data_length
                .unwrap_or(default.data_collector_data_length),
            host_cpu_overload_threshold: raw
                .host_cpu_overload_threshold
                .unwrap_or(default.host_cpu_overload_threshold),
            host_cpu_usable_by_vms: raw.host_cpu_usable_by_vms.unwrap_or(default.host_cpu_usable_by_vms),
            network_migration_bandwidth: raw
                .network_migration_bandwidth
                .unwrap_or(default.network_migration_bandwidth),
            compute_user: raw.compute_user.unwrap_or(default.compute_user),
            compute_password: raw.compute_password.unwrap_or(default.compute_password),
            sleep_command: raw.sleep_command.unwrap_or(default.sleep_command),
            ether_wake_interface: raw.ether_wake_interface.unwrap_or(default.ether_wake_interface),
            os_admin_user: raw.os_admin_user.unwrap_or(default.os_admin_user),
            os_admin_password: raw.os_admin_password.unwrap_or(default.os_admin_password),
            os_admin_tenant_name: raw.os_admin_tenant_name.unwrap_or(default.os_admin_tenant_name),
            os_auth_url: raw.os_auth_url.unwrap_or(default.os_auth_url),
            vm_instance_directory: raw.vm_instance_directory.unwrap_or(default.vm_instance_directory),
            vm_instance_owner: raw.vm_instance_owner.unwrap_or(default.vm_instance_owner),
            migration_chunk_size: raw.migration_chunk_size.unwrap_or(default.migration_chunk_size),
            migration_timeout: raw.migration_timeout.unwrap_or(default.migration_timeout),
            migration_poll_interval: raw
                .migration_poll_interval
                .unwrap_or(default.migration_poll_interval),
            migration_settle_time: raw.migration_settle_time.unwrap_or(default.migration_settle_time),
            migration_retries: raw.migration_retries.unwrap_or(default.migration_retries),
            block_migration: raw.block_migration.unwrap_or(default.block_migration),
            algorithm_underload_detection_factory: raw
                .algorithm_underload_detection_factory
                .unwrap_or(default.algorithm_underload_detection_factory),
            algorithm_underload_detection_parameters: raw
                .algorithm_underload_detection_parameters
                .unwrap_or(default.algorithm_underload_detection_parameters),
            algorithm_overload_detection_factory: raw
                .algorithm_overload_detection_factory
                .unwrap_or(default.algorithm_overload_detection_factory),
            algorithm_overload_detection_parameters: raw
                .algorithm_overload_detection_parameters
                .unwrap_or(default.algorithm_overload_detection_parameters),
            algorithm_vm_selection_factory: raw
                .algorithm_vm_selection_factory
                .unwrap_or(default.algorithm_vm_selection_factory),
            algorithm_vm_selection_parameters: raw
                .algorithm_vm_selection_parameters
                .unwrap_or(default.algorithm_vm_selection_parameters),
            algorithm_vm_placement_factory: raw
                .algorithm_vm_placement_factory
                .unwrap_or(default.algorithm_vm_placement_factory),
            algorithm_vm_placement_parameters: raw
                .algorithm_vm_placement_parameters
                .unwrap_or(default.algorithm_vm_placement_parameters),
        }
    }

    /// Checks the invariants the components rely on. Invoked once at startup;
    /// a violation is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.data_collector_interval == 0 || self.local_manager_interval == 0 {
            return Err(Error::Config("tick intervals must be positive".to_string()));
        }
        if self.data_collector_data_length == 0 {
            return Err(Error::Config(
                "data_collector_data_length must be positive".to_string(),
            ));
        }
        for (key, value) in [
            ("host_cpu_overload_threshold", self.host_cpu_overload_threshold),
            ("host_cpu_usable_by_vms", self.host_cpu_usable_by_vms),
        ] {
            if value <= 0. || value > 1. {
                return Err(Error::Config(format!("{} must be within (0, 1]", key)));
            }
        }
        if self.network_migration_bandwidth <= 0. {
            return Err(Error::Config(
                "network_migration_bandwidth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
