//! Pluggable consolidation policies.
//!
//! Four policy kinds drive the controller: underload detectors, overload
//! detectors, VM selectors, and VM placement heuristics. Concrete policies
//! are produced by named factories resolved from the configuration; every
//! factory receives the collector time step, the mean migration time, and a
//! JSON parameter object. Policy state lives inside the returned boxed value
//! and persists across ticks.

pub mod mhod;
pub mod otf;
pub mod placement;
pub mod selection;
pub mod statistics;
pub mod trivial;

use indexmap::IndexMap;
use serde_json::Value;

use crate::{Error, Result};

/// Decides whether the host is underloaded given its CPU utilization history
/// (oldest first).
pub trait UnderloadDetector: Send {
    fn detect(&mut self, utilization: &[f64]) -> bool;
}

/// Decides whether the host is overloaded given its CPU utilization history
/// (oldest first).
pub trait OverloadDetector: Send {
    fn detect(&mut self, utilization: &[f64]) -> bool;
}

/// Selects VMs to migrate away from an overloaded host.
pub trait VmSelector: Send {
    fn select(
        &mut self,
        vms_cpu: &IndexMap<String, Vec<u64>>,
        vms_ram: &IndexMap<String, u64>,
    ) -> Vec<String>;
}

/// Inputs of a placement decision. CPU values are MHz, RAM values are MB.
#[derive(Debug, Default, Clone)]
pub struct PlacementRequest {
    pub hosts_cpu_usage: IndexMap<String, u64>,
    pub hosts_cpu_total: IndexMap<String, u64>,
    pub hosts_ram_usage: IndexMap<String, u64>,
    pub hosts_ram_total: IndexMap<String, u64>,
    pub inactive_hosts_cpu: IndexMap<String, u64>,
    pub inactive_hosts_ram: IndexMap<String, u64>,
    pub vms_cpu: IndexMap<String, Vec<u64>>,
    pub vms_ram: IndexMap<String, u64>,
}

/// Computes a VM to host assignment. An empty map means the request cannot be
/// satisfied and nothing should be migrated.
pub trait VmPlacement: Send {
    fn place(&mut self, request: &PlacementRequest) -> IndexMap<String, String>;
}

/// Resolves an underload detector factory by name.
pub fn underload_detector(
    name: &str,
    _time_step: u64,
    _migration_time: f64,
    params: &Value,
) -> Result<Box<dyn UnderloadDetector>> {
    match name {
        "threshold" => Ok(Box::new(trivial::ThresholdUnderload::new(param_f64(params, "threshold")?))),
        "last_n_average_threshold" => Ok(Box::new(trivial::LastNAverageUnderload::new(
            param_f64(params, "threshold")?,
            param_usize(params, "n")?,
        ))),
        "always_underloaded" => Ok(Box::new(trivial::AlwaysUnderloaded)),
        "never_underloaded" => Ok(Box::new(trivial::NeverUnderloaded)),
        other => Err(Error::UnknownAlgorithm(other.to_string())),
    }
}

/// Resolves an overload detector factory by name.
pub fn overload_detector(
    name: &str,
    time_step: u64,
    migration_time: f64,
    params: &Value,
) -> Result<Box<dyn OverloadDetector>> {
    match name {
        "threshold" => Ok(Box::new(trivial::ThresholdOverload::new(param_f64(params, "threshold")?))),
        "last_n_average_threshold" => Ok(Box::new(trivial::LastNAverageOverload::new(
            param_f64(params, "threshold")?,
            param_usize(params, "n")?,
        ))),
        "never_overloaded" => Ok(Box::new(trivial::NeverOverloaded)),
        "otf" => Ok(Box::new(otf::OtfDetector::new(
            param_f64(params, "otf")?,
            param_f64(params, "threshold")?,
            param_usize(params, "limit")?,
            normalized_migration_time(time_step, migration_time),
        ))),
        "loess" => Ok(Box::new(statistics::LoessDetector::new(
            param_f64(params, "threshold")?,
            param_f64(params, "param")?,
            param_usize(params, "length")?,
            normalized_migration_time(time_step, migration_time),
            false,
        ))),
        "loess_robust" => Ok(Box::new(statistics::LoessDetector::new(
            param_f64(params, "threshold")?,
            param_f64(params, "param")?,
            param_usize(params, "length")?,
            normalized_migration_time(time_step, migration_time),
            true,
        ))),
        "mad_threshold" => Ok(Box::new(statistics::MadThresholdDetector::new(
            param_f64(params, "threshold")?,
            param_usize(params, "limit")?,
        ))),
        "iqr_threshold" => Ok(Box::new(statistics::IqrThresholdDetector::new(
            param_f64(params, "threshold")?,
            param_usize(params, "limit")?,
        ))),
        "mhod" => Ok(Box::new(mhod::MhodDetector::new(
            param_f64_list(params, "state_config")?,
            param_f64(params, "otf")?,
            param_usize_list(params, "window_sizes")?,
            param_f64(params, "bruteforce_step")?,
            param_usize(params, "learning_steps")?,
            normalized_migration_time(time_step, migration_time),
        )?)),
        other => Err(Error::UnknownAlgorithm(other.to_string())),
    }
}

/// Resolves a VM selection factory by name.
pub fn vm_selector(
    name: &str,
    _time_step: u64,
    _migration_time: f64,
    params: &Value,
) -> Result<Box<dyn VmSelector>> {
    match name {
        "random" => Ok(Box::new(selection::RandomSelector)),
        "minimum_utilization" => Ok(Box::new(selection::MinimumUtilizationSelector)),
        "minimum_migration_time" => Ok(Box::new(selection::MinimumMigrationTimeSelector)),
        "minimum_migration_time_max_cpu" => Ok(Box::new(
            selection::MinimumMigrationTimeMaxCpuSelector::new(param_usize(params, "last_n")?),
        )),
        other => Err(Error::UnknownAlgorithm(other.to_string())),
    }
}

/// Resolves a VM placement factory by name.
pub fn vm_placement(
    name: &str,
    _time_step: u64,
    _migration_time: f64,
    params: &Value,
) -> Result<Box<dyn VmPlacement>> {
    match name {
        "best_fit_decreasing" => Ok(Box::new(placement::BestFitDecreasing::new(
            param_f64(params, "cpu_threshold")?,
            param_f64(params, "ram_threshold")?,
            param_usize(params, "last_n_vm_cpu")?,
        ))),
        other => Err(Error::UnknownAlgorithm(other.to_string())),
    }
}

/// The migration time expressed in collector time steps.
fn normalized_migration_time(time_step: u64, migration_time: f64) -> f64 {
    if time_step == 0 {
        return migration_time;
    }
    migration_time / time_step as f64
}

fn missing(key: &str) -> Error {
    Error::AlgorithmParams(format!("missing or invalid parameter '{}'", key))
}

pub(crate) fn param_f64(params: &Value, key: &str) -> Result<f64> {
    params.get(key).and_then(Value::as_f64).ok_or_else(|| missing(key))
}

pub(crate) fn param_usize(params: &Value, key: &str) -> Result<usize> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .ok_or_else(|| missing(key))
}

pub(crate) fn param_f64_list(params: &Value, key: &str) -> Result<Vec<f64>> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_f64).collect::<Vec<_>>())
        .filter(|values: &Vec<f64>| !values.is_empty())
        .ok_or_else(|| missing(key))
}

pub(crate) fn param_usize_list(params: &Value, key: &str) -> Result<Vec<usize>> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_u64)
                .map(|v| v as usize)
                .collect::<Vec<_>>()
        })
        .filter(|values: &Vec<usize>| !values.is_empty())
        .ok_or_else(|| missing(key))
}
