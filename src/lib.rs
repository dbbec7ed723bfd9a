//! Dynamic VM consolidation controller for IaaS compute clusters.
//!
//! vmpack continuously re-packs running VMs onto as few compute hosts as
//! possible and powers unused hosts down, while relocating VMs away from
//! overloaded hosts. It consists of three long-running components sharing one
//! SQLite store and one HTTP endpoint:
//!
//! - the *data collector* (per host) samples per-VM and hypervisor CPU
//!   consumption in MHz and maintains a bounded history both locally and in
//!   the central database;
//! - the *local manager* (per host) runs underload/overload detectors over
//!   that history and posts reallocation requests;
//! - the *global manager* (one per cluster) validates requests, computes VM
//!   placements and drives live migrations and host power transitions.
//!
//! Detectors, VM selection policies and placement heuristics are pluggable
//! and resolved by name from the configuration (see [`algorithms`]).

pub mod algorithms;
pub mod cloud;
pub mod collector;
pub mod common;
pub mod config;
pub mod db;
pub mod db_cleaner;
pub mod global_manager;
pub mod hypervisor;
pub mod local_manager;
pub mod local_store;
pub mod migration;
pub mod power;

use thiserror::Error;

/// Errors produced by vmpack components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("bad algorithm parameters: {0}")]
    AlgorithmParams(String),
    #[error("hypervisor error: {0}")]
    Hypervisor(String),
    #[error("cloud controller error: {0}")]
    Cloud(String),
    #[error("power management error: {0}")]
    Power(String),
}

pub type Result<T> = std::result::Result<T, Error>;
