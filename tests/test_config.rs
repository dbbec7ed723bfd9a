use std::io::Write;

use tempfile::NamedTempFile;

use vmpack::config::{Config, ConfigRaw};

const CONFIG_YAML: &str = r#"
sql_connection: ":memory:"
compute_hosts: "host1, host2, host3"
global_manager_host: "10.0.0.1"
global_manager_port: 8080
log_level: 3
data_collector_interval: 60
algorithm_overload_detection_factory: "otf"
algorithm_overload_detection_parameters: {otf: 0.5, threshold: 1.0, limit: 4}
"#;

#[test]
fn test_from_file_overrides_and_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG_YAML.as_bytes()).unwrap();
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.sql_connection, ":memory:");
    assert_eq!(config.compute_hosts, "host1, host2, host3");
    assert_eq!(config.global_manager_host, "10.0.0.1");
    assert_eq!(config.global_manager_port, 8080);
    assert_eq!(config.log_level, 3);
    assert_eq!(config.data_collector_interval, 60);
    assert_eq!(config.algorithm_overload_detection_factory, "otf");
    assert_eq!(
        config.algorithm_overload_detection_parameters["limit"]
            .as_u64()
            .unwrap(),
        4
    );
    // untouched keys resolve to the defaults
    assert_eq!(config.local_manager_interval, 300);
    assert_eq!(config.migration_chunk_size, 1);
    assert_eq!(config.host_cpu_usable_by_vms, 1.0);
}

#[test]
fn test_retention_defaults_to_cleaner_interval() {
    let raw = ConfigRaw {
        db_cleaner_interval: Some(900),
        ..ConfigRaw::default()
    };
    let config = Config::from_raw(raw);
    assert_eq!(config.db_cleaner_retention, 900);
}

#[test]
fn test_validate() {
    let config = Config::new();
    assert!(config.validate().is_ok());

    let mut broken = Config::new();
    broken.data_collector_data_length = 0;
    assert!(broken.validate().is_err());

    let mut broken = Config::new();
    broken.host_cpu_overload_threshold = 1.5;
    assert!(broken.validate().is_err());

    let mut broken = Config::new();
    broken.network_migration_bandwidth = 0.;
    assert!(broken.validate().is_err());
}
