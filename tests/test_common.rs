use indexmap::IndexMap;
use sugars::hmap;

use vmpack::common::{
    calculate_migration_time, frange, host_utilization_history, parse_compute_hosts, sha1_hex,
};

#[test]
fn test_parse_compute_hosts() {
    assert!(parse_compute_hosts("").is_empty());
    assert_eq!(parse_compute_hosts("test1 test2"), vec!["test1", "test2"]);
    assert_eq!(parse_compute_hosts("t1,,  t2 , t3"), vec!["t1", "t2", "t3"]);
    assert_eq!(
        parse_compute_hosts("compute1.example.com,compute2.example.com"),
        vec!["compute1.example.com", "compute2.example.com"]
    );
}

#[test]
fn test_sha1_hex() {
    assert_eq!(sha1_hex("admin"), "d033e22ae348aeb5660fc2140aec35850c4da997");
    assert_eq!(sha1_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
}

#[test]
fn test_host_utilization_history_aligns_by_left_padding() {
    let vms: IndexMap<String, Vec<u64>> = hmap! {
        "vm1".to_string() => vec![1000, 1000, 1000],
        "vm2".to_string() => vec![500],
    }
    .into_iter()
    .collect();
    let host = vec![100, 100];
    let utilization = host_utilization_history(&vms, &host, 4000);
    assert_eq!(utilization, vec![0.25, 0.275, 0.4]);
}

#[test]
fn test_host_utilization_history_empty() {
    let vms: IndexMap<String, Vec<u64>> = IndexMap::new();
    assert!(host_utilization_history(&vms, &[], 4000).is_empty());
}

#[test]
fn test_calculate_migration_time() {
    let vms: IndexMap<String, u64> = hmap! {
        "vm1".to_string() => 2048u64,
        "vm2".to_string() => 1024,
    }
    .into_iter()
    .collect();
    assert_eq!(calculate_migration_time(&vms, 10.), 153.6);
    assert_eq!(calculate_migration_time(&IndexMap::new(), 10.), 0.);
}

#[test]
fn test_frange() {
    let values: Vec<f64> = frange(0., 1., 0.5).collect();
    assert_eq!(values, vec![0., 0.5, 1.]);
    let values: Vec<f64> = frange(0., 0.2, 0.5).collect();
    assert_eq!(values, vec![0.]);
}
