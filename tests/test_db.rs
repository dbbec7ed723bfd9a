use indexmap::IndexMap;

use vmpack::db::Database;

fn fresh_db() -> Database {
    Database::open(":memory:").unwrap()
}

fn samples(pairs: &[(&str, u64)]) -> IndexMap<String, u64> {
    pairs.iter().map(|(uuid, mhz)| (uuid.to_string(), *mhz)).collect()
}

#[test]
fn test_host_characteristics_roundtrip() {
    let db = fresh_db();
    db.update_host("host1", 4000, 4, 8192).unwrap();
    db.update_host("host2", 3000, 2, 4096).unwrap();
    // capacity changes are updates, not new rows
    db.update_host("host1", 4400, 4, 8192).unwrap();

    let (cpu, ram) = db.select_host_characteristics().unwrap();
    assert_eq!(cpu["host1"], 4400);
    assert_eq!(cpu["host2"], 3000);
    assert_eq!(ram["host1"], 8192);
    assert_eq!(cpu.len(), 2);
}

#[test]
fn test_placeholder_hosts_are_hidden_from_characteristics() {
    let db = fresh_db();
    // recording a state for an unregistered host creates a placeholder row
    db.insert_host_states(&["host9".to_string()], 1).unwrap();
    let (cpu, _) = db.select_host_characteristics().unwrap();
    assert!(cpu.is_empty());
    assert_eq!(db.select_host_states().unwrap()["host9"], 1);
}

#[test]
fn test_vm_samples_select_last_n() {
    let db = fresh_db();
    for mhz in [100u64, 200, 300, 400] {
        db.insert_vm_cpu_mhz(&samples(&[("vm1", mhz)])).unwrap();
    }
    db.insert_vm_cpu_mhz(&samples(&[("vm2", 50)])).unwrap();

    assert_eq!(db.select_cpu_mhz_for_vm("vm1", 3).unwrap(), vec![200, 300, 400]);
    assert_eq!(db.select_cpu_mhz_for_vm("vm1", 10).unwrap(), vec![100, 200, 300, 400]);
    assert!(db.select_cpu_mhz_for_vm("unknown", 3).unwrap().is_empty());

    let last = db.select_last_cpu_mhz_for_vms().unwrap();
    assert_eq!(last["vm1"], 400);
    assert_eq!(last["vm2"], 50);
}

#[test]
fn test_host_samples_select_last() {
    let db = fresh_db();
    db.insert_host_cpu_mhz("host1", 100).unwrap();
    db.insert_host_cpu_mhz("host1", 150).unwrap();
    db.insert_host_cpu_mhz("host2", 75).unwrap();

    let last = db.select_last_host_cpu_mhz().unwrap();
    assert_eq!(last["host1"], 150);
    assert_eq!(last["host2"], 75);
}

#[test]
fn test_host_overload_log() {
    let db = fresh_db();
    db.insert_host_overload("host1", true).unwrap();
    db.insert_host_overload("host1", false).unwrap();
    assert_eq!(db.select_host_overload("host1").unwrap(), vec![true, false]);
}

#[test]
fn test_host_states_keep_latest() {
    let db = fresh_db();
    db.insert_host_states(&["host1".to_string(), "host2".to_string()], 1).unwrap();
    db.insert_host_states(&["host1".to_string()], 0).unwrap();
    let states = db.select_host_states().unwrap();
    assert_eq!(states["host1"], 0);
    assert_eq!(states["host2"], 1);
}

#[test]
fn test_vm_migrations_log() {
    let db = fresh_db();
    db.insert_vm_migration("vm1", "host2").unwrap();
    db.insert_vm_migration("vm1", "host3").unwrap();
    assert_eq!(db.select_vm_migrations("vm1").unwrap(), vec!["host2", "host3"]);
}

#[test]
fn test_cleanup_by_cutoff() {
    let db = fresh_db();
    db.insert_vm_cpu_mhz(&samples(&[("vm1", 100)])).unwrap();
    db.insert_host_cpu_mhz("host1", 100).unwrap();

    let past = chrono::Utc::now().timestamp() - 3600;
    assert_eq!(db.cleanup_vm_resource_usage(past).unwrap(), 0);
    assert_eq!(db.cleanup_host_resource_usage(past).unwrap(), 0);

    let future = chrono::Utc::now().timestamp() + 3600;
    assert_eq!(db.cleanup_vm_resource_usage(future).unwrap(), 1);
    assert_eq!(db.cleanup_host_resource_usage(future).unwrap(), 1);
    assert!(db.select_last_cpu_mhz_for_vms().unwrap().is_empty());
}
