use std::fs;

use tempfile::TempDir;

use vmpack::local_store::LocalStore;

fn store(data_length: usize) -> (TempDir, LocalStore) {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::open(dir.path().to_str().unwrap(), data_length).unwrap();
    (dir, store)
}

#[test]
fn test_write_then_append_truncates() {
    let (dir, store) = store(3);
    store.write_vm("vm1", &[10, 20, 30, 40]).unwrap();
    store.append_vm("vm1", 50).unwrap();

    let content = fs::read_to_string(dir.path().join("vms").join("vm1")).unwrap();
    assert_eq!(content, "30\n40\n50\n");
    assert_eq!(store.read_vm("vm1").unwrap(), vec![30, 40, 50]);
}

#[test]
fn test_history_never_exceeds_data_length() {
    let (_dir, store) = store(5);
    for value in 0..20u64 {
        store.append_vm("vm1", value).unwrap();
        assert!(store.read_vm("vm1").unwrap().len() <= 5);
    }
    assert_eq!(store.read_vm("vm1").unwrap(), vec![15, 16, 17, 18, 19]);
}

#[test]
fn test_list_and_remove() {
    let (_dir, store) = store(3);
    store.append_vm("vm1", 1).unwrap();
    store.append_vm("vm2", 2).unwrap();
    assert_eq!(store.list_vms().unwrap(), vec!["vm1", "vm2"]);

    store.remove_vms(&["vm1".to_string()]).unwrap();
    assert_eq!(store.list_vms().unwrap(), vec!["vm2"]);

    let all = store.read_all_vms().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all["vm2"], vec![2]);
}

#[test]
fn test_host_history() {
    let (_dir, store) = store(2);
    assert!(store.read_host().unwrap().is_empty());
    store.append_host(100).unwrap();
    store.append_host(200).unwrap();
    store.append_host(300).unwrap();
    assert_eq!(store.read_host().unwrap(), vec![200, 300]);
}

#[test]
fn test_cleanup_all() {
    let (dir, store) = store(3);
    store.append_vm("vm1", 1).unwrap();
    store.append_host(2).unwrap();
    store.cleanup_all().unwrap();
    assert!(store.list_vms().unwrap().is_empty());
    assert!(!dir.path().join("host").exists());
}

#[test]
fn test_read_missing_vm_is_empty() {
    let (_dir, store) = store(3);
    assert!(store.read_vm("absent").unwrap().is_empty());
}
