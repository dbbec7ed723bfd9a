use indexmap::IndexMap;

use vmpack::algorithms::selection::{
    MinimumMigrationTimeMaxCpuSelector, MinimumMigrationTimeSelector, MinimumUtilizationSelector,
    RandomSelector,
};
use vmpack::algorithms::VmSelector;

fn fixture() -> (IndexMap<String, Vec<u64>>, IndexMap<String, u64>) {
    let vms_cpu: IndexMap<String, Vec<u64>> = [
        ("vm1".to_string(), vec![800, 1000]),
        ("vm2".to_string(), vec![900, 300]),
        ("vm3".to_string(), vec![200, 500]),
    ]
    .into_iter()
    .collect();
    let vms_ram: IndexMap<String, u64> = [
        ("vm1".to_string(), 2048u64),
        ("vm2".to_string(), 512),
        ("vm3".to_string(), 1024),
    ]
    .into_iter()
    .collect();
    (vms_cpu, vms_ram)
}

#[test]
fn test_random_picks_an_existing_vm() {
    let (vms_cpu, vms_ram) = fixture();
    let mut selector = RandomSelector;
    for _ in 0..10 {
        let selected = selector.select(&vms_cpu, &vms_ram);
        assert_eq!(selected.len(), 1);
        assert!(vms_cpu.contains_key(&selected[0]));
    }
    assert!(selector.select(&IndexMap::new(), &IndexMap::new()).is_empty());
}

#[test]
fn test_minimum_utilization() {
    let (vms_cpu, vms_ram) = fixture();
    let mut selector = MinimumUtilizationSelector;
    assert_eq!(selector.select(&vms_cpu, &vms_ram), vec!["vm2"]);
    assert!(selector.select(&IndexMap::new(), &IndexMap::new()).is_empty());
}

#[test]
fn test_minimum_migration_time() {
    let (vms_cpu, vms_ram) = fixture();
    let mut selector = MinimumMigrationTimeSelector;
    assert_eq!(selector.select(&vms_cpu, &vms_ram), vec!["vm2"]);
}

#[test]
fn test_minimum_migration_time_max_cpu() {
    let vms_cpu: IndexMap<String, Vec<u64>> = [
        ("vm1".to_string(), vec![100, 1000]),
        ("vm2".to_string(), vec![900, 300]),
        ("vm3".to_string(), vec![800, 500]),
    ]
    .into_iter()
    .collect();
    // vm2 and vm3 tie on RAM; vm3 has the larger two-sample average
    let vms_ram: IndexMap<String, u64> = [
        ("vm1".to_string(), 2048u64),
        ("vm2".to_string(), 512),
        ("vm3".to_string(), 512),
    ]
    .into_iter()
    .collect();
    let mut selector = MinimumMigrationTimeMaxCpuSelector::new(2);
    assert_eq!(selector.select(&vms_cpu, &vms_ram), vec!["vm3"]);

    let mut selector = MinimumMigrationTimeMaxCpuSelector::new(1);
    assert_eq!(selector.select(&vms_cpu, &vms_ram), vec!["vm3"]);
}
