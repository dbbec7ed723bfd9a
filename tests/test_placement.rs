use indexmap::IndexMap;

use vmpack::algorithms::placement::{available_resources, best_fit_decreasing, BestFitDecreasing};
use vmpack::algorithms::{PlacementRequest, VmPlacement};

fn map<V: Copy>(pairs: &[(&str, V)]) -> IndexMap<String, V> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn histories(pairs: &[(&str, &[u64])]) -> IndexMap<String, Vec<u64>> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect()
}

fn expect(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn test_available_resources() {
    let available = available_resources(
        0.8,
        &map(&[("host1", 700u64), ("host2", 200)]),
        &map(&[("host1", 1000u64), ("host2", 2000)]),
    );
    assert_eq!(available["host1"], 100);
    assert_eq!(available["host2"], 1400);
}

#[test]
fn test_bfd_distinct_shapes() {
    let placement = best_fit_decreasing(
        1,
        map(&[("host1", 3000i64), ("host2", 1000), ("host3", 2000)]),
        map(&[("host1", 1024i64), ("host2", 4096), ("host3", 2048)]),
        &IndexMap::new(),
        &IndexMap::new(),
        &histories(&[
            ("vm1", &[100, 2000]),
            ("vm2", &[100, 1000]),
            ("vm3", &[100, 3000]),
        ]),
        &map(&[("vm1", 512u64), ("vm2", 512), ("vm3", 512)]),
    );
    assert_eq!(
        placement,
        expect(&[("vm1", "host3"), ("vm2", "host2"), ("vm3", "host1")])
    );
}

#[test]
fn test_bfd_prefers_tightest_fit() {
    let placement = best_fit_decreasing(
        1,
        map(&[("host1", 3000i64), ("host2", 1000), ("host3", 2000)]),
        map(&[("host1", 4096i64), ("host2", 1024), ("host3", 2048)]),
        &IndexMap::new(),
        &IndexMap::new(),
        &histories(&[
            ("vm1", &[100, 1000]),
            ("vm2", &[100, 1000]),
            ("vm3", &[100, 1000]),
        ]),
        &map(&[("vm1", 1536u64), ("vm2", 512), ("vm3", 1536)]),
    );
    assert_eq!(
        placement,
        expect(&[("vm1", "host1"), ("vm2", "host2"), ("vm3", "host3")])
    );

    let placement = best_fit_decreasing(
        1,
        map(&[("host1", 3000i64), ("host2", 1000), ("host3", 2000)]),
        map(&[("host1", 4096i64), ("host2", 1024), ("host3", 2048)]),
        &IndexMap::new(),
        &IndexMap::new(),
        &histories(&[
            ("vm1", &[100, 1000]),
            ("vm2", &[100, 1000]),
            ("vm3", &[100, 1000]),
        ]),
        &map(&[("vm1", 1536u64), ("vm2", 1536), ("vm3", 1536)]),
    );
    assert_eq!(
        placement,
        expect(&[("vm1", "host1"), ("vm2", "host1"), ("vm3", "host3")])
    );
}

#[test]
fn test_bfd_no_fit_returns_empty() {
    let placement = best_fit_decreasing(
        1,
        map(&[("host1", 3000i64), ("host2", 1000), ("host3", 2000)]),
        map(&[("host1", 4096i64), ("host2", 1024), ("host3", 2048)]),
        &IndexMap::new(),
        &IndexMap::new(),
        &histories(&[
            ("vm1", &[100, 1000]),
            ("vm2", &[100, 1000]),
            ("vm3", &[100, 1000]),
        ]),
        &map(&[("vm1", 3072u64), ("vm2", 1536), ("vm3", 1536)]),
    );
    assert!(placement.is_empty());
}

#[test]
fn test_bfd_activates_inactive_hosts() {
    let vms_cpu = histories(&[
        ("vm1", &[100, 1000]),
        ("vm2", &[100, 1000]),
        ("vm3", &[100, 1000]),
    ]);
    let placement = best_fit_decreasing(
        1,
        map(&[("host1", 3000i64), ("host2", 1000), ("host3", 2000)]),
        map(&[("host1", 4096i64), ("host2", 1024), ("host3", 2048)]),
        &map(&[("host4", 3000u64), ("host5", 1000), ("host6", 2000)]),
        &map(&[("host4", 4096u64), ("host5", 1024), ("host6", 2048)]),
        &vms_cpu,
        &map(&[("vm1", 2048u64), ("vm2", 4096), ("vm3", 2048)]),
    );
    assert_eq!(
        placement,
        expect(&[("vm2", "host1"), ("vm3", "host3"), ("vm1", "host6")])
    );
}

#[test]
fn test_bfd_infeasible_even_with_inactive_hosts() {
    let placement = best_fit_decreasing(
        1,
        map(&[("host1", 3000i64), ("host2", 1000), ("host3", 2000)]),
        map(&[("host1", 4096i64), ("host2", 1024), ("host3", 2048)]),
        &map(&[("host4", 3000u64), ("host5", 1000), ("host6", 2000)]),
        &map(&[("host4", 4096u64), ("host5", 1024), ("host6", 2048)]),
        &histories(&[
            ("vm1", &[100, 1000]),
            ("vm2", &[100, 1000]),
            ("vm3", &[100, 1000]),
        ]),
        &map(&[("vm1", 2048u64), ("vm2", 5120), ("vm3", 2048)]),
    );
    assert!(placement.is_empty());
}

#[test]
fn test_bfd_averages_the_last_n_samples() {
    let placement = best_fit_decreasing(
        2,
        map(&[("host1", 3000i64), ("host2", 1000), ("host3", 2000)]),
        map(&[("host1", 4096i64), ("host2", 1024), ("host3", 2048)]),
        &IndexMap::new(),
        &IndexMap::new(),
        &histories(&[
            ("vm1", &[1000, 1000]),
            ("vm2", &[0, 2000]),
            ("vm3", &[500, 1500]),
        ]),
        &map(&[("vm1", 1536u64), ("vm2", 1536), ("vm3", 1536)]),
    );
    assert_eq!(
        placement,
        expect(&[("vm1", "host1"), ("vm2", "host1"), ("vm3", "host3")])
    );
}

// Applying a non-empty placement never overdraws a host, and every VM is
// assigned exactly once.
#[test]
fn test_bfd_placement_is_consistent() {
    let hosts_cpu = map(&[("host1", 2500i64), ("host2", 1800), ("host3", 900)]);
    let hosts_ram = map(&[("host1", 3000i64), ("host2", 2500), ("host3", 1500)]);
    let vms_cpu = histories(&[
        ("vm1", &[700]),
        ("vm2", &[1200]),
        ("vm3", &[300]),
        ("vm4", &[900]),
    ]);
    let vms_ram = map(&[("vm1", 1000u64), ("vm2", 800), ("vm3", 700), ("vm4", 1200)]);

    let placement = best_fit_decreasing(
        1,
        hosts_cpu.clone(),
        hosts_ram.clone(),
        &IndexMap::new(),
        &IndexMap::new(),
        &vms_cpu,
        &vms_ram,
    );
    assert_eq!(placement.len(), vms_cpu.len());

    let mut remaining_cpu = hosts_cpu.clone();
    let mut remaining_ram = hosts_ram.clone();
    for (vm, host) in &placement {
        *remaining_cpu.get_mut(host).unwrap() -= vms_cpu[vm].last().copied().unwrap() as i64;
        *remaining_ram.get_mut(host).unwrap() -= vms_ram[vm] as i64;
    }
    assert!(remaining_cpu.values().all(|&cpu| cpu >= 0));
    assert!(remaining_ram.values().all(|&ram| ram >= 0));
}

// The full policy with thresholds, over the underload scenario: the single
// VM of the evacuated host lands on the smallest host that still fits it.
#[test]
fn test_policy_underload_scenario() {
    let mut policy = BestFitDecreasing::new(0.8, 0.9, 1);
    let request = PlacementRequest {
        hosts_cpu_usage: map(&[("host2", 2200u64), ("host3", 1200)]),
        hosts_cpu_total: map(&[("host2", 4000u64), ("host3", 4000)]),
        hosts_ram_usage: map(&[("host2", 6348u64), ("host3", 5324)]),
        hosts_ram_total: map(&[("host2", 8192u64), ("host3", 8192)]),
        vms_cpu: histories(&[("vm1", &[500, 1000])]),
        vms_ram: map(&[("vm1", 2048u64)]),
        ..PlacementRequest::default()
    };
    let placement = policy.place(&request);
    assert_eq!(placement, expect(&[("vm1", "host3")]));
}

#[test]
fn test_policy_with_thresholds_and_inactive_hosts() {
    let mut policy = BestFitDecreasing::new(0.8, 0.9, 1);
    let request = PlacementRequest {
        hosts_cpu_usage: map(&[("host1", 200u64), ("host2", 2200), ("host3", 1200)]),
        hosts_cpu_total: map(&[("host1", 4000u64), ("host2", 4000), ("host3", 4000)]),
        hosts_ram_usage: map(&[("host1", 3276u64), ("host2", 6348), ("host3", 5324)]),
        hosts_ram_total: map(&[("host1", 8192u64), ("host2", 8192), ("host3", 8192)]),
        inactive_hosts_cpu: map(&[("host4", 3000u64), ("host5", 1000), ("host6", 2000)]),
        inactive_hosts_ram: map(&[("host4", 4096u64), ("host5", 1024), ("host6", 2048)]),
        vms_cpu: histories(&[
            ("vm1", &[100, 1000]),
            ("vm2", &[100, 1000]),
            ("vm3", &[100, 1000]),
        ]),
        vms_ram: map(&[("vm1", 2048u64), ("vm2", 4096), ("vm3", 2048)]),
    };
    let placement = policy.place(&request);
    assert_eq!(
        placement,
        expect(&[("vm1", "host6"), ("vm2", "host1"), ("vm3", "host3")])
    );
}
