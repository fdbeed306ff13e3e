//! End-to-end provisioning scenarios against the in-memory IPAM fake.

use leasehold::test_support::{FakeIpam, InMemoryInventory, InMemoryOptions, test_config};
use leasehold::workflow::{IP_ATTRIBUTE, keys};
use leasehold::{
    MacAddress, OptionStore, VmInventory, VmRecord, WorkflowOutcome, run_provision, run_register,
    run_unregister,
};

fn seeded_options(pairs: &[(&str, &str)]) -> InMemoryOptions {
    InMemoryOptions::seeded(pairs.iter().copied())
}

#[tokio::test]
async fn acquire_reserves_a_generated_name_under_a_placeholder_mac() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    ipam.add_free_address("10.0.0.5");
    let mut options = seeded_options(&[
        (keys::VM_CONFIG_NETWORK, "10.0.0.0/24 lab.example"),
        (keys::VM_HOSTNAME, "auto"),
    ]);
    let mut inventory = InMemoryInventory::new();

    let outcome = run_provision(&ipam, test_config(), &mut options, &mut inventory).await;
    assert_eq!(outcome, WorkflowOutcome::Completed);

    assert_eq!(options.get(keys::VM_TARGET_HOSTNAME).as_deref(), Some("cf000001"));
    assert_eq!(options.get(keys::VM_NAME).as_deref(), Some("cf000001"));
    assert_eq!(
        options.get(keys::VM_FQDN).as_deref(),
        Some("cf000001.lab.example")
    );
    assert_eq!(options.get(keys::VM_IP_ADDR).as_deref(), Some("10.0.0.5"));
    assert!(options.get(keys::IPAM_VM_ID).is_some());

    let assignments = ipam.assignments();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].action, "MAKE_DHCP_RESERVED");
    assert_eq!(assignments[0].host_info, "cf000001.lab.example,5,true,false");
    let placeholder: MacAddress = assignments[0].mac.parse().expect("placeholder mac");
    assert!(
        placeholder.octets()[0] & 0x02 != 0,
        "placeholder MAC must be locally administered, got {placeholder}"
    );
}

#[tokio::test]
async fn acquire_continues_the_sequence_across_ipam_and_inventory() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    ipam.add_free_address("10.0.0.9");
    ipam.add_registered_name("cf000041");
    let mut options = seeded_options(&[
        (keys::VM_CONFIG_NETWORK, "10.0.0.0/24 lab.example"),
        (keys::VM_TARGET_NAME, "auto"),
    ]);
    let mut inventory = InMemoryInventory::new();
    inventory.add(VmRecord {
        name: String::from("cf000043"),
        ..VmRecord::default()
    });

    let outcome = run_provision(&ipam, test_config(), &mut options, &mut inventory).await;
    assert_eq!(outcome, WorkflowOutcome::Completed);
    assert_eq!(options.get(keys::VM_TARGET_HOSTNAME).as_deref(), Some("cf000044"));
}

#[tokio::test]
async fn acquire_aborts_on_a_requested_name_conflict() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    ipam.add_free_address("10.0.0.5");
    ipam.add_registered_name("webserver01");
    let mut options = seeded_options(&[
        (keys::VM_CONFIG_NETWORK, "10.0.0.0/24 lab.example"),
        (keys::VM_HOSTNAME, "webserver01"),
    ]);
    let mut inventory = InMemoryInventory::new();

    let outcome = run_provision(&ipam, test_config(), &mut options, &mut inventory).await;
    assert!(
        matches!(outcome, WorkflowOutcome::Aborted { .. }),
        "got {outcome:?}"
    );
    assert!(ipam.assignments().is_empty(), "no address may be reserved");
}

#[tokio::test]
async fn register_rebinds_the_reservation_to_the_real_mac_and_deploys() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    ipam.add_object(42);
    let mut config = test_config();
    config.deploy_servers = String::from("7, 8");
    ipam.fail_deploy(8);

    let mut options = seeded_options(&[
        (keys::VM_CONFIG_NETWORK, "10.0.0.0/24 lab.example"),
        (keys::VM_TARGET_NAME, "cf000001"),
        (keys::VM_FQDN, "cf000001.lab.example"),
        (keys::VM_IP_ADDR, "10.0.0.5"),
        (keys::IPAM_VM_ID, "42"),
    ]);
    let mut inventory = InMemoryInventory::new();
    inventory.add(VmRecord {
        name: String::from("cf000001"),
        mac_addresses: vec![String::from("AA:BB:CC:DD:EE:FF")],
        ip_addresses: Vec::new(),
    });

    let outcome = run_provision(&ipam, config, &mut options, &mut inventory).await;
    assert_eq!(outcome, WorkflowOutcome::Completed);

    assert_eq!(ipam.deleted(), vec![42], "placeholder reservation deleted");
    let assignments = ipam.assignments();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].address, "10.0.0.5");
    assert_eq!(assignments[0].mac, "AA-BB-CC-DD-EE-FF");
    assert_eq!(
        inventory.attribute("cf000001", IP_ATTRIBUTE).as_deref(),
        Some("10.0.0.5")
    );
    assert_eq!(ipam.deployed(), vec![7], "refused deploy is skipped");
}

#[tokio::test]
async fn register_tolerates_an_already_deleted_placeholder() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    // Reservation 42 is never registered with the fake, so the delete
    // comes back 404, as it would on a re-run after a partial failure.
    let mut options = seeded_options(&[
        (keys::VM_CONFIG_NETWORK, "10.0.0.0/24 lab.example"),
        (keys::VM_TARGET_NAME, "cf000001"),
        (keys::VM_FQDN, "cf000001.lab.example"),
        (keys::VM_IP_ADDR, "10.0.0.5"),
        (keys::IPAM_VM_ID, "42"),
    ]);
    let mut inventory = InMemoryInventory::new();
    inventory.add(VmRecord {
        name: String::from("cf000001"),
        mac_addresses: vec![String::from("AA:BB:CC:DD:EE:FF")],
        ip_addresses: Vec::new(),
    });

    let outcome = run_provision(&ipam, test_config(), &mut options, &mut inventory).await;
    assert_eq!(outcome, WorkflowOutcome::Completed);
    assert!(ipam.deleted().is_empty());
    let assignments = ipam.assignments();
    assert_eq!(assignments.len(), 1, "rebind must still happen");
    assert_eq!(assignments[0].address, "10.0.0.5");
    assert_eq!(
        inventory.attribute("cf000001", IP_ATTRIBUTE).as_deref(),
        Some("10.0.0.5")
    );
}

#[tokio::test]
async fn forced_register_aborts_without_phase_one_state() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    let mut options = seeded_options(&[
        (keys::VM_CONFIG_NETWORK, "10.0.0.0/24 lab.example"),
        (keys::VM_TARGET_NAME, "cf000001"),
    ]);
    let mut inventory = InMemoryInventory::new();

    let outcome = run_register(&ipam, test_config(), &mut options, &mut inventory).await;
    assert!(
        matches!(outcome, WorkflowOutcome::Aborted { .. }),
        "got {outcome:?}"
    );
}

#[tokio::test]
async fn login_failure_asks_the_host_to_retry() {
    let ipam = FakeIpam::new();
    ipam.fail_login();
    let mut options = seeded_options(&[(keys::VM_CONFIG_NETWORK, "10.0.0.0/24 lab.example")]);
    let mut inventory = InMemoryInventory::new();

    let outcome = run_provision(&ipam, test_config(), &mut options, &mut inventory).await;
    assert!(
        matches!(outcome, WorkflowOutcome::Retry { .. }),
        "got {outcome:?}"
    );
}

#[tokio::test]
async fn unregister_releases_address_device_and_mac_records() {
    let ipam = FakeIpam::new();
    let mac_id = ipam.add_mac_record("AA-BB-CC-DD-EE-FF");
    let address_id = ipam.add_address_record("10.0.0.5");
    let mut inventory = InMemoryInventory::new();
    inventory.add(VmRecord {
        name: String::from("cf000001"),
        mac_addresses: vec![String::from("AA:BB:CC:DD:EE:FF")],
        ip_addresses: vec![String::from("10.0.0.5")],
    });
    inventory.custom_set("cf000001", IP_ATTRIBUTE, "10.0.0.5");

    let outcome = run_unregister(&ipam, test_config(), &inventory, "cf000001").await;
    assert_eq!(outcome, WorkflowOutcome::Completed);
    assert_eq!(ipam.deleted(), vec![mac_id, address_id]);
    assert_eq!(ipam.deleted_devices(), vec![String::from("AA-BB-CC-DD-EE-FF")]);
}

#[tokio::test]
async fn unregister_completes_when_the_records_are_already_gone() {
    let ipam = FakeIpam::new();
    let mut inventory = InMemoryInventory::new();
    inventory.add(VmRecord {
        name: String::from("cf000001"),
        mac_addresses: vec![String::from("AA:BB:CC:DD:EE:FF")],
        ip_addresses: vec![String::from("10.0.0.5")],
    });

    let outcome = run_unregister(&ipam, test_config(), &inventory, "cf000001").await;
    assert_eq!(outcome, WorkflowOutcome::Completed);
    assert!(ipam.deleted().is_empty());
}

#[tokio::test]
async fn unregister_aborts_on_a_machine_missing_from_the_inventory() {
    let ipam = FakeIpam::new();
    let inventory = InMemoryInventory::new();

    let outcome = run_unregister(&ipam, test_config(), &inventory, "ghost").await;
    assert!(
        matches!(outcome, WorkflowOutcome::Aborted { .. }),
        "got {outcome:?}"
    );
}
