//! Session and allocator behaviour against the in-memory IPAM fake.

use super::*;
use crate::test_support::{FakeIpam, test_config};

async fn open_session(ipam: &FakeIpam) -> IpamSession<&FakeIpam> {
    IpamSession::open(ipam, test_config())
        .await
        .expect("login against the fake should succeed")
}

#[tokio::test]
async fn open_performs_login_and_resolves_the_configuration_scope() {
    let ipam = FakeIpam::new();
    let mut session = open_session(&ipam).await;
    let id = session
        .configuration_id()
        .await
        .expect("configuration lookup");
    assert_eq!(id.value(), 1);
}

#[tokio::test]
async fn login_failure_is_reported_as_an_auth_error() {
    let ipam = FakeIpam::new();
    ipam.fail_login();
    let err = IpamSession::open(&ipam, test_config())
        .await
        .err()
        .expect("login should fail");
    assert!(matches!(err, IpamError::Auth { .. }), "got {err:?}");
}

#[tokio::test]
async fn closed_session_rejects_every_operation() {
    let ipam = FakeIpam::new();
    let mut session = open_session(&ipam).await;
    session.close().await;
    let err = session
        .find_network("10.0.0.0/24")
        .await
        .err()
        .expect("operation on a closed session should fail");
    assert!(matches!(err, IpamError::SessionClosed { .. }), "got {err:?}");
}

#[tokio::test]
async fn close_is_idempotent() {
    let ipam = FakeIpam::new();
    let mut session = open_session(&ipam).await;
    session.close().await;
    session.close().await;
}

#[tokio::test]
async fn find_network_reads_the_default_view_property() {
    let ipam = FakeIpam::new();
    let network_id = ipam.add_network("10.0.0.0", 77);
    let mut session = open_session(&ipam).await;

    let handle = session
        .find_network("10.0.0.0/24")
        .await
        .expect("network lookup");
    assert_eq!(handle.id.value(), network_id);
    assert_eq!(handle.default_view.value(), 77);
}

#[tokio::test]
async fn find_network_rejects_a_malformed_subnet() {
    let ipam = FakeIpam::new();
    let mut session = open_session(&ipam).await;
    let err = session
        .find_network("not-a-subnet")
        .await
        .err()
        .expect("malformed subnet should fail");
    assert!(matches!(err, IpamError::Parse { .. }), "got {err:?}");
}

#[tokio::test]
async fn find_network_reports_an_unknown_subnet_as_not_found() {
    let ipam = FakeIpam::new();
    let mut session = open_session(&ipam).await;
    let err = session
        .find_network("192.168.9.0/24")
        .await
        .err()
        .expect("unknown subnet should fail");
    assert!(matches!(err, IpamError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn assign_next_free_binds_the_mac_and_reports_the_address() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    ipam.add_free_address("10.0.0.5");
    let mut session = open_session(&ipam).await;

    let network = session
        .find_network("10.0.0.0/24")
        .await
        .expect("network lookup");
    let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().expect("mac");
    let (address, id) = session
        .assign_next_free("10.0.0.0/24", network, mac, "cf000001.lab.example")
        .await
        .expect("assignment");

    assert_eq!(address, "10.0.0.5");
    assert_ne!(id.value(), 0);
    let recorded = ipam.assignments();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].mac, "AA-BB-CC-DD-EE-FF");
    assert_eq!(recorded[0].host_info, "cf000001.lab.example,5,true,false");
    assert_eq!(recorded[0].action, "MAKE_DHCP_RESERVED");
}

#[tokio::test]
async fn an_empty_subnet_reports_allocation_exhausted() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    let mut session = open_session(&ipam).await;

    let network = session
        .find_network("10.0.0.0/24")
        .await
        .expect("network lookup");
    let mac = MacAddress::random_placeholder();
    let err = session
        .assign_next_free("10.0.0.0/24", network, mac, "cf000001.lab.example")
        .await
        .err()
        .expect("exhausted subnet should fail");
    assert!(
        matches!(err, IpamError::AllocationExhausted { .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn assign_address_rebinds_one_specific_address() {
    let ipam = FakeIpam::new();
    ipam.add_network("10.0.0.0", 5);
    let mut session = open_session(&ipam).await;

    let network = session
        .find_network("10.0.0.0/24")
        .await
        .expect("network lookup");
    let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().expect("mac");
    let id = session
        .assign_address("10.0.0.5", network, mac, "cf000001.lab.example")
        .await
        .expect("assignment");
    assert_ne!(id.value(), 0);
    assert_eq!(ipam.assignments()[0].address, "10.0.0.5");
}

#[tokio::test]
async fn requested_hostname_passes_when_no_record_matches() {
    let ipam = FakeIpam::new();
    let session = open_session(&ipam).await;
    let pattern = HostnamePattern::new("cf").expect("pattern");
    let name = session
        .hostname_if_requested("webserver01", &pattern, &[])
        .await
        .expect("free name should pass");
    assert_eq!(name, "webserver01");
}

#[tokio::test]
async fn requested_hostname_collides_with_an_existing_record() {
    let ipam = FakeIpam::new();
    ipam.add_registered_name("webserver01");
    let session = open_session(&ipam).await;
    let pattern = HostnamePattern::new("cf").expect("pattern");
    let err = session
        .hostname_if_requested("webserver01", &pattern, &[])
        .await
        .err()
        .expect("conflicting name should fail");
    assert!(matches!(err, IpamError::NameConflict { .. }), "got {err:?}");
}

#[tokio::test]
async fn auto_request_generates_the_next_name_in_sequence() {
    let ipam = FakeIpam::new();
    ipam.add_registered_name("cf000007");
    let session = open_session(&ipam).await;
    let pattern = HostnamePattern::new("cf").expect("pattern");
    let name = session
        .hostname_if_requested("auto", &pattern, &[String::from("cf000009")])
        .await
        .expect("generated name");
    assert_eq!(name, "cf000010");
}

#[tokio::test]
async fn mac_lookup_distinguishes_present_and_absent_records() {
    let ipam = FakeIpam::new();
    let mac_id = ipam.add_mac_record("AA-BB-CC-DD-EE-FF");
    let mut session = open_session(&ipam).await;

    let known: MacAddress = "AA:BB:CC:DD:EE:FF".parse().expect("mac");
    let found = session.mac_address_id(known).await.expect("lookup");
    assert_eq!(found.map(|id| id.value()), Some(mac_id));

    let unknown: MacAddress = "00:11:22:33:44:55".parse().expect("mac");
    let missing = session.mac_address_id(unknown).await.expect("lookup");
    assert_eq!(missing, None);
}

#[tokio::test]
async fn strict_delete_fails_on_an_unknown_object() {
    let ipam = FakeIpam::new();
    let session = open_session(&ipam).await;
    let err = session
        .delete(ObjectId::new(9999))
        .await
        .err()
        .expect("unknown object should fail");
    assert!(matches!(err, IpamError::Transport { status: 404, .. }), "got {err:?}");
}

#[tokio::test]
async fn release_swallows_delete_failures() {
    let ipam = FakeIpam::new();
    ipam.add_object(42);
    let session = open_session(&ipam).await;

    assert!(session.release(ObjectId::new(42)).await);
    assert!(!session.release(ObjectId::new(42)).await);
    assert_eq!(ipam.deleted(), vec![42]);
}

#[tokio::test]
async fn bounded_search_retries_through_empty_results() {
    let ipam = FakeIpam::new();
    let record_id = ipam.add_address_record("10.0.0.5");
    ipam.delay_address_search(2);
    let session = open_session(&ipam).await;

    let outcome = session
        .search_id_until_found("10.0.0.5", "IP4Address", 3, std::time::Duration::ZERO)
        .await
        .expect("search");
    assert_eq!(outcome, SearchOutcome::Found(ObjectId::new(record_id)));
}

#[tokio::test]
async fn bounded_search_gives_up_after_the_attempt_cap() {
    let ipam = FakeIpam::new();
    ipam.add_address_record("10.0.0.5");
    ipam.delay_address_search(5);
    let session = open_session(&ipam).await;

    let outcome = session
        .search_id_until_found("10.0.0.5", "IP4Address", 2, std::time::Duration::ZERO)
        .await
        .expect("search");
    assert_eq!(outcome, SearchOutcome::Empty);
}

#[tokio::test]
async fn deploy_reports_refusals_without_failing() {
    let ipam = FakeIpam::new();
    ipam.fail_deploy(8);
    let session = open_session(&ipam).await;

    assert!(session.trigger_deploy(ObjectId::new(7)).await.expect("deploy"));
    assert!(!session.trigger_deploy(ObjectId::new(8)).await.expect("deploy"));
    assert_eq!(ipam.deployed(), vec![7]);
}
