//! Test support utilities shared across unit and integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde_json::{Value, json};

use crate::config::IpamConfig;
use crate::rpc::{RpcCall, RpcChannel, RpcFuture, RpcReply};
use crate::workflow::{OptionStore, VmInventory, VmRecord};

/// Session token issued by [`FakeIpam`] on a successful login.
pub const FAKE_TOKEN: &str = "fake-token";

/// Builds a configuration pointing at nothing, suitable for driving the
/// fakes. Field values are deterministic and the pauses are zero so tests
/// never sleep.
#[must_use]
pub fn test_config() -> IpamConfig {
    IpamConfig {
        protocol: String::from("https"),
        hostname: String::from("ipam.test.example"),
        port: 443,
        username: String::from("svc-provision"),
        password: String::from("secret"),
        open_timeout_secs: 1,
        read_timeout_secs: 1,
        accept_invalid_certs: false,
        configuration_name: String::from("default"),
        deploy_servers: String::new(),
        deploy_wait_secs: 0,
        hostname_prefix: String::from("cf"),
        search_attempts: 3,
        search_pause_secs: 0,
        retry_interval_secs: 0,
    }
}

/// One address assignment recorded by [`FakeIpam`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeAssignment {
    /// Object id handed out for the assignment.
    pub id: i64,
    /// Address that was bound.
    pub address: String,
    /// MAC address the binding names.
    pub mac: String,
    /// `hostInfo` tuple as received on the wire.
    pub host_info: String,
    /// Assignment action as received on the wire.
    pub action: String,
}

#[derive(Debug, Default)]
struct FakeState {
    fail_login: bool,
    configuration: Option<(String, i64)>,
    networks: Vec<(String, i64, i64)>,
    free_addresses: VecDeque<String>,
    registered_names: Vec<String>,
    mac_ids: HashMap<String, i64>,
    address_ids: HashMap<String, i64>,
    objects: HashSet<i64>,
    empty_searches_before_hit: u32,
    fail_deploys: HashSet<i64>,
    assignments: Vec<FakeAssignment>,
    deleted: Vec<i64>,
    deleted_devices: Vec<String>,
    deployed: Vec<i64>,
    next_id: i64,
}

/// Behavioural in-memory IPAM driven through [`RpcChannel`].
///
/// The fake enforces the session token on every call after login and models
/// just enough of the entity semantics (zero ids for absences, property
/// blobs, the `{"item": [...]}` search wrapper) for the session and workflow
/// layers to be exercised end to end.
#[derive(Debug, Default)]
pub struct FakeIpam {
    state: Mutex<FakeState>,
}

impl FakeIpam {
    /// Creates a fake with a `default` configuration scope already present.
    #[must_use]
    pub fn new() -> Self {
        let fake = Self::default();
        fake.with_state(|state| {
            state.configuration = Some((String::from("default"), 1));
            state.next_id = 100;
        });
        fake
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    /// Makes every login attempt fail with a server error.
    pub fn fail_login(&self) {
        self.with_state(|state| state.fail_login = true);
    }

    /// Registers a network for a subnet base address with a default view id.
    pub fn add_network(&self, base: &str, view: i64) -> i64 {
        self.with_state(|state| {
            let id = state.next_id;
            state.next_id += 1;
            state.networks.push((base.to_owned(), id, view));
            state.objects.insert(id);
            id
        })
    }

    /// Queues an address the fake hands out for next-available assignment.
    pub fn add_free_address(&self, address: &str) {
        self.with_state(|state| state.free_addresses.push_back(address.to_owned()));
    }

    /// Registers a name visible to keyword searches, as an existing record.
    pub fn add_registered_name(&self, name: &str) {
        self.with_state(|state| {
            let id = state.next_id;
            state.next_id += 1;
            state.registered_names.push(name.to_owned());
            state.objects.insert(id);
        });
    }

    /// Registers a MAC address record and returns its object id.
    pub fn add_mac_record(&self, mac: &str) -> i64 {
        self.with_state(|state| {
            let id = state.next_id;
            state.next_id += 1;
            state.mac_ids.insert(mac.to_owned(), id);
            state.objects.insert(id);
            id
        })
    }

    /// Registers an address record findable by search and returns its id.
    pub fn add_address_record(&self, address: &str) -> i64 {
        self.with_state(|state| {
            let id = state.next_id;
            state.next_id += 1;
            state.address_ids.insert(address.to_owned(), id);
            state.objects.insert(id);
            id
        })
    }

    /// Registers a bare object id so deletes against it succeed.
    pub fn add_object(&self, id: i64) {
        self.with_state(|state| {
            state.objects.insert(id);
        });
    }

    /// Makes the first `count` address searches come back empty.
    pub fn delay_address_search(&self, count: u32) {
        self.with_state(|state| state.empty_searches_before_hit = count);
    }

    /// Makes deploys against a server id fail with a server error.
    pub fn fail_deploy(&self, server: i64) {
        self.with_state(|state| {
            state.fail_deploys.insert(server);
        });
    }

    /// Assignments recorded so far, in call order.
    #[must_use]
    pub fn assignments(&self) -> Vec<FakeAssignment> {
        self.with_state(|state| state.assignments.clone())
    }

    /// Object ids deleted so far, in call order.
    #[must_use]
    pub fn deleted(&self) -> Vec<i64> {
        self.with_state(|state| state.deleted.clone())
    }

    /// Device identifiers deleted so far, in call order.
    #[must_use]
    pub fn deleted_devices(&self) -> Vec<String> {
        self.with_state(|state| state.deleted_devices.clone())
    }

    /// Server ids deployed so far, in call order.
    #[must_use]
    pub fn deployed(&self) -> Vec<i64> {
        self.with_state(|state| state.deployed.clone())
    }

    fn dispatch(&self, call: &RpcCall, token: Option<&str>) -> RpcReply {
        if let RpcCall::Login { .. } = call {
            return self.with_state(|state| {
                if state.fail_login {
                    RpcReply::status_only(500)
                } else {
                    RpcReply::ok(json!({ "token": FAKE_TOKEN }))
                }
            });
        }
        if token != Some(FAKE_TOKEN) {
            return RpcReply::status_only(401);
        }
        self.with_state(|state| Self::handle(state, call))
    }

    fn handle(state: &mut FakeState, call: &RpcCall) -> RpcReply {
        match call {
            RpcCall::Login { .. } => RpcReply::status_only(500),
            RpcCall::Logout => RpcReply::status_only(200),
            RpcCall::GetEntityByName { name, .. } => match &state.configuration {
                Some((config_name, id)) if config_name == name => RpcReply::ok(json!({
                    "id": id,
                    "name": config_name,
                })),
                _ => RpcReply::ok(json!({ "id": 0 })),
            },
            RpcCall::GetIpRangedByIp { address, .. } => state
                .networks
                .iter()
                .find(|(base, _, _)| base == address)
                .map_or_else(
                    || RpcReply::ok(json!({ "id": 0 })),
                    |(base, id, view)| {
                        RpcReply::ok(json!({
                            "id": id,
                            "name": base,
                            "properties": format!("defaultView={view}|"),
                        }))
                    },
                ),
            RpcCall::AssignNextAvailableIp4Address {
                mac_address,
                host_info,
                action,
                ..
            } => match state.free_addresses.pop_front() {
                None => RpcReply::ok(json!({ "id": 0 })),
                Some(address) => {
                    let id = Self::record_assignment(state, &address, mac_address, host_info, action);
                    RpcReply::ok(json!({
                        "id": id,
                        "properties": format!("address={address}|state=DHCP_RESERVED|"),
                    }))
                }
            },
            RpcCall::AssignIp4Address {
                ip4_address,
                mac_address,
                host_info,
                action,
                ..
            } => {
                let id = Self::record_assignment(state, ip4_address, mac_address, host_info, action);
                RpcReply::ok(json!({ "id": id }))
            }
            RpcCall::GetMacAddress { mac_address, .. } => {
                let id = state.mac_ids.get(mac_address).copied().unwrap_or(0);
                RpcReply::ok(json!({ "id": id }))
            }
            RpcCall::Delete { object_id } => {
                if state.objects.remove(object_id) {
                    state.deleted.push(*object_id);
                    RpcReply::status_only(200)
                } else {
                    RpcReply::status_only(404)
                }
            }
            RpcCall::DeleteDeviceInstance { identifier, .. } => {
                state.deleted_devices.push(identifier.clone());
                RpcReply::status_only(200)
            }
            RpcCall::SearchByCategory {
                keyword, category, ..
            } => Self::search(state, keyword, category),
            RpcCall::DeployServer { server_id } => {
                if state.fail_deploys.contains(server_id) {
                    RpcReply::status_only(500)
                } else {
                    state.deployed.push(*server_id);
                    RpcReply::status_only(200)
                }
            }
        }
    }

    fn record_assignment(
        state: &mut FakeState,
        address: &str,
        mac: &str,
        host_info: &str,
        action: &str,
    ) -> i64 {
        let id = state.next_id;
        state.next_id += 1;
        state.objects.insert(id);
        state.address_ids.insert(address.to_owned(), id);
        state.assignments.push(FakeAssignment {
            id,
            address: address.to_owned(),
            mac: mac.to_owned(),
            host_info: host_info.to_owned(),
            action: action.to_owned(),
        });
        id
    }

    fn search(state: &mut FakeState, keyword: &str, category: &str) -> RpcReply {
        let needle = keyword
            .trim_start_matches('^')
            .trim_end_matches(".*")
            .trim_end_matches('*');
        if category == "IP4Address" {
            if state.empty_searches_before_hit > 0 {
                state.empty_searches_before_hit -= 1;
                return RpcReply::ok(json!([]));
            }
            return state.address_ids.get(needle).copied().map_or_else(
                || RpcReply::ok(json!([])),
                |id| RpcReply::ok(json!({ "item": [{ "id": id, "name": needle }] })),
            );
        }

        let hits: Vec<Value> = state
            .registered_names
            .iter()
            .filter(|name| name.starts_with(needle))
            .enumerate()
            .map(|(index, name)| {
                let offset = i64::try_from(index).unwrap_or(i64::MAX);
                json!({ "id": 10_000 + offset, "name": name })
            })
            .collect();
        RpcReply::ok(Value::Array(hits))
    }
}

impl RpcChannel for FakeIpam {
    fn call<'a>(&'a self, call: &'a RpcCall, token: Option<&'a str>) -> RpcFuture<'a, RpcReply> {
        let reply = self.dispatch(call, token);
        Box::pin(async move { Ok(reply) })
    }
}

/// In-memory option bag for workflow tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOptions {
    values: HashMap<String, String>,
}

impl InMemoryOptions {
    /// Creates an empty option bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bag pre-seeded from key/value pairs.
    #[must_use]
    pub fn seeded<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = pairs
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();
        Self { values }
    }
}

impl OptionStore for InMemoryOptions {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }
}

/// In-memory VM inventory for workflow tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventory {
    records: Vec<VmRecord>,
    attributes: HashMap<(String, String), String>,
}

impl InMemoryInventory {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a machine record.
    pub fn add(&mut self, record: VmRecord) {
        self.records.push(record);
    }

    /// Reads back a custom attribute set through the trait.
    #[must_use]
    pub fn attribute(&self, vm: &str, key: &str) -> Option<String> {
        self.attributes
            .get(&(vm.to_owned(), key.to_owned()))
            .cloned()
    }
}

impl VmInventory for InMemoryInventory {
    fn names(&self) -> Vec<String> {
        self.records.iter().map(|record| record.name.clone()).collect()
    }

    fn find(&self, name: &str) -> Option<VmRecord> {
        self.records.iter().find(|record| record.name == name).cloned()
    }

    fn custom_get(&self, vm: &str, key: &str) -> Option<String> {
        self.attribute(vm, key)
    }

    fn custom_set(&mut self, vm: &str, key: &str, value: &str) {
        self.attributes
            .insert((vm.to_owned(), key.to_owned()), value.to_owned());
    }
}
