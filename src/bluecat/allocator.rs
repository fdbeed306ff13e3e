//! Address allocation, hostname checks, search, and deletion.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::props::PropertySet;
use crate::rpc::{Entity, RpcCall, RpcChannel};

use super::hostname::HostnamePattern;
use super::types::{MacAddress, NetworkHandle, ObjectId, ViewId};
use super::{
    CONFLICT_SEARCH_COUNT, CONTACT_PROPERTY, HOSTNAME_SEARCH_COUNT, IpamError, IpamSession,
    MAKE_DHCP_RESERVED, SEARCH_ALL_COUNT,
};

/// Explicit result of an object search: no exceptions for "nothing found".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchOutcome {
    /// The first matching object's id.
    Found(ObjectId),
    /// The search returned no matching object.
    Empty,
}

impl<C: RpcChannel> IpamSession<C> {
    /// Resolves a `a.b.c.d/nn` subnet to its network object and the view it
    /// registers host records under.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::Parse`] for a malformed CIDR string and
    /// [`IpamError::NotFound`] when the network or its `defaultView` property
    /// is absent.
    pub async fn find_network(&mut self, subnet: &str) -> Result<NetworkHandle, IpamError> {
        let (base, _bits) = subnet
            .split_once('/')
            .ok_or_else(|| malformed_subnet(subnet))?;
        base.parse::<Ipv4Addr>()
            .map_err(|_| malformed_subnet(subnet))?;

        let container_id = self.configuration_id().await?.value();
        let entity = self
            .entity(
                &RpcCall::GetIpRangedByIp {
                    container_id,
                    range_type: String::from("IP4Network"),
                    address: base.to_owned(),
                },
                "network entity",
            )
            .await?;
        if !entity.exists() {
            return Err(IpamError::NotFound {
                what: format!("network for subnet {subnet}"),
            });
        }

        let view = decoded_properties(&entity, "network")
            .get("defaultView")
            .and_then(|value| value.parse::<i64>().ok())
            .map(ViewId::new)
            .ok_or_else(|| IpamError::NotFound {
                what: format!("defaultView property of network {subnet}"),
            })?;

        let handle = NetworkHandle {
            id: ObjectId::new(entity.id),
            default_view: view,
        };
        debug!(network = %handle.id, view = %handle.default_view, subnet, "resolved network");
        Ok(handle)
    }

    /// Resolves the hostname to use for a provisioning run.
    ///
    /// A requested name starting with `auto` asks for the next name in the
    /// generated sequence. Any other name must have no match in the IPAM
    /// inventory. Both checks are point-in-time only; nothing is locked
    /// between the check and the reservation.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::NameConflict`] when the requested name is already
    /// visible in the IPAM.
    pub async fn hostname_if_requested(
        &self,
        requested: &str,
        pattern: &HostnamePattern,
        inventory_names: &[String],
    ) -> Result<String, IpamError> {
        if requested.starts_with("auto") {
            return self.generate_hostname(pattern, inventory_names).await;
        }

        let matches = self
            .search_entities(
                &format!("^{requested}.*"),
                "ALL",
                CONFLICT_SEARCH_COUNT,
            )
            .await?;
        if matches.is_empty() {
            Ok(requested.to_owned())
        } else {
            Err(IpamError::NameConflict {
                hostname: requested.to_owned(),
            })
        }
    }

    /// Derives the next hostname in the sequence from everything visible in
    /// the IPAM plus the supplied inventory names.
    ///
    /// # Errors
    ///
    /// Returns the usual session and transport failures from the IPAM search.
    pub async fn generate_hostname(
        &self,
        pattern: &HostnamePattern,
        inventory_names: &[String],
    ) -> Result<String, IpamError> {
        let entities = self
            .search_entities(&pattern.search_keyword(), "ALL", HOSTNAME_SEARCH_COUNT)
            .await?;
        let ipam_names = entities
            .iter()
            .filter_map(|entity| entity.name.as_deref());
        let next = pattern.next_in_sequence(
            ipam_names,
            inventory_names.iter().map(String::as_str),
        );
        info!(hostname = %next, "generated next hostname in sequence");
        Ok(next)
    }

    /// Reserves the next unused address in a network, DHCP-bound to a MAC.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::AllocationExhausted`] when the IPAM reports no
    /// free address.
    pub async fn assign_next_free(
        &mut self,
        subnet: &str,
        network: NetworkHandle,
        mac: MacAddress,
        host_fqdn: &str,
    ) -> Result<(String, ObjectId), IpamError> {
        let configuration_id = self.configuration_id().await?.value();
        let entity = self
            .entity(
                &RpcCall::AssignNextAvailableIp4Address {
                    configuration_id,
                    parent_id: network.id.value(),
                    mac_address: mac.to_string(),
                    host_info: host_info(host_fqdn, network.default_view),
                    action: String::from(MAKE_DHCP_RESERVED),
                    properties: String::from(CONTACT_PROPERTY),
                },
                "address assignment",
            )
            .await?;
        if !entity.exists() {
            return Err(IpamError::AllocationExhausted {
                network: subnet.to_owned(),
            });
        }

        let address = decoded_properties(&entity, "address assignment")
            .get("address")
            .map(str::to_owned)
            .ok_or_else(|| IpamError::AllocationExhausted {
                network: subnet.to_owned(),
            })?;
        let id = ObjectId::new(entity.id);
        info!(%address, reservation = %id, %mac, fqdn = host_fqdn, "reserved next free address");
        Ok((address, id))
    }

    /// Assigns one specific address, DHCP-bound to a MAC.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::Parse`] when the reply carries no object id.
    pub async fn assign_address(
        &mut self,
        address: &str,
        network: NetworkHandle,
        mac: MacAddress,
        host_fqdn: &str,
    ) -> Result<ObjectId, IpamError> {
        let configuration_id = self.configuration_id().await?.value();
        let entity = self
            .entity(
                &RpcCall::AssignIp4Address {
                    configuration_id,
                    ip4_address: address.to_owned(),
                    mac_address: mac.to_string(),
                    host_info: host_info(host_fqdn, network.default_view),
                    action: String::from(MAKE_DHCP_RESERVED),
                    properties: String::from(CONTACT_PROPERTY),
                },
                "address assignment",
            )
            .await?;
        if !entity.exists() {
            return Err(IpamError::Parse {
                what: String::from("assign_ip4_address reply"),
                message: String::from("reply carried no object id"),
            });
        }
        let id = ObjectId::new(entity.id);
        info!(%address, reservation = %id, %mac, fqdn = host_fqdn, "assigned explicit address");
        Ok(id)
    }

    /// Looks up the object registered for a MAC address, if any.
    ///
    /// # Errors
    ///
    /// Returns the usual session and transport failures.
    pub async fn mac_address_id(
        &mut self,
        mac: MacAddress,
    ) -> Result<Option<ObjectId>, IpamError> {
        let configuration_id = self.configuration_id().await?.value();
        let entity = self
            .entity(
                &RpcCall::GetMacAddress {
                    configuration_id,
                    mac_address: mac.to_string(),
                },
                "MAC address entity",
            )
            .await?;
        Ok(entity.exists().then(|| ObjectId::new(entity.id)))
    }

    /// Deletes an object by id.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::Transport`] when the IPAM rejects the deletion,
    /// including for an already-absent id.
    pub async fn delete(&self, id: ObjectId) -> Result<(), IpamError> {
        self.checked(&RpcCall::Delete {
            object_id: id.value(),
        })
        .await?;
        info!(object = %id, "deleted IPAM object");
        Ok(())
    }

    /// Best-effort deletion for cleanup paths: logs and reports failure
    /// instead of raising, so retirement cannot be wedged by a record that is
    /// already gone.
    pub async fn release(&self, id: ObjectId) -> bool {
        match self.delete(id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(object = %id, error = %err, "release failed; continuing");
                false
            }
        }
    }

    /// Best-effort deletion of a device instance by MAC identifier.
    pub async fn release_device(&self, mac: MacAddress) -> bool {
        let call = RpcCall::DeleteDeviceInstance {
            config_name: self.configuration_name().to_owned(),
            identifier: mac.to_string(),
        };
        match self.checked(&call).await {
            Ok(_) => {
                info!(%mac, "deleted device instance");
                true
            }
            Err(err) => {
                warn!(%mac, error = %err, "device instance release failed; continuing");
                false
            }
        }
    }

    /// Searches for an object by keyword within a category.
    ///
    /// # Errors
    ///
    /// Returns the usual session and transport failures; an empty result is
    /// [`SearchOutcome::Empty`], not an error.
    pub async fn search_id(
        &self,
        keyword: &str,
        category: &str,
    ) -> Result<SearchOutcome, IpamError> {
        let entities = self
            .search_entities(keyword, category, SEARCH_ALL_COUNT)
            .await?;
        Ok(entities
            .iter()
            .find(|entity| entity.exists())
            .map_or(SearchOutcome::Empty, |entity| {
                SearchOutcome::Found(ObjectId::new(entity.id))
            }))
    }

    /// Repeats [`search_id`](Self::search_id) while the result is empty.
    ///
    /// The IPAM occasionally answers a fresh record's search with an empty
    /// result; the loop pauses between attempts and gives up after `attempts`
    /// tries, returning [`SearchOutcome::Empty`] for the caller to judge.
    ///
    /// # Errors
    ///
    /// Returns the usual session and transport failures from the search.
    pub async fn search_id_until_found(
        &self,
        keyword: &str,
        category: &str,
        attempts: u32,
        pause: Duration,
    ) -> Result<SearchOutcome, IpamError> {
        for attempt in 1..=attempts {
            match self.search_id(keyword, category).await? {
                SearchOutcome::Found(id) => return Ok(SearchOutcome::Found(id)),
                SearchOutcome::Empty if attempt < attempts => {
                    debug!(keyword, attempt, "search came back empty; pausing before retry");
                    sleep(pause).await;
                }
                SearchOutcome::Empty => {}
            }
        }
        warn!(keyword, attempts, "search still empty after all attempts");
        Ok(SearchOutcome::Empty)
    }

    /// Runs a search and validates the reply into entities.
    ///
    /// Accepts both a bare JSON array and the `{"item": [...]}` wrapper the
    /// service uses for list results.
    async fn search_entities(
        &self,
        keyword: &str,
        category: &str,
        count: i64,
    ) -> Result<Vec<Entity>, IpamError> {
        let body = self
            .checked(&RpcCall::SearchByCategory {
                keyword: keyword.to_owned(),
                category: category.to_owned(),
                start: 0,
                count,
            })
            .await?;
        let items = match body {
            Value::Array(_) => body,
            Value::Object(ref map) => map.get("item").cloned().unwrap_or(Value::Array(vec![])),
            Value::Null => Value::Array(vec![]),
            _ => {
                return Err(IpamError::Parse {
                    what: String::from("search result"),
                    message: String::from("expected an array of entities"),
                });
            }
        };
        serde_json::from_value(items).map_err(|err| IpamError::Parse {
            what: String::from("search result"),
            message: err.to_string(),
        })
    }
}

fn host_info(fqdn: &str, view: ViewId) -> String {
    format!("{fqdn},{view},true,false")
}

fn decoded_properties(entity: &Entity, what: &str) -> PropertySet {
    let decoded = PropertySet::decode(entity.properties.as_deref().unwrap_or(""));
    if !decoded.is_clean() {
        warn!(what, skipped = ?decoded.skipped, "ignoring malformed property segments");
    }
    decoded.set
}

fn malformed_subnet(subnet: &str) -> IpamError {
    IpamError::Parse {
        what: String::from("subnet"),
        message: format!("{subnet:?} is not an a.b.c.d/nn CIDR"),
    }
}
