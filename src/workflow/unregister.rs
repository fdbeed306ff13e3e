//! Retirement: best-effort removal of a machine's IPAM records.

use tracing::{info, warn};

use crate::bluecat::{IpamError, IpamSession, MacAddress, SearchOutcome};
use crate::rpc::RpcChannel;

use super::{IP_ATTRIBUTE, VmInventory};

/// Removes the address and device records IPAM holds for one machine.
///
/// The address to release comes from the `bluecat_ipaddress` custom
/// attribute when present, falling back to the inventory's first reported
/// address. Lookups that find nothing and deletes that fail are logged and
/// skipped; retirement must not wedge on records someone already cleaned up
/// by hand.
///
/// # Errors
///
/// Returns an error when the machine is missing from the inventory, when no
/// address for it can be determined at all, or when the IPAM exchange
/// itself fails.
pub async fn unregister<C: RpcChannel>(
    session: &mut IpamSession<C>,
    inventory: &dyn VmInventory,
    vm_name: &str,
) -> Result<(), IpamError> {
    let record = inventory
        .find(vm_name)
        .ok_or_else(|| IpamError::NotFound {
            what: format!("VM {vm_name} in the inventory"),
        })?;
    let address = match inventory.custom_get(vm_name, IP_ATTRIBUTE) {
        Some(address) => address,
        None => record
            .ip_addresses
            .first()
            .cloned()
            .ok_or_else(|| IpamError::NotFound {
                what: format!("IP address of VM {vm_name}"),
            })?,
    };

    let mac = match record.mac_addresses.first() {
        Some(raw) => match raw.parse::<MacAddress>() {
            Ok(mac) => Some(mac),
            Err(err) => {
                warn!(vm = vm_name, error = %err, "unparseable MAC; skipping device cleanup");
                None
            }
        },
        None => None,
    };

    if let Some(mac) = mac {
        match session.mac_address_id(mac).await? {
            Some(id) => {
                session.release(id).await;
            }
            None => info!(%mac, "no MAC record in IPAM; nothing to release"),
        }
        session.release_device(mac).await;
    }

    let config = session.config();
    let (attempts, pause) = (config.search_attempts, config.search_pause());
    match session
        .search_id_until_found(&address, "IP4Address", attempts, pause)
        .await?
    {
        SearchOutcome::Found(id) => {
            session.release(id).await;
        }
        SearchOutcome::Empty => {
            info!(address, "no address record in IPAM; nothing to release");
        }
    }
    info!(vm = vm_name, address, "retirement cleanup finished");
    Ok(())
}
