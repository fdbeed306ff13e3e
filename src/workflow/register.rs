//! Phase 2: rebind the reservation to the machine's real MAC and deploy.

use tokio::time::sleep;
use tracing::{info, warn};

use crate::bluecat::{IpamError, IpamSession, MacAddress, ObjectId};
use crate::rpc::RpcChannel;

use super::{AllocationContext, IP_ATTRIBUTE, OptionStore, VmInventory, keys, require_option};

/// Replaces the phase-1 placeholder reservation with one bound to the
/// machine's real MAC, then triggers DNS/DHCP deploys.
///
/// The placeholder reservation is deleted first; a failed delete aborts the
/// step so the subnet never ends up with two records for the same host. A
/// reservation the IPAM no longer knows is the one exception: a re-run after
/// a partial failure must not wedge on a delete that already happened. The
/// same address is then re-assigned under the real MAC, recorded on the VM's
/// inventory record, and pushed to every configured deploy server. Deploy
/// refusals are logged and skipped so one unreachable server cannot wedge
/// the machine.
///
/// # Errors
///
/// Returns an error when workflow state from phase 1 is missing or
/// malformed, when the machine or its MAC cannot be found in the inventory,
/// or when the IPAM exchange itself fails.
pub async fn register<C: RpcChannel>(
    session: &mut IpamSession<C>,
    context: &AllocationContext,
    options: &mut dyn OptionStore,
    inventory: &mut dyn VmInventory,
) -> Result<(), IpamError> {
    let fqdn = require_option(options, keys::VM_FQDN)?;
    let address = require_option(options, keys::VM_IP_ADDR)?;
    let raw_reservation = require_option(options, keys::IPAM_VM_ID)?;
    let reservation = raw_reservation
        .parse::<i64>()
        .map(ObjectId::new)
        .map_err(|_| IpamError::Parse {
            what: String::from(keys::IPAM_VM_ID),
            message: format!("{raw_reservation:?} is not an object id"),
        })?;

    let vm_name = require_option(options, keys::VM_TARGET_NAME)?;
    let record = inventory
        .find(&vm_name)
        .ok_or_else(|| IpamError::NotFound {
            what: format!("VM {vm_name} in the inventory"),
        })?;
    let raw_mac = record
        .mac_addresses
        .first()
        .ok_or_else(|| IpamError::NotFound {
            what: format!("MAC address of VM {vm_name}"),
        })?;
    let mac = raw_mac
        .parse::<MacAddress>()
        .map_err(|err| IpamError::Parse {
            what: format!("MAC address of VM {vm_name}"),
            message: err.to_string(),
        })?;

    match session.delete(reservation).await {
        Ok(()) => {}
        Err(IpamError::Transport { status: 404, .. }) => {
            warn!(reservation = %reservation, "placeholder reservation already gone; continuing");
        }
        Err(err) => return Err(err),
    }
    let network = session.find_network(&context.subnet).await?;
    let assignment = session
        .assign_address(&address, network, mac, &fqdn)
        .await?;
    info!(%mac, address, assignment = %assignment, "rebound reservation to the real MAC");

    inventory.custom_set(&vm_name, IP_ATTRIBUTE, &address);

    let servers = session.config().deploy_server_ids()?;
    let settle = session.config().deploy_wait();
    for server in servers.into_iter().map(ObjectId::new) {
        if session.trigger_deploy(server).await? {
            info!(server = %server, "deploy triggered");
        }
        sleep(settle).await;
    }
    Ok(())
}
