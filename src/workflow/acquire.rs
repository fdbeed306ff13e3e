//! Phase 1: reserve a host name and an address under a placeholder MAC.

use tracing::info;

use crate::bluecat::{HostnamePattern, IpamError, IpamSession, MacAddress};
use crate::rpc::RpcChannel;

use super::{AllocationContext, OptionStore, VmInventory, keys, require_option};

/// Reserves a host name and the next free address in the context subnet.
///
/// The reservation is bound to a random placeholder MAC; phase 2 replaces it
/// with the machine's real one once the hypervisor has assigned it. The
/// chosen name, FQDN, address, and reservation id are written back into the
/// workflow options for the later phases.
///
/// # Errors
///
/// Returns an error when the requested name collides with an existing IPAM
/// record, when the subnet has no free address, or when the IPAM exchange
/// itself fails.
pub async fn acquire<C: RpcChannel>(
    session: &mut IpamSession<C>,
    context: &AllocationContext,
    options: &mut dyn OptionStore,
    inventory: &mut dyn VmInventory,
) -> Result<(), IpamError> {
    let placeholder = MacAddress::random_placeholder();
    let requested = match options.get(keys::VM_HOSTNAME) {
        Some(name) => name,
        None => require_option(options, keys::VM_TARGET_NAME)?,
    };

    let pattern = HostnamePattern::new(&session.config().hostname_prefix)?;
    let inventory_names = inventory.names();
    let hostname = session
        .hostname_if_requested(&requested, &pattern, &inventory_names)
        .await?;

    options.set(keys::VM_TARGET_HOSTNAME, &hostname);
    options.set(keys::VM_TARGET_NAME, &hostname);
    options.set(keys::VM_HOSTNAME, &hostname);
    options.set(keys::VM_NAME, &hostname);
    let fqdn = context.fqdn_for(&hostname);
    options.set(keys::VM_FQDN, &fqdn);

    let network = session.find_network(&context.subnet).await?;
    let (address, reservation) = session
        .assign_next_free(&context.subnet, network, placeholder, &fqdn)
        .await?;

    options.set(keys::IPAM_VM_ID, &reservation.to_string());
    options.set(keys::VM_IP_ADDR, &address);
    info!(hostname, address, reservation = %reservation, "reserved address under placeholder MAC");
    Ok(())
}
