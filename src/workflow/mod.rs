//! Provisioning workflow steps and their seams to the orchestration host.
//!
//! The host owns a key/value option bag per provisioning run and a VM
//! inventory; both stay external behind traits. Every step reports a
//! [`WorkflowOutcome`] that the host maps to its own success / retry-later /
//! abort semantics. A step opens exactly one IPAM session and always closes
//! it, whatever the outcome.

mod acquire;
mod register;
mod unregister;

use std::time::Duration;

use tracing::{error, info, warn};

use crate::bluecat::{IpamError, IpamSession};
use crate::config::IpamConfig;
use crate::dns::{DnsCheck, Resolver, verify};
use crate::rpc::RpcChannel;

pub use acquire::acquire;
pub use register::register;
pub use unregister::unregister;

/// Custom attribute on the VM record that carries the registered address.
pub const IP_ATTRIBUTE: &str = "bluecat_ipaddress";

/// Option keys shared with the orchestration host.
pub mod keys {
    /// Host name requested through the service dialog, when any.
    pub const VM_HOSTNAME: &str = "vm_hostname";
    /// Target name the host derived for the machine.
    pub const VM_TARGET_NAME: &str = "vm_target_name";
    /// Host name finally chosen for the machine.
    pub const VM_TARGET_HOSTNAME: &str = "vm_target_hostname";
    /// VM object name.
    pub const VM_NAME: &str = "vm_name";
    /// Fully qualified domain name derived from the chosen host name.
    pub const VM_FQDN: &str = "vm_fqdn";
    /// Address reserved for the machine.
    pub const VM_IP_ADDR: &str = "vmipaddr";
    /// Object id of the phase-1 reservation.
    pub const IPAM_VM_ID: &str = "ipam_vmid";
    /// `"<subnet-cidr> <dns-domain>"` pair selected for the machine.
    pub const VM_CONFIG_NETWORK: &str = "vm_config_network";
}

/// Result of one workflow step as seen by the orchestration host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkflowOutcome {
    /// The step finished; provisioning may continue.
    Completed,
    /// The step should be re-run later; transient condition.
    Retry {
        /// Human-readable reason handed to the host.
        reason: String,
        /// Suggested wait before the re-run.
        interval: Duration,
    },
    /// The step failed for good; the workflow must stop.
    Aborted {
        /// Human-readable reason handed to the host.
        reason: String,
    },
}

impl WorkflowOutcome {
    /// Classifies an IPAM failure: transient conditions become retry-later,
    /// everything else aborts the workflow.
    #[must_use]
    pub fn from_error(err: &IpamError, retry_interval: Duration) -> Self {
        if err.is_retryable() {
            warn!(error = %err, "transient IPAM failure; asking the host to retry");
            Self::Retry {
                reason: err.to_string(),
                interval: retry_interval,
            }
        } else {
            error!(error = %err, "fatal IPAM failure; aborting the workflow");
            Self::Aborted {
                reason: err.to_string(),
            }
        }
    }
}

/// Per-run allocation parameters derived from workflow options.
///
/// Replaces the original's ambient instance state: every operation receives
/// the context explicitly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllocationContext {
    /// Subnet to allocate from, as `a.b.c.d/nn`.
    pub subnet: String,
    /// DNS domain appended to the chosen host name.
    pub domain: String,
}

impl AllocationContext {
    /// Parses the `vm_config_network` option (`"<subnet> <domain>"`).
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::MissingOption`] when the option is absent and
    /// [`IpamError::Parse`] when it does not hold both tokens.
    pub fn from_options(options: &dyn OptionStore) -> Result<Self, IpamError> {
        let raw = require_option(options, keys::VM_CONFIG_NETWORK)?;
        let mut tokens = raw.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some(subnet), Some(domain)) => Ok(Self {
                subnet: subnet.to_owned(),
                domain: domain.to_owned(),
            }),
            _ => Err(IpamError::Parse {
                what: String::from(keys::VM_CONFIG_NETWORK),
                message: format!("expected \"<subnet> <domain>\", got {raw:?}"),
            }),
        }
    }

    /// Derives the fully qualified domain name for a host name.
    #[must_use]
    pub fn fqdn_for(&self, hostname: &str) -> String {
        format!("{hostname}.{}", self.domain)
    }
}

/// Key/value option bag owned by the orchestration host.
pub trait OptionStore: Send {
    /// Reads an option.
    fn get(&self, key: &str) -> Option<String>;
    /// Writes an option.
    fn set(&mut self, key: &str, value: &str);
}

/// One machine as reported by the VM inventory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VmRecord {
    /// Inventory name of the machine.
    pub name: String,
    /// MAC addresses in interface order; the first one is authoritative.
    pub mac_addresses: Vec<String>,
    /// Addresses known to the inventory, in interface order.
    pub ip_addresses: Vec<String>,
}

/// VM inventory owned by the orchestration host.
pub trait VmInventory: Send {
    /// Names of every machine in the inventory.
    fn names(&self) -> Vec<String>;
    /// Looks up one machine by name.
    fn find(&self, name: &str) -> Option<VmRecord>;
    /// Reads a custom attribute from a machine's record.
    fn custom_get(&self, vm: &str, key: &str) -> Option<String>;
    /// Writes a custom attribute onto a machine's record.
    fn custom_set(&mut self, vm: &str, key: &str, value: &str);
}

pub(crate) fn require_option(
    options: &dyn OptionStore,
    key: &'static str,
) -> Result<String, IpamError> {
    options.get(key).ok_or(IpamError::MissingOption { key })
}

/// Provisioning phase to run; `Auto` picks by workflow state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Auto,
    Acquire,
    Register,
}

/// Runs the provisioning entry point: phase 2 when an address is already
/// reserved in workflow state, phase 1 otherwise.
///
/// The session is opened once, shared by the phase, and always closed. Login
/// failure asks the host to retry later; it is never retried in-process.
pub async fn run_provision<C: RpcChannel>(
    channel: C,
    config: IpamConfig,
    options: &mut dyn OptionStore,
    inventory: &mut dyn VmInventory,
) -> WorkflowOutcome {
    run_phase(Phase::Auto, channel, config, options, inventory).await
}

/// Runs phase 1 unconditionally, even when an address is already recorded.
pub async fn run_acquire<C: RpcChannel>(
    channel: C,
    config: IpamConfig,
    options: &mut dyn OptionStore,
    inventory: &mut dyn VmInventory,
) -> WorkflowOutcome {
    run_phase(Phase::Acquire, channel, config, options, inventory).await
}

/// Runs phase 2 unconditionally; fails when the phase-1 state is missing.
pub async fn run_register<C: RpcChannel>(
    channel: C,
    config: IpamConfig,
    options: &mut dyn OptionStore,
    inventory: &mut dyn VmInventory,
) -> WorkflowOutcome {
    run_phase(Phase::Register, channel, config, options, inventory).await
}

async fn run_phase<C: RpcChannel>(
    phase: Phase,
    channel: C,
    config: IpamConfig,
    options: &mut dyn OptionStore,
    inventory: &mut dyn VmInventory,
) -> WorkflowOutcome {
    let retry_interval = config.retry_interval();
    let mut session = match IpamSession::open(channel, config).await {
        Ok(session) => session,
        Err(err) => return WorkflowOutcome::from_error(&err, retry_interval),
    };

    let result = match AllocationContext::from_options(options) {
        Ok(context) => {
            let run_register_phase = match phase {
                Phase::Acquire => false,
                Phase::Register => true,
                Phase::Auto => options.get(keys::VM_IP_ADDR).is_some(),
            };
            if run_register_phase {
                register(&mut session, &context, options, inventory).await
            } else {
                acquire(&mut session, &context, options, inventory).await
            }
        }
        Err(err) => Err(err),
    };

    session.close().await;
    match result {
        Ok(()) => WorkflowOutcome::Completed,
        Err(err) => WorkflowOutcome::from_error(&err, retry_interval),
    }
}

/// Runs the retirement flow for one machine and always closes the session.
pub async fn run_unregister<C: RpcChannel>(
    channel: C,
    config: IpamConfig,
    inventory: &dyn VmInventory,
    vm_name: &str,
) -> WorkflowOutcome {
    let retry_interval = config.retry_interval();
    let mut session = match IpamSession::open(channel, config).await {
        Ok(session) => session,
        Err(err) => return WorkflowOutcome::from_error(&err, retry_interval),
    };

    let result = unregister(&mut session, inventory, vm_name).await;
    session.close().await;
    match result {
        Ok(()) => WorkflowOutcome::Completed,
        Err(err) => WorkflowOutcome::from_error(&err, retry_interval),
    }
}

/// Runs the DNS gate: verifies the reserved name resolves to the reserved
/// address before provisioning proceeds.
pub async fn run_check_dns<R: Resolver + ?Sized>(
    resolver: &R,
    options: &dyn OptionStore,
    retry_interval: Duration,
) -> WorkflowOutcome {
    let fqdn = match require_option(options, keys::VM_FQDN) {
        Ok(fqdn) => fqdn,
        Err(err) => return WorkflowOutcome::from_error(&err, retry_interval),
    };
    let raw_address = match require_option(options, keys::VM_IP_ADDR) {
        Ok(address) => address,
        Err(err) => return WorkflowOutcome::from_error(&err, retry_interval),
    };
    let Ok(expected) = raw_address.parse() else {
        return WorkflowOutcome::Aborted {
            reason: format!("reserved address {raw_address:?} is not an IP address"),
        };
    };

    match verify(resolver, &fqdn, expected).await {
        DnsCheck::Verified => {
            info!(fqdn, address = %expected, "DNS record verified");
            WorkflowOutcome::Completed
        }
        DnsCheck::NeedsRetry => WorkflowOutcome::Retry {
            reason: format!("waiting for DNS record of {fqdn}"),
            interval: retry_interval,
        },
        DnsCheck::Inconsistent { observed } => WorkflowOutcome::Aborted {
            reason: format!(
                "DNS inconsistency: {fqdn} resolves to {observed:?}, expected {expected}"
            ),
        },
    }
}
