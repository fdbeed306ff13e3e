//! Core library for the Leasehold IPAM provisioning tool.
//!
//! The crate drives a BlueCat-style IPAM through a VM provisioning
//! lifecycle: reserve a host name and address under a placeholder MAC,
//! rebind the reservation to the real MAC once the hypervisor assigns one,
//! gate provisioning on DNS consistency, and clean everything up again at
//! retirement.

pub mod bluecat;
pub mod config;
pub mod dns;
pub mod props;
pub mod rpc;
pub mod test_support;
pub mod workflow;

pub use bluecat::{
    HostnamePattern, IpamError, IpamSession, MacAddress, ObjectId, SearchOutcome, successor,
};
pub use config::{ConfigError, IpamConfig};
pub use dns::{DnsCheck, Resolver, SystemResolver, verify};
pub use props::{Decoded, PropertySet};
pub use rpc::{Entity, HttpChannel, RpcCall, RpcChannel, RpcReply, TransportError};
pub use workflow::{
    AllocationContext, OptionStore, VmInventory, VmRecord, WorkflowOutcome, run_acquire,
    run_check_dns, run_provision, run_register, run_unregister,
};
