//! IPAM client: session lifecycle, address allocation, and deployment.

mod allocator;
mod deploy;
mod error;
mod hostname;
mod session;
mod types;

use crate::config::IpamConfig;
use crate::rpc::RpcChannel;

pub use allocator::SearchOutcome;
pub use error::IpamError;
pub use hostname::{HostnamePattern, successor};
pub use types::{
    ConfigurationId, MacAddress, MacAddressParseError, NetworkHandle, ObjectId, ViewId,
};

/// Assignment action marking an address as DHCP-reserved for a MAC.
const MAKE_DHCP_RESERVED: &str = "MAKE_DHCP_RESERVED";
/// Contact note attached to every reservation this tool creates.
const CONTACT_PROPERTY: &str = "contact=Auto-generated by provisioning workflow";
/// Result window when enumerating the whole hostname sequence.
const HOSTNAME_SEARCH_COUNT: i64 = 100_000;
/// Result window when probing a requested name for conflicts.
const CONFLICT_SEARCH_COUNT: i64 = 10;
/// Result window for unscoped object searches during retirement.
const SEARCH_ALL_COUNT: i64 = 1_000_000;

/// Lifecycle state of a session; only `Open` permits remote calls.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SessionState {
    Open,
    Closed,
}

/// An authenticated session against the IPAM.
///
/// Created by [`IpamSession::open`], which performs the login; destroyed by
/// [`IpamSession::close`], after which every operation fails with
/// [`IpamError::SessionClosed`]. A workflow run holds exactly one session.
#[derive(Debug)]
pub struct IpamSession<C: RpcChannel> {
    channel: C,
    config: IpamConfig,
    state: SessionState,
    token: Option<String>,
    configuration: Option<ConfigurationId>,
}

#[cfg(test)]
mod tests;
