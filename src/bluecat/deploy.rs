//! Deployment trigger for downstream servers.

use tracing::{error, info};

use crate::rpc::{RpcCall, RpcChannel};

use super::types::ObjectId;
use super::{IpamError, IpamSession};

impl<C: RpcChannel> IpamSession<C> {
    /// Pushes pending configuration to one downstream server.
    ///
    /// A non-2xx status is reported as `false` rather than an error so the
    /// caller can decide whether a partial deployment is fatal. The caller is
    /// also responsible for any settle delay between servers.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::SessionClosed`] on a closed session and
    /// [`IpamError::Connection`] when the call never reaches the service.
    pub async fn trigger_deploy(&self, server: ObjectId) -> Result<bool, IpamError> {
        let reply = self
            .raw(&RpcCall::DeployServer {
                server_id: server.value(),
            })
            .await?;
        if reply.is_success() {
            info!(%server, "triggered configuration deploy");
            Ok(true)
        } else {
            error!(%server, status = reply.status, "deploy_server call rejected");
            Ok(false)
        }
    }
}
