//! Session lifecycle: login, logout, and the shared call wrappers.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::IpamConfig;
use crate::rpc::{Entity, RpcCall, RpcChannel, RpcReply};

use super::types::ConfigurationId;
use super::{IpamError, IpamSession, SessionState};

impl<C: RpcChannel> IpamSession<C> {
    /// Opens a session by logging in to the IPAM.
    ///
    /// A failed login is never retried here: the caller surfaces it to the
    /// orchestration host as a retry-later condition.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::Config`] when the configuration fails validation
    /// and [`IpamError::Auth`] when the login call fails, returns a non-2xx
    /// status, or carries no session token.
    pub async fn open(channel: C, config: IpamConfig) -> Result<Self, IpamError> {
        config.validate()?;
        debug!(endpoint = %config.endpoint(), "logging in to IPAM");

        let call = RpcCall::Login {
            username: config.username.clone(),
            password: config.password.clone(),
        };
        let reply = channel
            .call(&call, None)
            .await
            .map_err(|err| IpamError::Auth {
                message: err.to_string(),
            })?;
        if !reply.is_success() {
            return Err(IpamError::Auth {
                message: format!("HTTP status {}", reply.status),
            });
        }
        let token = reply
            .body
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| IpamError::Auth {
                message: String::from("login reply carried no session token"),
            })?;

        info!(endpoint = %config.endpoint(), "IPAM session opened");
        Ok(Self {
            channel,
            config,
            state: SessionState::Open,
            token: Some(token),
            configuration: None,
        })
    }

    /// Closes the session with a best-effort logout.
    ///
    /// Idempotent; logout failures are logged and swallowed so that workflow
    /// teardown can never be aborted by the IPAM. After the first call the
    /// session is unusable.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        match self.raw(&RpcCall::Logout).await {
            Ok(reply) if reply.is_success() => info!("IPAM session closed"),
            Ok(reply) => warn!(status = reply.status, "IPAM logout rejected; continuing"),
            Err(err) => warn!(error = %err, "IPAM logout failed; continuing"),
        }
        self.state = SessionState::Closed;
        self.token = None;
        self.configuration = None;
    }

    /// Resolves the configured configuration scope, caching the id for the
    /// session's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::NotFound`] when no scope carries the configured
    /// name, besides the usual session and transport failures.
    pub async fn configuration_id(&mut self) -> Result<ConfigurationId, IpamError> {
        if let Some(cached) = self.configuration {
            return Ok(cached);
        }
        let name = self.config.configuration_name.clone();
        let entity = self
            .entity(
                &RpcCall::GetEntityByName {
                    parent_id: 0,
                    name: name.clone(),
                    entity_type: String::from("Configuration"),
                },
                "configuration scope",
            )
            .await?;
        if !entity.exists() {
            return Err(IpamError::NotFound {
                what: format!("configuration scope {name:?}"),
            });
        }
        let id = ConfigurationId::new(entity.id);
        debug!(%id, configuration = %name, "resolved configuration scope");
        self.configuration = Some(id);
        Ok(id)
    }

    /// Returns the configuration name this session operates under.
    #[must_use]
    pub fn configuration_name(&self) -> &str {
        &self.config.configuration_name
    }

    /// Access to the session configuration.
    #[must_use]
    pub const fn config(&self) -> &IpamConfig {
        &self.config
    }

    pub(super) fn require_open(&self, op: &'static str) -> Result<(), IpamError> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(IpamError::SessionClosed { op })
        }
    }

    /// Performs a call with the session token attached, without judging the
    /// HTTP status. Used where a failed status is a result, not an error.
    pub(super) async fn raw(&self, call: &RpcCall) -> Result<RpcReply, IpamError> {
        self.require_open(call.op_name())?;
        Ok(self.channel.call(call, self.token.as_deref()).await?)
    }

    /// Performs a call and returns the body only when the status is 2xx.
    ///
    /// Non-2xx statuses are failures in their own right; the body of a failed
    /// call is never surfaced.
    pub(super) async fn checked(&self, call: &RpcCall) -> Result<Value, IpamError> {
        let op = call.op_name();
        let reply = self.raw(call).await?;
        if !reply.is_success() {
            return Err(IpamError::Transport {
                op,
                status: reply.status,
            });
        }
        Ok(reply.body)
    }

    /// Performs a checked call and validates the body into an [`Entity`].
    pub(super) async fn entity(
        &self,
        call: &RpcCall,
        what: &str,
    ) -> Result<Entity, IpamError> {
        let body = self.checked(call).await?;
        serde_json::from_value(body).map_err(|err| IpamError::Parse {
            what: what.to_owned(),
            message: err.to_string(),
        })
    }
}
