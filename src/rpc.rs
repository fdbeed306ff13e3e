//! Narrow seam to the IPAM's remote-procedure interface.
//!
//! The IPAM exposes a small set of operations (login, entity lookup, address
//! assignment, deletion, search, deployment) over a SOAP endpoint. The
//! transport mechanics stay behind [`RpcChannel`]: the session layer only sees
//! an operation, an HTTP status, and a structured body. [`HttpChannel`] is the
//! shipped implementation; tests drive the same trait with an in-memory fake.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::IpamConfig;

/// One remote operation with its typed parameters.
///
/// Variant fields mirror the message keys of the IPAM API. `SearchByCategory`
/// replies carry a JSON array of entities; every other entity-returning call
/// carries a single entity object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcCall {
    /// Opens a session; the reply body carries the opaque session token.
    Login {
        /// Account used for the session.
        username: String,
        /// Credential for the account.
        password: String,
    },
    /// Ends the session identified by the attached token.
    Logout,
    /// Looks up a named child entity under a parent object.
    GetEntityByName {
        /// Parent object id (`0` for top-level scopes).
        parent_id: i64,
        /// Entity name to look up.
        name: String,
        /// Entity type discriminator, for example `Configuration`.
        entity_type: String,
    },
    /// Resolves the network object containing an address.
    GetIpRangedByIp {
        /// Configuration scope to search under.
        container_id: i64,
        /// Range type discriminator, for example `IP4Network`.
        range_type: String,
        /// Dotted-quad base address of the network.
        address: String,
    },
    /// Assigns the next unused address in a network.
    AssignNextAvailableIp4Address {
        /// Configuration scope id.
        configuration_id: i64,
        /// Network object id to allocate from.
        parent_id: i64,
        /// MAC address to bind the reservation to.
        mac_address: String,
        /// `fqdn,viewId,reverseFlag,sameAsZoneFlag` tuple.
        host_info: String,
        /// Assignment action, for example `MAKE_DHCP_RESERVED`.
        action: String,
        /// Pipe-delimited properties attached to the new entry.
        properties: String,
    },
    /// Assigns one specific address.
    AssignIp4Address {
        /// Configuration scope id.
        configuration_id: i64,
        /// Address to assign.
        ip4_address: String,
        /// MAC address to bind the reservation to.
        mac_address: String,
        /// `fqdn,viewId,reverseFlag,sameAsZoneFlag` tuple.
        host_info: String,
        /// Assignment action, for example `MAKE_DHCP_RESERVED`.
        action: String,
        /// Pipe-delimited properties attached to the new entry.
        properties: String,
    },
    /// Looks up the object registered for a MAC address.
    GetMacAddress {
        /// Configuration scope id.
        configuration_id: i64,
        /// MAC address to look up.
        mac_address: String,
    },
    /// Deletes an object by id.
    Delete {
        /// Object id to delete.
        object_id: i64,
    },
    /// Deletes a device instance by identifier within a configuration.
    DeleteDeviceInstance {
        /// Configuration scope name.
        config_name: String,
        /// Device identifier, typically a MAC address.
        identifier: String,
    },
    /// Searches entities by keyword within an object category.
    SearchByCategory {
        /// Search keyword; supports the IPAM's wildcard syntax.
        keyword: String,
        /// Object category to search, or `ALL`.
        category: String,
        /// Offset of the first result.
        start: i64,
        /// Maximum number of results.
        count: i64,
    },
    /// Pushes pending configuration to a downstream server.
    DeployServer {
        /// Server object id to deploy.
        server_id: i64,
    },
}

impl RpcCall {
    /// Returns the operation name used for routing and log messages.
    #[must_use]
    pub const fn op_name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Logout => "logout",
            Self::GetEntityByName { .. } => "get_entity_by_name",
            Self::GetIpRangedByIp { .. } => "get_ip_ranged_by_ip",
            Self::AssignNextAvailableIp4Address { .. } => "assign_next_available_ip4_address",
            Self::AssignIp4Address { .. } => "assign_ip4_address",
            Self::GetMacAddress { .. } => "get_mac_address",
            Self::Delete { .. } => "delete",
            Self::DeleteDeviceInstance { .. } => "delete_device_instance",
            Self::SearchByCategory { .. } => "search_by_category",
            Self::DeployServer { .. } => "deploy_server",
        }
    }

    /// Renders the call parameters as a JSON object using the wire key names.
    #[must_use]
    pub fn params(&self) -> Value {
        match self {
            Self::Login { username, password } => json!({
                "username": username,
                "password": password,
            }),
            Self::Logout => json!({}),
            Self::GetEntityByName {
                parent_id,
                name,
                entity_type,
            } => json!({
                "parentId": parent_id,
                "name": name,
                "type": entity_type,
            }),
            Self::GetIpRangedByIp {
                container_id,
                range_type,
                address,
            } => json!({
                "containerId": container_id,
                "type": range_type,
                "address": address,
            }),
            Self::AssignNextAvailableIp4Address {
                configuration_id,
                parent_id,
                mac_address,
                host_info,
                action,
                properties,
            } => json!({
                "configurationId": configuration_id,
                "parentId": parent_id,
                "macAddress": mac_address,
                "hostInfo": host_info,
                "action": action,
                "properties": properties,
            }),
            Self::AssignIp4Address {
                configuration_id,
                ip4_address,
                mac_address,
                host_info,
                action,
                properties,
            } => json!({
                "configurationId": configuration_id,
                "ip4Address": ip4_address,
                "macAddress": mac_address,
                "hostInfo": host_info,
                "action": action,
                "properties": properties,
            }),
            Self::GetMacAddress {
                configuration_id,
                mac_address,
            } => json!({
                "configurationId": configuration_id,
                "macAddress": mac_address,
            }),
            Self::Delete { object_id } => json!({ "objectId": object_id }),
            Self::DeleteDeviceInstance {
                config_name,
                identifier,
            } => json!({
                "configName": config_name,
                "identifier": identifier,
            }),
            Self::SearchByCategory {
                keyword,
                category,
                start,
                count,
            } => json!({
                "keyword": keyword,
                "category": category,
                "start": start,
                "count": count,
            }),
            Self::DeployServer { server_id } => json!({ "serverId": server_id }),
        }
    }
}

/// Outcome of one remote call: the HTTP status plus the parsed body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcReply {
    /// HTTP status code returned by the endpoint.
    pub status: u16,
    /// Structured response body; meaningful only when the status is 2xx.
    pub body: Value,
}

impl RpcReply {
    /// Builds a successful (200) reply around a body.
    #[must_use]
    pub const fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Builds a reply with an explicit status and empty body.
    #[must_use]
    pub const fn status_only(status: u16) -> Self {
        Self {
            status,
            body: Value::Null,
        }
    }

    /// Returns true for 2xx statuses. The status is checked explicitly; a
    /// non-empty body on a failed call is never trusted.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Structured shape shared by entity-returning operations.
///
/// An `id` of zero is the IPAM's way of reporting "no such object".
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Entity {
    /// Object id; zero when the entity does not exist.
    #[serde(default)]
    pub id: i64,
    /// Entity name, when present.
    #[serde(default)]
    pub name: Option<String>,
    /// Pipe-delimited property blob, when present.
    #[serde(default)]
    pub properties: Option<String>,
}

impl Entity {
    /// Returns true when the IPAM reported an existing object.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.id != 0
    }
}

/// Failures below the HTTP-status level: the call never produced a reply.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when the connection or request could not be completed.
    #[error("connection to IPAM failed during {op}: {message}")]
    Connect {
        /// Operation being attempted.
        op: &'static str,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the HTTP client itself cannot be constructed.
    #[error("failed to build HTTP client: {message}")]
    Client {
        /// Underlying error message.
        message: String,
    },
}

/// Future returned by channel operations.
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Opaque request/response channel to the IPAM.
///
/// Implementations attach the session token (when given) to the outgoing
/// request and report the HTTP status verbatim; they never retry and never
/// interpret the body.
pub trait RpcChannel: Send + Sync {
    /// Performs one remote call.
    fn call<'a>(&'a self, call: &'a RpcCall, token: Option<&'a str>) -> RpcFuture<'a, RpcReply>;
}

impl<T: RpcChannel + ?Sized> RpcChannel for &T {
    fn call<'a>(&'a self, call: &'a RpcCall, token: Option<&'a str>) -> RpcFuture<'a, RpcReply> {
        (**self).call(call, token)
    }
}

impl<T: RpcChannel + ?Sized> RpcChannel for Arc<T> {
    fn call<'a>(&'a self, call: &'a RpcCall, token: Option<&'a str>) -> RpcFuture<'a, RpcReply> {
        (**self).call(call, token)
    }
}

/// Name of the session cookie carrying the auth token.
const AUTH_COOKIE: &str = "BAMAuthToken";

/// Channel implementation speaking JSON-over-HTTP to the IPAM endpoint.
///
/// Each operation posts to `<endpoint>/<op_name>` with the parameters as the
/// request body and the session token in a cookie header. Deployments fronted
/// by the SOAP-only service variant supply their own [`RpcChannel`] instead.
#[derive(Clone, Debug)]
pub struct HttpChannel {
    client: reqwest::Client,
    base: String,
}

impl HttpChannel {
    /// Builds a channel from the IPAM configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] when the HTTP client cannot be
    /// constructed from the configured timeouts.
    pub fn new(config: &IpamConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.open_timeout())
            .timeout(config.read_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|err| TransportError::Client {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            base: config.endpoint(),
        })
    }

    async fn post(&self, call: &RpcCall, token: Option<&str>) -> Result<RpcReply, TransportError> {
        let op = call.op_name();
        let url = format!("{}/{op}", self.base);
        debug!(op, url, "calling IPAM");

        let mut request = self.client.post(&url).json(&call.params());
        if let Some(value) = token {
            request = request.header(reqwest::header::COOKIE, format!("{AUTH_COOKIE}={value}"));
        }

        let response = request
            .send()
            .await
            .map_err(|err| TransportError::Connect {
                op,
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        let session_token = extract_auth_cookie(response.headers());
        let text = response
            .text()
            .await
            .map_err(|err| TransportError::Connect {
                op,
                message: err.to_string(),
            })?;

        let mut body =
            serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "raw": text }));
        if let (Some(found), Some(map)) = (session_token, body.as_object_mut()) {
            // Login replies carry the token as a cookie; lift it into the
            // body so the session layer stays transport-agnostic.
            map.entry("token").or_insert_with(|| Value::String(found));
        }

        debug!(op, status, "IPAM replied");
        Ok(RpcReply { status, body })
    }
}

fn extract_auth_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let rest = cookie.strip_prefix(AUTH_COOKIE)?.strip_prefix('=')?;
            Some(rest.split(';').next().unwrap_or(rest).trim().to_owned())
        })
}

impl RpcChannel for HttpChannel {
    fn call<'a>(&'a self, call: &'a RpcCall, token: Option<&'a str>) -> RpcFuture<'a, RpcReply> {
        Box::pin(self.post(call, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_use_wire_key_names() {
        let call = RpcCall::GetEntityByName {
            parent_id: 0,
            name: String::from("default"),
            entity_type: String::from("Configuration"),
        };
        assert_eq!(
            call.params(),
            json!({"parentId": 0, "name": "default", "type": "Configuration"})
        );
    }

    #[test]
    fn reply_success_is_an_explicit_status_range_check() {
        assert!(RpcReply::ok(Value::Null).is_success());
        assert!(
            RpcReply {
                status: 204,
                body: Value::Null
            }
            .is_success()
        );
        assert!(!RpcReply::status_only(302).is_success());
        assert!(!RpcReply::status_only(500).is_success());
    }

    #[test]
    fn entity_with_zero_id_does_not_exist() {
        let absent: Entity = serde_json::from_value(json!({"id": 0})).expect("deserialise");
        assert!(!absent.exists());
        let present: Entity =
            serde_json::from_value(json!({"id": 7, "name": "cf000001"})).expect("deserialise");
        assert!(present.exists());
    }

    #[test]
    fn auth_cookie_is_extracted_from_set_cookie_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(
            reqwest::header::SET_COOKIE,
            "JSESSIONID=abc; Path=/".parse().expect("header value"),
        );
        headers.append(
            reqwest::header::SET_COOKIE,
            "BAMAuthToken=tok-123; Path=/; HttpOnly"
                .parse()
                .expect("header value"),
        );
        assert_eq!(extract_auth_cookie(&headers), Some(String::from("tok-123")));
    }
}
