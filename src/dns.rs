//! DNS consistency gate run after deployment.
//!
//! Once an address is registered and deployed, the host name must resolve to
//! exactly the reserved address before provisioning proceeds. Propagation lag
//! is expected, so an empty answer asks the host to retry later; a wrong or
//! ambiguous answer points at a stale or conflicting record and is fatal.

use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;

use tracing::{debug, warn};

/// Future returned by resolver lookups.
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Vec<IpAddr>>> + Send + 'a>>;

/// Forward resolution seam; the system resolver is the shipped
/// implementation and tests substitute scripted answers.
pub trait Resolver: Send + Sync {
    /// Resolves a name to all addresses currently visible.
    fn lookup<'a>(&'a self, fqdn: &'a str) -> ResolveFuture<'a>;
}

/// Resolver backed by the operating system's name resolution.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn lookup<'a>(&'a self, fqdn: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move {
            let addresses = tokio::net::lookup_host((fqdn, 0))
                .await?
                .map(|addr| addr.ip())
                .collect::<Vec<_>>();
            Ok(dedup(addresses))
        })
    }
}

fn dedup(addresses: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut seen = Vec::with_capacity(addresses.len());
    for address in addresses {
        if !seen.contains(&address) {
            seen.push(address);
        }
    }
    seen
}

/// Verdict of one consistency check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DnsCheck {
    /// The name resolves to exactly the expected address.
    Verified,
    /// The name does not resolve yet; propagation lag, retry later.
    NeedsRetry,
    /// The name resolves to the wrong address or to several addresses.
    Inconsistent {
        /// Addresses the name currently resolves to.
        observed: Vec<IpAddr>,
    },
}

/// Checks that `fqdn` resolves to exactly `expected`.
///
/// Resolution failures (including a not-yet-existing record) count as zero
/// addresses and therefore [`DnsCheck::NeedsRetry`]; this function never
/// fails.
pub async fn verify<R: Resolver + ?Sized>(
    resolver: &R,
    fqdn: &str,
    expected: IpAddr,
) -> DnsCheck {
    let addresses = match resolver.lookup(fqdn).await {
        Ok(addresses) => addresses,
        Err(err) => {
            debug!(fqdn, error = %err, "resolution failed; treating as not yet propagated");
            Vec::new()
        }
    };

    match addresses.as_slice() {
        [] => {
            debug!(fqdn, "name does not resolve yet");
            DnsCheck::NeedsRetry
        }
        [single] if *single == expected => {
            debug!(fqdn, address = %expected, "name resolves to the reserved address");
            DnsCheck::Verified
        }
        _ => {
            warn!(fqdn, ?addresses, %expected, "DNS answer conflicts with the reservation");
            DnsCheck::Inconsistent {
                observed: addresses,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedResolver {
        answer: io::Result<Vec<IpAddr>>,
    }

    impl ScriptedResolver {
        fn with(addresses: &[&str]) -> Self {
            Self {
                answer: Ok(addresses
                    .iter()
                    .map(|raw| raw.parse().expect("test address"))
                    .collect()),
            }
        }

        fn failing() -> Self {
            Self {
                answer: Err(io::Error::new(io::ErrorKind::NotFound, "no such host")),
            }
        }
    }

    impl Resolver for ScriptedResolver {
        fn lookup<'a>(&'a self, _fqdn: &'a str) -> ResolveFuture<'a> {
            let answer = match &self.answer {
                Ok(addresses) => Ok(addresses.clone()),
                Err(err) => Err(io::Error::new(err.kind(), err.to_string())),
            };
            Box::pin(async move { answer })
        }
    }

    fn expected() -> IpAddr {
        "10.0.0.5".parse().expect("test address")
    }

    #[tokio::test]
    async fn zero_addresses_need_retry() {
        let verdict = verify(&ScriptedResolver::with(&[]), "cf000001.example.com", expected()).await;
        assert_eq!(verdict, DnsCheck::NeedsRetry);
    }

    #[tokio::test]
    async fn resolution_failure_counts_as_not_yet_propagated() {
        let verdict =
            verify(&ScriptedResolver::failing(), "cf000001.example.com", expected()).await;
        assert_eq!(verdict, DnsCheck::NeedsRetry);
    }

    #[tokio::test]
    async fn single_matching_address_verifies() {
        let verdict = verify(
            &ScriptedResolver::with(&["10.0.0.5"]),
            "cf000001.example.com",
            expected(),
        )
        .await;
        assert_eq!(verdict, DnsCheck::Verified);
    }

    #[tokio::test]
    async fn single_differing_address_is_inconsistent() {
        let verdict = verify(
            &ScriptedResolver::with(&["10.0.0.9"]),
            "cf000001.example.com",
            expected(),
        )
        .await;
        assert!(matches!(verdict, DnsCheck::Inconsistent { .. }));
    }

    #[tokio::test]
    async fn multiple_addresses_are_inconsistent_even_if_one_matches() {
        let verdict = verify(
            &ScriptedResolver::with(&["10.0.0.5", "10.0.0.9"]),
            "cf000001.example.com",
            expected(),
        )
        .await;
        assert!(matches!(verdict, DnsCheck::Inconsistent { ref observed } if observed.len() == 2));
    }
}
