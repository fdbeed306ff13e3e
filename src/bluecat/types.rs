//! Newtypes for IPAM object identifiers and MAC addresses.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use thiserror::Error;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw object id.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw id value.
            #[must_use]
            pub const fn value(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(
    /// Identifier of an arbitrary IPAM object (reservation, MAC entry, server).
    ObjectId
);
id_newtype!(
    /// Identifier of a top-level configuration scope.
    ConfigurationId
);
id_newtype!(
    /// Identifier of a DNS view referenced by network properties.
    ViewId
);

/// Network object resolved from a subnet, with the view networks register
/// their host records under.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NetworkHandle {
    /// Object id of the network.
    pub id: ObjectId,
    /// The network's `defaultView` property.
    pub default_view: ViewId,
}

/// A six-octet MAC address.
///
/// Accepts colon- or dash-separated hex on input; renders dash-separated
/// uppercase, the form the IPAM stores.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Builds a MAC address from raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the raw octets.
    #[must_use]
    pub const fn octets(self) -> [u8; 6] {
        self.0
    }

    /// Generates a random placeholder MAC for phase-1 reservations.
    ///
    /// The locally-administered bit is set and the multicast bit cleared so
    /// the placeholder can never collide with real hardware.
    #[must_use]
    pub fn random_placeholder() -> Self {
        let mut octets: [u8; 6] = rand::thread_rng().r#gen();
        if let Some(first) = octets.first_mut() {
            *first = (*first | 0x02) & 0xFE;
        }
        Self(octets)
    }
}

/// Error produced when a MAC address string cannot be parsed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid MAC address {input:?}: {reason}")]
pub struct MacAddressParseError {
    /// The rejected input.
    pub input: String,
    /// Why the input was rejected.
    pub reason: &'static str,
}

impl FromStr for MacAddress {
    type Err = MacAddressParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let separator = if input.contains(':') { ':' } else { '-' };
        let mut octets = [0_u8; 6];
        let mut count = 0_usize;
        for (slot, part) in octets.iter_mut().zip(input.split(separator)) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| MacAddressParseError {
                input: input.to_owned(),
                reason: "octet is not two-digit hex",
            })?;
            count += 1;
        }
        if count != 6 || input.split(separator).count() != 6 {
            return Err(MacAddressParseError {
                input: input.to_owned(),
                reason: "expected six octets",
            });
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}-{b:02X}-{c:02X}-{d:02X}-{e:02X}-{g:02X}")
    }
}
