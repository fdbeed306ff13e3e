//! Hostname sequence derivation.
//!
//! Generated hostnames follow `<prefix>NNNNNN` (six digits). The next name is
//! derived each time from the union of every name visible in the IPAM and in
//! the VM inventory: sort, deduplicate, take the alphanumeric successor of the
//! last. This is a point-in-time check, not a reservation; concurrent runs can
//! still race (the IPAM's own next-free allocation is the only atomic step).

use std::collections::BTreeSet;

use regex::Regex;

use super::error::IpamError;

/// Compiled matchers for one hostname prefix.
#[derive(Clone, Debug)]
pub struct HostnamePattern {
    prefix: String,
    ipam: Regex,
    inventory: Regex,
}

impl HostnamePattern {
    /// Compiles matchers for a prefix.
    ///
    /// IPAM entries must match `<prefix>` plus exactly six digits; inventory
    /// names are accepted case-insensitively with six or more digits, which is
    /// how the inventory reports historically imported machines.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::Config`] when the pattern cannot be compiled.
    pub fn new(prefix: &str) -> Result<Self, IpamError> {
        let escaped = regex::escape(prefix);
        let ipam = Regex::new(&format!("^{escaped}[0-9]{{6}}$"))
            .map_err(|err| IpamError::Config(err.to_string()))?;
        let inventory = Regex::new(&format!("(?i)^{escaped}[0-9]{{6,}}$"))
            .map_err(|err| IpamError::Config(err.to_string()))?;
        Ok(Self {
            prefix: prefix.to_owned(),
            ipam,
            inventory,
        })
    }

    /// The configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Search keyword matching every name under this prefix.
    #[must_use]
    pub fn search_keyword(&self) -> String {
        format!("^{}*", self.prefix)
    }

    /// Sequence floor; its successor is the first generated name.
    #[must_use]
    pub fn seed(&self) -> String {
        format!("{}000000", self.prefix)
    }

    /// Returns true for IPAM entries that belong to the sequence.
    #[must_use]
    pub fn matches_ipam(&self, name: &str) -> bool {
        self.ipam.is_match(name)
    }

    /// Returns true for inventory names that belong to the sequence.
    #[must_use]
    pub fn matches_inventory(&self, name: &str) -> bool {
        self.inventory.is_match(name)
    }

    /// Derives the next hostname from the names visible in both sources.
    ///
    /// The union is seeded with [`seed`](Self::seed) so an empty world yields
    /// `<prefix>000001`.
    #[must_use]
    pub fn next_in_sequence<'a, I, J>(&self, ipam_names: I, inventory_names: J) -> String
    where
        I: IntoIterator<Item = &'a str>,
        J: IntoIterator<Item = &'a str>,
    {
        let mut names = BTreeSet::new();
        names.insert(self.seed());
        names.extend(
            ipam_names
                .into_iter()
                .filter(|name| self.matches_ipam(name))
                .map(str::to_owned),
        );
        names.extend(
            inventory_names
                .into_iter()
                .filter(|name| self.matches_inventory(name))
                // Inventory matching is case-insensitive; normalise so mixed
                // case cannot break the lexicographic ordering.
                .map(str::to_ascii_lowercase),
        );
        names
            .iter()
            .next_back()
            .map_or_else(|| successor(&self.seed()), |last| successor(last))
    }
}

/// Computes the alphanumeric successor of a string.
///
/// The rightmost alphanumeric character is incremented; `9`, `z` and `Z` wrap
/// to `0`, `a` and `A` and carry leftward. A carry off the left end prepends a
/// new character (`99` becomes `100`, `zz` becomes `aaa`). Non-alphanumeric
/// characters are skipped by the carry.
#[must_use]
pub fn successor(name: &str) -> String {
    let mut chars: Vec<char> = name.chars().collect();
    let mut carry = true;
    let mut last_alnum: Option<char> = None;

    for ch in chars.iter_mut().rev() {
        if !carry {
            break;
        }
        if !ch.is_ascii_alphanumeric() {
            continue;
        }
        last_alnum = Some(*ch);
        let (next, wrapped) = match *ch {
            '9' => ('0', true),
            'z' => ('a', true),
            'Z' => ('A', true),
            other => match u8::try_from(other) {
                Ok(byte) => (char::from(byte + 1), false),
                // Unreachable for the ASCII alphanumerics filtered above.
                Err(_) => (other, false),
            },
        };
        *ch = next;
        carry = wrapped;
    }

    if carry {
        let prepend = match last_alnum {
            Some(ch) if ch.is_ascii_digit() => Some('1'),
            Some(ch) if ch.is_ascii_lowercase() => Some('a'),
            Some(_) => Some('A'),
            None => None,
        };
        if let Some(ch) = prepend {
            chars.insert(0, ch);
        }
    }

    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("cf000042", "cf000043")]
    #[case("cf000999", "cf001000")]
    #[case("cf999999", "cg000000")]
    #[case("99", "100")]
    #[case("zz", "aaa")]
    #[case("a", "b")]
    #[case("Az", "Ba")]
    #[case("cf00a11m", "cf00a11n")]
    fn successor_matches_string_succ_semantics(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(successor(input), expected);
    }

    fn pattern() -> HostnamePattern {
        HostnamePattern::new("cf").expect("valid prefix")
    }

    #[test]
    fn generation_excludes_collisions_from_both_sources() {
        let next = pattern().next_in_sequence(
            ["cf000001", "cf000002"],
            ["cf000003"],
        );
        assert_eq!(next, "cf000004");
    }

    #[test]
    fn empty_world_yields_first_name_after_seed() {
        let next = pattern().next_in_sequence([], []);
        assert_eq!(next, "cf000001");
    }

    #[test]
    fn non_sequence_names_are_ignored() {
        let next = pattern().next_in_sequence(
            ["cf0001", "webserver", "cf00000x"],
            ["CF000005", "cf12345"],
        );
        // Only the case-insensitive inventory name participates.
        assert_eq!(next, "cf000006");
    }

    #[test]
    fn ipam_pattern_requires_exactly_six_digits() {
        let p = pattern();
        assert!(p.matches_ipam("cf000001"));
        assert!(!p.matches_ipam("cf0000001"));
        assert!(!p.matches_ipam("CF000001"));
        assert!(p.matches_inventory("cf0000001"));
        assert!(p.matches_inventory("CF000001"));
    }
}
