//! Codec for the IPAM's pipe-delimited property blobs.
//!
//! Entities carry their metadata as a single string of the form
//! `key1=value1|key2=value2`. The decoder is deliberately tolerant: a segment
//! without an `=` is skipped and reported rather than failing the whole parse,
//! so an unexpected blob cannot take down a running workflow.

/// Ordered string-to-string mapping backing the wire representation.
///
/// Insertion order is preserved so that `decode` followed by `encode`
/// reproduces the original blob.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PropertySet {
    entries: Vec<(String, String)>,
}

/// Result of decoding a property blob: the recovered mapping plus any
/// segments that could not be split into a key/value pair.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Decoded {
    /// Key/value pairs recovered from well-formed segments.
    pub set: PropertySet,
    /// Raw segments that lacked an `=` separator.
    pub skipped: Vec<String>,
}

impl Decoded {
    /// Returns true when every segment decoded cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

impl PropertySet {
    /// Creates an empty property set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Decodes a pipe-delimited blob into a property set.
    ///
    /// Each segment is split on the first `=`. Segments without one are
    /// collected into [`Decoded::skipped`]; empty segments are ignored. This
    /// never fails: malformed input yields a partial mapping, not an error.
    #[must_use]
    pub fn decode(raw: &str) -> Decoded {
        let mut decoded = Decoded::default();
        for segment in raw.split('|') {
            if segment.is_empty() {
                continue;
            }
            match segment.split_once('=') {
                Some((key, value)) => decoded.set.insert(key, value),
                None => decoded.skipped.push(segment.to_owned()),
            }
        }
        decoded
    }

    /// Encodes the set back into the wire's `k1=v1|k2=v2` form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Inserts or replaces a key, preserving the position of existing keys.
    pub fn insert(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_owned();
        } else {
            self.entries.push((key.to_owned(), value.to_owned()));
        }
    }

    /// Looks up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the set holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (key, value) in iter {
            set.insert(&key, &value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn decode_splits_on_pipe_and_first_equals() {
        let decoded = PropertySet::decode("address=10.0.0.5|state=DHCP_RESERVED|note=a=b");
        assert!(decoded.is_clean());
        assert_eq!(decoded.set.get("address"), Some("10.0.0.5"));
        assert_eq!(decoded.set.get("state"), Some("DHCP_RESERVED"));
        assert_eq!(decoded.set.get("note"), Some("a=b"));
    }

    #[test]
    fn decode_skips_malformed_segments_without_failing() {
        let decoded = PropertySet::decode("defaultView=1234|garbage|x=y");
        assert_eq!(decoded.skipped, vec![String::from("garbage")]);
        assert_eq!(decoded.set.get("defaultView"), Some("1234"));
        assert_eq!(decoded.set.get("x"), Some("y"));
    }

    #[rstest]
    #[case("")]
    #[case("|")]
    #[case("|||")]
    fn decode_of_empty_input_yields_empty_set(#[case] raw: &str) {
        let decoded = PropertySet::decode(raw);
        assert!(decoded.set.is_empty());
        assert!(decoded.is_clean());
    }

    #[test]
    fn encode_round_trips_clean_mappings() {
        let blob = "name=cf000001|view=2|ttl=300";
        let decoded = PropertySet::decode(blob);
        assert_eq!(decoded.set.encode(), blob);
        let again = PropertySet::decode(&decoded.set.encode());
        assert_eq!(again.set, decoded.set);
    }

    #[test]
    fn insert_replaces_existing_key_in_place() {
        let mut set = PropertySet::new();
        set.insert("a", "1");
        set.insert("b", "2");
        set.insert("a", "3");
        assert_eq!(set.encode(), "a=3|b=2");
        assert_eq!(set.len(), 2);
    }
}
