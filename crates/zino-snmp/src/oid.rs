// ── Object identifiers ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SnmpError;

/// A numeric SNMP object identifier.
///
/// Ordering is lexicographic over the sub-identifier sequence, which is
/// exactly the MIB tree walk order GET-NEXT follows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(subids: Vec<u32>) -> Self {
        Self(subids)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` lives in the subtree rooted at `prefix`.
    pub fn starts_with(&self, prefix: &[u32]) -> bool {
        self.0.len() >= prefix.len() && self.0[..prefix.len()] == *prefix
    }

    /// The sub-identifiers below `prefix`, or `None` if outside that subtree.
    pub fn strip_prefix(&self, prefix: &[u32]) -> Option<&[u32]> {
        if self.starts_with(prefix) {
            Some(&self.0[prefix.len()..])
        } else {
            None
        }
    }

    /// Append one sub-identifier, e.g. a table index.
    pub fn child(&self, subid: u32) -> Self {
        let mut subids = self.0.clone();
        subids.push(subid);
        Self(subids)
    }

    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }
}

impl From<&[u32]> for Oid {
    fn from(subids: &[u32]) -> Self {
        Self(subids.to_vec())
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(subids: [u32; N]) -> Self {
        Self(subids.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for subid in &self.0 {
            if first {
                write!(f, "{subid}")?;
                first = false;
            } else {
                write!(f, ".{subid}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    /// Parse a dotted-decimal OID. A leading dot is accepted and ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Err(SnmpError::Decode("empty OID".into()));
        }
        let subids = trimmed
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| SnmpError::Decode(format!("invalid OID component '{part}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(subids))
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_and_display_round_trip() {
        let oid: Oid = "1.3.6.1.2.1.1.3.0".parse().unwrap();
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.3.0");
    }

    #[test]
    fn leading_dot_is_accepted() {
        let oid: Oid = ".1.3.6".parse().unwrap();
        assert_eq!(oid.as_slice(), &[1, 3, 6]);
    }

    #[test]
    fn rejects_garbage() {
        assert!("1.3.x".parse::<Oid>().is_err());
        assert!("".parse::<Oid>().is_err());
    }

    #[test]
    fn ordering_matches_tree_walk() {
        let a: Oid = "1.3.6.1".parse().unwrap();
        let b: Oid = "1.3.6.1.2".parse().unwrap();
        let c: Oid = "1.3.6.2".parse().unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn prefix_operations() {
        let oid: Oid = "1.3.6.1.2.1.2.2.1.8.150".parse().unwrap();
        let column = [1u32, 3, 6, 1, 2, 1, 2, 2, 1, 8];
        assert!(oid.starts_with(&column));
        assert_eq!(oid.strip_prefix(&column), Some(&[150u32][..]));
        assert_eq!(oid.strip_prefix(&[1u32, 4]), None);
    }
}
