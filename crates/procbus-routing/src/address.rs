use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RoutingError;

/// A process on a node: the unit a connection is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address {
    pub node: u32,
    pub process: u32,
}

/// Ordered list of candidate targets; the first one is used for delivery.
pub type Addresses = Vec<Address>;

/// Reserved address (`0.0`). Never registered by a connection.
pub const INVALID_ADDRESS: Address = Address {
    node: 0,
    process: 0,
};

impl Address {
    pub const fn new(node: u32, process: u32) -> Self {
        Self { node, process }
    }

    pub fn is_valid(&self) -> bool {
        *self != INVALID_ADDRESS
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.process)
    }
}

impl FromStr for Address {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RoutingError::InvalidAddress(s.to_string());
        let (node, process) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            node: node.parse().map_err(|_| invalid())?,
            process: process.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        let addr = Address::new(3, 17);
        assert_eq!(addr.to_string(), "3.17");
        assert_eq!("3.17".parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "3", "3.", ".4", "a.b", "1.2.3", "-1.2", "4294967296.1"] {
            assert!(
                matches!(bad.parse::<Address>(), Err(RoutingError::InvalidAddress(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn serde_uses_dotted_string() {
        let json = serde_json::to_string(&vec![Address::new(0, 1), Address::new(2, 3)]).unwrap();
        assert_eq!(json, r#"["0.1","2.3"]"#);

        let back: Addresses = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Address::new(0, 1), Address::new(2, 3)]);

        assert!(serde_json::from_str::<Address>(r#""nope""#).is_err());
    }

    #[test]
    fn invalid_address_is_zero() {
        assert!(!INVALID_ADDRESS.is_valid());
        assert!(Address::new(0, 1).is_valid());
    }
}
