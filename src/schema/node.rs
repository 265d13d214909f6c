//! Fleet node records
//!
//! A node is identified by its address; status and heartbeat mutate over time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EnforcerError, Result};

/// Node address: `0x` followed by 40 hex digits, stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalise an address
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| EnforcerError::InvalidAddress { value: value.into() })?;

        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EnforcerError::InvalidAddress { value: value.into() });
        }

        Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = EnforcerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = EnforcerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Node lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeStatus {
    /// Registered on chain, no heartbeat yet
    Registered,
    /// Heartbeat within the liveness window
    Online,
    /// Heartbeat older than the liveness window
    Offline,
    /// Exit requested
    Exiting,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 4] = [
        NodeStatus::Registered,
        NodeStatus::Online,
        NodeStatus::Offline,
        NodeStatus::Exiting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Registered => "registered",
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Exiting => "exiting",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = EnforcerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "registered" => Ok(NodeStatus::Registered),
            "online" => Ok(NodeStatus::Online),
            "offline" => Ok(NodeStatus::Offline),
            "exiting" | "exited" => Ok(NodeStatus::Exiting),
            _ => Err(EnforcerError::InvalidNodeStatus { value: s.into() }),
        }
    }
}

impl TryFrom<String> for NodeStatus {
    type Error = EnforcerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NodeStatus> for String {
    fn from(status: NodeStatus) -> Self {
        status.as_str().into()
    }
}

/// A registered fleet member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub address: Address,
    pub endpoint: String,
    #[serde(default)]
    pub access_token: String,
    /// Opaque avatar metadata
    #[serde(default)]
    pub avatar: Option<serde_json::Value>,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub hide_tax_rate: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalised() {
        let a = Address::parse("0xABCDEF0123456789abcdef0123456789ABCDEF01").unwrap();
        assert_eq!(a.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!(Address::parse("abcdef").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_status_strings() {
        for status in NodeStatus::ALL {
            assert_eq!(status.as_str().parse::<NodeStatus>().unwrap(), status);
        }
        assert_eq!("exited".parse::<NodeStatus>().unwrap(), NodeStatus::Exiting);
        assert!("gone".parse::<NodeStatus>().is_err());

        assert_eq!(serde_json::to_string(&NodeStatus::Exiting).unwrap(), "\"exiting\"");
        assert_eq!(
            serde_json::from_str::<NodeStatus>("\"exiting\"").unwrap(),
            NodeStatus::Exiting
        );
    }
}
