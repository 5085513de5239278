//! Mesh node identifiers as users write them

use std::fmt;
use std::str::FromStr;

use crate::error::PingerError;

/// Node number the firmware uses for broadcast
pub const BROADCAST_NODE_NUM: u32 = 0xFFFF_FFFF;

/// Numeric id of a single mesh node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn num(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(num: u32) -> Self {
        NodeId(num)
    }
}

impl FromStr for NodeId {
    type Err = PingerError;

    /// Accepts `!a1b2c3d4`, `0xa1b2c3d4`, bare hex such as `a1b2c3d4`, or a
    /// decimal node number. Broadcast addresses are rejected: the pinger only
    /// sends direct messages.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        let invalid = |reason: &str| PingerError::Config(format!("target_node {:?} {}", s, reason));

        if value.is_empty() {
            return Err(invalid("is empty"));
        }
        if ["broadcast", "all", "^all"].iter().any(|b| value.eq_ignore_ascii_case(b)) {
            return Err(invalid("is a broadcast address; a single node is required"));
        }

        let hex = value
            .strip_prefix('!')
            .or_else(|| value.strip_prefix("0x"))
            .or_else(|| value.strip_prefix("0X"));

        let num = match hex {
            Some(digits) => parse_hex(digits),
            None if value.bytes().all(|b| b.is_ascii_digit()) => value.parse::<u32>().ok(),
            None => parse_hex(value),
        }
        .ok_or_else(|| invalid("is not a node id (expected !hex, 0xhex or decimal)"))?;

        if num == BROADCAST_NODE_NUM {
            return Err(invalid("is a broadcast address; a single node is required"));
        }

        Ok(NodeId(num))
    }
}

fn parse_hex(digits: &str) -> Option<u32> {
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
