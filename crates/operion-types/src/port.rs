use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// A port identifier, `"<node_id>:<port_name>"`.
///
/// Ports are the addressable attachment points [`Connection`](crate::Connection)s
/// run between. Identity is structural: two `PortRef`s are equal iff both
/// fields match, regardless of how the string form was produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRef {
  pub node_id: String,
  pub port_name: String,
}

impl PortRef {
  pub fn new(node_id: impl Into<String>, port_name: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      port_name: port_name.into(),
    }
  }
}

impl fmt::Display for PortRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.node_id, self.port_name)
  }
}

impl TryFrom<String> for PortRef {
  type Error = Error;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.as_str().parse()
  }
}

impl From<PortRef> for String {
  fn from(value: PortRef) -> Self {
    value.to_string()
  }
}

impl std::str::FromStr for PortRef {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (node_id, port_name) = s
      .split_once(':')
      .ok_or_else(|| Error::Validation(format!("malformed port identifier: '{}'", s)))?;
    if node_id.is_empty() || port_name.is_empty() {
      return Err(Error::Validation(format!(
        "port identifier missing node or port name: '{}'",
        s
      )));
    }
    Ok(PortRef::new(node_id, port_name))
  }
}

/// Standard output port names. Nodes may declare richer sets (e.g. a
/// conditional node's `true`/`false`); the engine never interprets names —
/// routing is purely by edge match.
pub const PORT_SUCCESS: &str = "success";
pub const PORT_ERROR: &str = "error";

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_node_and_port() {
    let p: PortRef = "http_call:success".parse().unwrap();
    assert_eq!(p.node_id, "http_call");
    assert_eq!(p.port_name, "success");
    assert_eq!(p.to_string(), "http_call:success");
  }

  #[test]
  fn rejects_missing_separator() {
    assert!("http_call".parse::<PortRef>().is_err());
  }

  #[test]
  fn rejects_empty_parts() {
    assert!(":success".parse::<PortRef>().is_err());
    assert!("http_call:".parse::<PortRef>().is_err());
  }
}
