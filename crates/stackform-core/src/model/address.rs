// ── Addresses ──
//
// Every node in a stack is named by an address: `aws_lb.shared` for a
// managed resource, `data.aws_subnets.private` for a lookup, and
// `local.gpu_subnet_ids` for a derived value. Addresses serialize as their
// display string so they can key JSON maps in the state file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::kind::{LookupKind, ResourceKind};

/// Canonical name of a stack node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    Resource { kind: ResourceKind, name: String },
    Data { kind: LookupKind, name: String },
    Local(String),
}

impl Address {
    pub fn resource(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::Resource {
            kind,
            name: name.into(),
        }
    }

    pub fn data(kind: LookupKind, name: impl Into<String>) -> Self {
        Self::Data {
            kind,
            name: name.into(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Resource { name, .. } | Self::Data { name, .. } | Self::Local(name) => name,
        }
    }

    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            Self::Resource { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource { kind, name } => write!(f, "{kind}.{name}"),
            Self::Data { kind, name } => write!(f, "data.{kind}.{name}"),
            Self::Local(name) => write!(f, "local.{name}"),
        }
    }
}

/// Error parsing an address string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address '{0}': expected <kind>.<name>, data.<kind>.<name>, or local.<name>")]
pub struct AddressParseError(pub String);

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_owned());
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            ["local", name] if valid_name(name) => Ok(Self::local(*name)),
            ["data", kind, name] if valid_name(name) => {
                let kind = kind.parse::<LookupKind>().map_err(|_| err())?;
                Ok(Self::data(kind, *name))
            }
            [kind, name] if valid_name(name) => {
                let kind = kind.parse::<ResourceKind>().map_err(|_| err())?;
                Ok(Self::resource(kind, *name))
            }
            _ => Err(err()),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.to_string()
    }
}
