//! String-backed identifiers for membranes, ports, connections, rules and messages.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Membrane identity, unique within one P-system.
    MembraneId
);
string_id!(
    /// Port identity, unique within one P-system.
    PortId
);
string_id!(
    /// Directed port-to-port connection identity.
    ConnectionId
);
string_id!(
    /// Evolution rule identity.
    RuleId
);
string_id!(
    /// Message identity, unique per sending port.
    MessageId
);

impl PortId {
    /// Port id of one of the default ports provisioned for `membrane`.
    pub fn for_membrane(membrane: &MembraneId, suffix: &str) -> Self {
        Self(format!("{membrane}/{suffix}"))
    }
}

impl ConnectionId {
    /// Canonical id of the directed edge `source -> target`.
    pub fn between(source: &PortId, target: &PortId) -> Self {
        Self(format!("{source}->{target}"))
    }
}
