use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
    ($name:ident, $prefix:expr) => {
        branded_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

// Caller-supplied tenant key; never generated by the gateway.
branded_id!(SessionId);
branded_id!(ClientId, "client");

impl SessionId {
    /// Coerce a JSON value into a session id. Strings and numbers are
    /// accepted; empty strings, nulls and other shapes yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_owned())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_id_has_prefix() {
        let id = ClientId::new();
        assert!(id.as_str().starts_with("client_"), "got: {id}");
    }

    #[test]
    fn client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn session_id_preserves_raw_value() {
        let id = SessionId::from_raw("p1");
        assert_eq!(id.as_str(), "p1");
        assert_eq!(id.to_string(), "p1");
    }

    #[test]
    fn session_id_serializes_transparently() {
        let id = SessionId::from_raw("tenant-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tenant-42\"");
    }

    #[test]
    fn from_json_accepts_strings_and_numbers() {
        assert_eq!(SessionId::from_json(&json!("p1")), Some(SessionId::from_raw("p1")));
        assert_eq!(SessionId::from_json(&json!(17)), Some(SessionId::from_raw("17")));
    }

    #[test]
    fn from_json_rejects_empty_and_other_shapes() {
        assert_eq!(SessionId::from_json(&json!("")), None);
        assert_eq!(SessionId::from_json(&json!("   ")), None);
        assert_eq!(SessionId::from_json(&json!(null)), None);
        assert_eq!(SessionId::from_json(&json!({"id": 1})), None);
        assert_eq!(SessionId::from_json(&json!(true)), None);
    }
}
