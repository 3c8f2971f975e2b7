//! Plain Rust counterparts of the plugin protocol messages, plus the
//! constants of the plugin launch handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Dotted path of the attribute.
    pub path: String,
    /// Value before the change, `None` when the attribute is being set.
    pub before: Option<Value>,
    /// Value after the change, `None` when the attribute is being cleared.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// An attribute that had no value before.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// An attribute whose value goes away.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// An attribute whose value changes.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

fn decode_optional(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(bytes).ok()
    }
}

fn encode_optional(value: Option<Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(&v).ok())
        .unwrap_or_default()
}

impl From<crate::generated::AttributeChange> for AttributeChange {
    fn from(proto: crate::generated::AttributeChange) -> Self {
        Self {
            path: proto.path,
            before: decode_optional(&proto.before),
            after: decode_optional(&proto.after),
        }
    }
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: encode_optional(change.before),
            after: encode_optional(change.after),
        }
    }
}

/// The result of planning a resource change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state, `Value::Null` for a destroy.
    pub planned_state: Value,
    /// Attribute changes in stable path order.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource has to be destroyed and created again.
    pub requires_replace: bool,
}

impl PlanResult {
    /// A plan that leaves the resource untouched.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// A plan with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether the plan changes anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// A resource produced by an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type name, e.g. `snyk_organization`.
    pub resource_type: String,
    /// Partial state; the host follows up with a read.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names.
    pub resources: Vec<String>,
    /// Data source type names.
    pub data_sources: Vec<String>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// Server capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Whether the provider plans destroy operations itself.
    pub plan_destroy: bool,
}

/// Core plugin protocol version, first field of the handshake line.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Application protocol version, second field of the handshake line.
pub const APP_PROTOCOL_VERSION: u32 = 1;

/// Environment variable the host sets when it launches the plugin.
pub const MAGIC_COOKIE_KEY: &str = "TF_PLUGIN_MAGIC_COOKIE";

/// Expected value of [`MAGIC_COOKIE_KEY`].
pub const MAGIC_COOKIE_VALUE: &str =
    "d602bf8f470bc67ca7faa0386276bbdd4330efaf76d1a219cb4d6991ca9872b2";

/// Environment variable carrying reattach information in debug mode.
pub const REATTACH_ENV: &str = "TF_REATTACH_PROVIDERS";

/// Registry address of this provider.
pub const PROVIDER_ADDRESS: &str = "registry.terraform.io/pavel-snyk/snyk";

/// Format the handshake line written to stdout once the server listens.
pub fn handshake_line(addr: std::net::SocketAddr) -> String {
    format!(
        "{}|{}|tcp|{}|grpc",
        CORE_PROTOCOL_VERSION, APP_PROTOCOL_VERSION, addr
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("name", json!("test"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("test")));

        let removed = AttributeChange::removed("slug", json!("old"));
        assert_eq!(removed.before, Some(json!("old")));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("name", json!("a"), json!("b"));
        assert_eq!(modified.before, Some(json!("a")));
        assert_eq!(modified.after, Some(json!("b")));
    }

    #[test]
    fn test_attribute_change_to_proto_and_back() {
        let change = AttributeChange::added("group_id", json!("g-1"));

        let proto: crate::generated::AttributeChange = change.clone().into();
        assert_eq!(proto.path, "group_id");
        assert!(proto.before.is_empty());

        let back: AttributeChange = proto.into();
        assert_eq!(back, change);
    }

    #[test]
    fn test_plan_result() {
        let no_change = PlanResult::no_change(json!({"id": "123"}));
        assert!(!no_change.has_changes());
        assert!(!no_change.requires_replace);

        let replace = PlanResult::with_changes(
            json!({"name": "new"}),
            vec![AttributeChange::modified("name", json!("old"), json!("new"))],
            true,
        );
        assert!(replace.has_changes());
        assert!(replace.requires_replace);
    }

    #[test]
    fn test_imported_resource() {
        let imported = ImportedResource::new("snyk_organization", json!({"id": "org-1"}));
        assert_eq!(imported.resource_type, "snyk_organization");
        assert_eq!(imported.state["id"], "org-1");
    }

    #[test]
    fn test_handshake_line() {
        let addr: std::net::SocketAddr = "127.0.0.1:4321".parse().unwrap();
        assert_eq!(handshake_line(addr), "1|1|tcp|127.0.0.1:4321|grpc");
    }
}
