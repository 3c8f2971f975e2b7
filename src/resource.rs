//! Resource and data source handlers.
//!
//! The provider keeps one boxed handler per type name and dispatches every
//! call to it together with the configured client. Handlers work on typed
//! models decoded from the JSON payloads with [`decode`] and written back
//! with [`encode`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::client::SnykApi;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};

/// A managed object with a full lifecycle.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name, e.g. `snyk_organization`.
    fn type_name(&self) -> &'static str;

    /// Schema of the resource.
    fn schema(&self) -> Schema;

    /// Checks that go beyond the schema. Runs after schema validation.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create the object from the planned state and return the new state.
    async fn create(&self, client: &dyn SnykApi, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh the state. `None` removes the resource from state.
    async fn read(&self, client: &dyn SnykApi, state: Value) -> Result<Option<Value>, ProviderError>;

    /// Apply an in-place update.
    async fn update(&self, client: &dyn SnykApi, prior: Value, planned: Value) -> Result<Value, ProviderError>;

    /// Delete the object.
    async fn delete(&self, client: &dyn SnykApi, state: Value) -> Result<(), ProviderError>;

    /// Turn an import identifier into a partial state. The host reads the
    /// resource afterwards.
    fn import(&self, id: &str) -> Result<Value, ProviderError> {
        Ok(json!({ "id": id }))
    }
}

/// A read-only lookup.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Type name, e.g. `snyk_user`.
    fn type_name(&self) -> &'static str;

    /// Schema of the data source.
    fn schema(&self) -> Schema;

    /// Checks that go beyond the schema.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Look the object up and return the resulting state.
    async fn read(&self, client: &dyn SnykApi, config: Value) -> Result<Value, ProviderError>;
}

/// Decode a JSON payload into a model.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    Ok(serde_json::from_value(value)?)
}

/// Encode a model into a JSON payload.
pub fn encode<T: Serialize>(model: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(model)?)
}

/// The value of an optional string, treating empty as unset.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// The string at `key` of a JSON object, treating null and empty as unset.
pub fn string_attr<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Model {
        id: Option<String>,
        name: String,
    }

    #[test]
    fn test_decode_encode() {
        let model: Model = decode(json!({"id": null, "name": "x", "extra": 1})).unwrap();
        assert_eq!(model, Model { id: None, name: "x".to_string() });
        assert_eq!(encode(&model).unwrap(), json!({"id": null, "name": "x"}));
    }

    #[test]
    fn test_decode_error() {
        let err = decode::<Model>(json!({"id": "a"})).unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(&Some("a".to_string())), Some("a"));
        assert_eq!(non_empty(&Some(String::new())), None);
        assert_eq!(non_empty(&None), None);

        let value = json!({"a": "x", "b": "", "c": null});
        assert_eq!(string_attr(&value, "a"), Some("x"));
        assert_eq!(string_attr(&value, "b"), None);
        assert_eq!(string_attr(&value, "c"), None);
        assert_eq!(string_attr(&value, "d"), None);
    }
}
