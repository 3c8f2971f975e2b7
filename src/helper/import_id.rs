//! Composite import identifiers.

use crate::error::ProviderError;

/// Split `id` on commas into exactly `N` non-empty parts.
///
/// `format` names the expected parts for the error message, e.g.
/// `"id,tenant_id,app_install_id"`.
pub fn split_import_id<const N: usize>(id: &str, format: &str) -> Result<[String; N], ProviderError> {
    let unexpected = || {
        ProviderError::failed(
            "Unexpected Import Identifier",
            format!("Expected import identifier with format: {}. Got: {:?}", format, id),
        )
    };

    let parts: Vec<String> = id.split(',').map(str::to_string).collect();
    if parts.iter().any(String::is_empty) {
        return Err(unexpected());
    }
    parts.try_into().map_err(|_| unexpected())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: &str = "id,tenant_id,app_install_id";

    #[test]
    fn test_split_exact_arity() {
        let [id, tenant, install] = split_import_id::<3>("dep-1,ten-1,inst-1", FORMAT).unwrap();
        assert_eq!(id, "dep-1");
        assert_eq!(tenant, "ten-1");
        assert_eq!(install, "inst-1");
    }

    #[test]
    fn test_wrong_arity() {
        assert!(split_import_id::<3>("dep-1,ten-1", FORMAT).is_err());
        assert!(split_import_id::<3>("a,b,c,d", FORMAT).is_err());
        assert!(split_import_id::<1>("a", "id").is_ok());
    }

    #[test]
    fn test_empty_part() {
        let err = split_import_id::<3>("dep-1,,inst-1", FORMAT).unwrap_err();
        let diagnostics = err.into_diagnostics();
        assert_eq!(diagnostics[0].summary, "Unexpected Import Identifier");
        assert_eq!(
            diagnostics[0].detail.as_deref(),
            Some("Expected import identifier with format: id,tenant_id,app_install_id. Got: \"dep-1,,inst-1\"")
        );
        assert!(split_import_id::<1>("", "id").is_err());
    }
}
