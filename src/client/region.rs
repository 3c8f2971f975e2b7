//! Snyk regions and their base URLs.

use serde::{Deserialize, Serialize};

/// Region used when neither config nor environment names one.
pub const DEFAULT_REGION: &str = "SNYK-US-01";

/// Base URLs of one Snyk deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Short name, e.g. `SNYK-EU-01`, or a user chosen identifier for custom regions.
    pub name: String,
    /// Web application base URL.
    pub app_base_url: String,
    /// REST API base URL.
    pub rest_base_url: String,
    /// V1 API base URL.
    pub v1_base_url: String,
}

impl Region {
    /// Build a region from its name and base URLs.
    pub fn new(
        name: impl Into<String>,
        app_base_url: impl Into<String>,
        rest_base_url: impl Into<String>,
        v1_base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            app_base_url: app_base_url.into(),
            rest_base_url: rest_base_url.into(),
            v1_base_url: v1_base_url.into(),
        }
    }

    fn hosted(name: &str, app_host: &str, api_host: &str) -> Self {
        Self::new(
            name,
            format!("https://{}", app_host),
            format!("https://{}/rest", api_host),
            format!("https://{}/v1", api_host),
        )
    }
}

/// All regions operated by Snyk.
pub fn predefined_regions() -> Vec<Region> {
    vec![
        Region::hosted("SNYK-US-01", "app.snyk.io", "api.snyk.io"),
        Region::hosted("SNYK-US-02", "app.us.snyk.io", "api.us.snyk.io"),
        Region::hosted("SNYK-EU-01", "app.eu.snyk.io", "api.eu.snyk.io"),
        Region::hosted("SNYK-AU-01", "app.au.snyk.io", "api.au.snyk.io"),
        Region::hosted("SNYK-GOV-01", "app.snykgov.io", "api.snykgov.io"),
    ]
}

/// Look up a predefined region by name.
pub fn region_by_name(name: &str) -> Option<Region> {
    predefined_regions().into_iter().find(|r| r.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_region_is_predefined() {
        let region = region_by_name(DEFAULT_REGION).unwrap();
        assert_eq!(region.app_base_url, "https://app.snyk.io");
        assert_eq!(region.rest_base_url, "https://api.snyk.io/rest");
        assert_eq!(region.v1_base_url, "https://api.snyk.io/v1");
    }

    #[test]
    fn test_region_lookup() {
        assert_eq!(
            region_by_name("SNYK-EU-01").unwrap().rest_base_url,
            "https://api.eu.snyk.io/rest"
        );
        assert_eq!(
            region_by_name("SNYK-GOV-01").unwrap().app_base_url,
            "https://app.snykgov.io"
        );
        assert!(region_by_name("SNYK-MARS-01").is_none());
        assert_eq!(predefined_regions().len(), 5);
    }
}
