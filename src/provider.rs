//! The `snyk` provider.
//!
//! [`SnykProvider`] owns the registration table of resources and data
//! sources and the API client built by `Configure`. Every other call is
//! dispatched by type name to its handler together with that client.
//!
//! # Configuration
//!
//! ```hcl
//! provider "snyk" {
//!   token = "..."             # or SNYK_TOKEN
//!   region {
//!     name          = "SNYK-EU-01" # or SNYK_REGION
//!     app_base_url  = "..."        # custom regions only, or SNYK_APP_BASE_URL
//!     rest_base_url = "..."        # or SNYK_REST_BASE_URL
//!     v1_base_url   = "..."        # or SNYK_V1_BASE_URL
//!   }
//! }
//! ```
//!
//! Explicitly configured values win over the environment.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::client::{predefined_regions, region_by_name, Region, SnykApi, SnykClient, DEFAULT_REGION};
use crate::data_sources;
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::resource::{decode, DataSource, Resource};
use crate::resources;
use crate::schema::{has_errors, Attribute, Block, Diagnostic, NestedBlock, ProviderSchema, Schema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

/// Provider type name.
pub const PROVIDER_NAME: &str = "snyk";

const REGISTRY_URL: &str = "https://registry.terraform.io/providers/pavel-snyk/snyk";

const TOKEN_DETAIL: &str =
    r#"The Snyk API token must be provided via the "token" attribute or the "SNYK_TOKEN" environment variable."#;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Default, Deserialize)]
struct ProviderModel {
    region: Option<RegionModel>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RegionModel {
    app_base_url: Option<String>,
    name: Option<String>,
    rest_base_url: Option<String>,
    v1_base_url: Option<String>,
}

/// Region settings after merging environment and configuration.
#[derive(Debug, Default, PartialEq, Eq)]
struct RegionSettings {
    name: String,
    app_base_url: String,
    rest_base_url: String,
    v1_base_url: String,
}

impl RegionSettings {
    fn is_custom(&self) -> bool {
        !self.app_base_url.is_empty() || !self.rest_base_url.is_empty() || !self.v1_base_url.is_empty()
    }

    fn check(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if !self.is_custom() {
            return diagnostics;
        }

        let incomplete = |detail: &str| {
            Diagnostic::error("Incomplete Custom Region Configuration")
                .with_detail(detail)
                .with_attribute("region")
        };
        if self.name.is_empty() {
            diagnostics.push(incomplete(
                r#"When using custom region URLs, the "name" attribute must be set (either in HCL or via "SNYK_REGION" environment variable)."#,
            ));
        }
        if self.app_base_url.is_empty() || self.rest_base_url.is_empty() || self.v1_base_url.is_empty() {
            diagnostics.push(incomplete(
                r#"For a custom region, "app_base_url", "rest_base_url", and "v1_base_url" must all be set (either in HCL or via their respective "SNYK_*_BASE_URL" environment variables)."#,
            ));
        }
        diagnostics
    }

    fn region(&self) -> Result<Region, Diagnostic> {
        if self.is_custom() {
            return Ok(Region::new(
                self.name.clone(),
                self.app_base_url.clone(),
                self.rest_base_url.clone(),
                self.v1_base_url.clone(),
            ));
        }

        let name = if self.name.is_empty() {
            DEFAULT_REGION
        } else {
            self.name.as_str()
        };
        region_by_name(name).ok_or_else(|| {
            let known: Vec<String> = predefined_regions().into_iter().map(|r| r.name).collect();
            Diagnostic::error("Unknown Snyk region")
                .with_detail(format!(
                    "The region {:?} is not a predefined Snyk region. Use one of [{}] or configure all base URLs of a custom region.",
                    name,
                    known.join(", ")
                ))
                .with_attribute("region")
        })
    }
}

/// Provider for the Snyk API.
pub struct SnykProvider {
    version: String,
    env: EnvLookup,
    client: RwLock<Option<Arc<dyn SnykApi>>>,
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Box<dyn DataSource>>,
}

impl std::fmt::Debug for SnykProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnykProvider")
            .field("version", &self.version)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SnykProvider {
    /// Create the provider reading settings from the process environment.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            env: Arc::new(|key: &str| std::env::var(key).ok()),
            client: RwLock::new(None),
            resources: resources::all().into_iter().map(|r| (r.type_name(), r)).collect(),
            data_sources: data_sources::all()
                .into_iter()
                .map(|d| (d.type_name(), d))
                .collect(),
        }
    }

    /// Replace the environment lookup used for `SNYK_*` variables.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Start with an already configured client. `Configure` still replaces it.
    pub fn with_client(self, client: Arc<dyn SnykApi>) -> Self {
        Self {
            client: RwLock::new(Some(client)),
            ..self
        }
    }

    /// Register a resource, replacing any handler with the same type name.
    pub fn with_resource(mut self, resource: Box<dyn Resource>) -> Self {
        self.resources.insert(resource.type_name(), resource);
        self
    }

    /// Provider version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// User agent sent with every API request.
    pub fn user_agent(&self) -> String {
        format!("terraform-provider-{}/{} (+{})", PROVIDER_NAME, self.version, REGISTRY_URL)
    }

    fn env_var(&self, key: &str) -> String {
        (self.env)(key).unwrap_or_default()
    }

    fn region_settings(&self, config: &ProviderModel) -> RegionSettings {
        let mut settings = RegionSettings {
            name: self.env_var("SNYK_REGION"),
            app_base_url: self.env_var("SNYK_APP_BASE_URL"),
            rest_base_url: self.env_var("SNYK_REST_BASE_URL"),
            v1_base_url: self.env_var("SNYK_V1_BASE_URL"),
        };
        if let Some(region) = &config.region {
            let overrides = [
                (&region.name, &mut settings.name),
                (&region.app_base_url, &mut settings.app_base_url),
                (&region.rest_base_url, &mut settings.rest_base_url),
                (&region.v1_base_url, &mut settings.v1_base_url),
            ];
            for (configured, target) in overrides {
                if let Some(value) = configured {
                    *target = value.clone();
                }
            }
        }
        settings
    }

    fn token(&self, config: &ProviderModel) -> String {
        match &config.token {
            Some(token) => token.clone(),
            None => self.env_var("SNYK_TOKEN"),
        }
    }

    async fn client(&self) -> Result<Arc<dyn SnykApi>, ProviderError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(ProviderError::Unconfigured)
    }

    fn resource(&self, type_name: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    fn data_source(&self, type_name: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .get(type_name)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }
}

fn provider_schema() -> Schema {
    let region_url = |description: &str| Attribute::optional_string().with_description(description);

    Schema::v0()
        .with_attribute(
            "token",
            Attribute::optional_string()
                .with_description("This Snyk API token. It can also be sourced from the `SNYK_TOKEN` environment variable.")
                .sensitive(),
        )
        .with_block(
            "region",
            NestedBlock::single(
                Block::new()
                    .with_description(format!(
                        "Configuration for the Snyk Region. If not provided, the provider will use the `SNYK_REGION` \
                         environment variable, or default to **{}**. Provide only `name` to use a predefined region, \
                         or all attributes to use a custom region.",
                        DEFAULT_REGION
                    ))
                    .with_attribute(
                        "name",
                        Attribute::optional_string().with_description(
                            "The name of Snyk region. For predefined regions, this is the short name (e.g. \
                             `SNYK-EU-01`). For custom regions, this is a user-defined identifier.",
                        ),
                    )
                    .with_attribute(
                        "app_base_url",
                        region_url("The application base URL for a custom region."),
                    )
                    .with_attribute("rest_base_url", region_url("The REST API base URL for a custom region."))
                    .with_attribute("v1_base_url", region_url("The V1 API base URL for a custom region.")),
            ),
        )
}

fn provider_config(config: Value) -> Result<ProviderModel, ProviderError> {
    if config.is_null() {
        return Ok(ProviderModel::default());
    }
    decode(config)
}

fn missing_token() -> Diagnostic {
    Diagnostic::error("Invalid provider config")
        .with_detail(TOKEN_DETAIL)
        .with_attribute("token")
}

#[async_trait]
impl ProviderService for SnykProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(provider_schema());
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(*name, data_source.schema());
        }
        schema
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validation::validate(&provider_schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let config = provider_config(config)?;
        diagnostics.extend(self.region_settings(&config).check());
        if config.token.as_deref().unwrap_or_default().is_empty() && self.env_var("SNYK_TOKEN").is_empty() {
            diagnostics.push(missing_token());
        }
        Ok(diagnostics)
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = provider_config(config)?;
        let settings = self.region_settings(&config);

        let mut diagnostics = Vec::new();
        let region = match settings.region() {
            Ok(region) => Some(region),
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                None
            },
        };
        let token = self.token(&config);
        if token.is_empty() {
            diagnostics.push(missing_token());
        }
        let Some(region) = region.filter(|_| diagnostics.is_empty()) else {
            return Ok(diagnostics);
        };

        info!(
            region_name = %region.name,
            app_base_url = %region.app_base_url,
            rest_base_url = %region.rest_base_url,
            v1_base_url = %region.v1_base_url,
            "Configuring Snyk API client"
        );
        let client = SnykClient::builder(token)
            .with_region(&region)
            .with_user_agent(self.user_agent())
            .build()
            .map_err(|e| {
                ProviderError::failed(
                    "Unable to create Snyk API client",
                    format!(
                        "An unexpected error occurred when creating the Snyk API client. Please contact the plugin \
                         developers.\n\nSnyk Client error:{}",
                        e
                    ),
                )
            })?;

        *self.client.write().await = Some(Arc::new(client));
        Ok(diagnostics)
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let mut diagnostics = validation::validate(&resource.schema(), &config);
        diagnostics.extend(resource.validate(&config));
        Ok(diagnostics)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let proposed = Some(&proposed_state).filter(|v| !v.is_null());
        Ok(plan_resource(&resource.schema(), prior_state.as_ref(), proposed))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        debug!(resource_type = %resource_type, "Creating resource");
        resource.create(client.as_ref(), planned_state).await
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        debug!(resource_type = %resource_type, "Reading resource");
        let state = resource.read(client.as_ref(), current_state).await?;
        if state.is_none() {
            info!(resource_type = %resource_type, "Resource no longer exists, removing from state");
        }
        Ok(state)
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        debug!(resource_type = %resource_type, "Updating resource");
        resource.update(client.as_ref(), prior_state, planned_state).await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        debug!(resource_type = %resource_type, "Deleting resource");
        resource.delete(client.as_ref(), current_state).await
    }

    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let state = resource.import(id)?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let data_source = self.data_source(data_source_type)?;
        let mut diagnostics = validation::validate(&data_source.schema(), &config);
        diagnostics.extend(data_source.validate(&config));
        Ok(diagnostics)
    }

    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        let data_source = self.data_source(data_source_type)?;
        let client = self.client().await?;
        debug!(data_source_type = %data_source_type, "Reading data source");
        data_source.read(client.as_ref(), config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::organization::{TENANT_ID_NOT_POPULATED, TENANT_ID_POPULATED};
    use crate::helper::StateChangeConf;
    use crate::resources::OrganizationResource;
    use crate::testing::{MemorySnykApi, ProviderTester};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    fn provider(vars: &[(&str, &str)]) -> SnykProvider {
        SnykProvider::new("1.2.3").with_env(env(vars))
    }

    fn has_detail(diagnostics: &[Diagnostic], substring: &str) -> bool {
        diagnostics
            .iter()
            .any(|d| d.detail.as_deref().is_some_and(|detail| detail.contains(substring)))
    }

    fn with_memory_api() -> (ProviderTester<SnykProvider>, Arc<MemorySnykApi>) {
        let api = Arc::new(MemorySnykApi::new());
        let fast_tenant_wait = StateChangeConf::new(
            &[TENANT_ID_NOT_POPULATED],
            &[TENANT_ID_POPULATED],
            Duration::from_secs(2),
        );
        let provider = provider(&[])
            .with_client(api.clone())
            .with_resource(Box::new(OrganizationResource::default().with_tenant_wait(fast_tenant_wait)));
        (ProviderTester::new(provider), api)
    }

    #[test]
    fn test_registration_table() {
        let tester = ProviderTester::new(provider(&[]));
        assert_eq!(
            tester.resource_types(),
            vec![
                "snyk_app_install",
                "snyk_broker_deployment",
                "snyk_broker_deployment_credential",
                "snyk_integration",
                "snyk_organization",
            ]
        );
        assert_eq!(
            tester.data_source_types(),
            vec!["snyk_app_install", "snyk_organization", "snyk_project", "snyk_user"]
        );
    }

    #[test]
    fn test_user_agent() {
        assert_eq!(
            provider(&[]).user_agent(),
            "terraform-provider-snyk/1.2.3 (+https://registry.terraform.io/providers/pavel-snyk/snyk)"
        );
    }

    #[tokio::test]
    async fn test_validate_requires_token() {
        let tester = ProviderTester::new(provider(&[]));
        let err = tester.validate_provider_config(json!({})).await.unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Invalid provider config");
        assert_eq!(diagnostics[0].detail.as_deref(), Some(TOKEN_DETAIL));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("token"));

        let tester = ProviderTester::new(provider(&[("SNYK_TOKEN", "from-env")]));
        tester.validate_provider_config(json!({})).await.unwrap();
        tester
            .validate_provider_config(json!({"token": "abc"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_validate_incomplete_custom_region() {
        let tester = ProviderTester::new(provider(&[("SNYK_TOKEN", "t")]));

        let err = tester
            .validate_provider_config(json!({"region": {"rest_base_url": "https://api.example/rest"}}))
            .await
            .unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics
            .iter()
            .all(|d| d.summary == "Incomplete Custom Region Configuration"));
        assert!(has_detail(&diagnostics, r#"the "name" attribute must be set"#));
    }

    #[tokio::test]
    async fn test_validate_custom_region_from_env() {
        let tester = ProviderTester::new(provider(&[
            ("SNYK_TOKEN", "t"),
            ("SNYK_REGION", "private"),
            ("SNYK_APP_BASE_URL", "https://app.example"),
            ("SNYK_REST_BASE_URL", "https://api.example/rest"),
        ]));
        let err = tester.validate_provider_config(json!({})).await.unwrap_err();
        assert!(has_detail(&err.diagnostics(), "must all be set"));

        tester
            .validate_provider_config(json!({"region": {"v1_base_url": "https://api.example/v1"}}))
            .await
            .unwrap();
    }

    #[test]
    fn test_region_resolution() {
        let p = provider(&[("SNYK_REGION", "SNYK-EU-01")]);
        let settings = p.region_settings(&ProviderModel::default());
        assert_eq!(settings.region().unwrap(), region_by_name("SNYK-EU-01").unwrap());

        // config wins over the environment
        let config: ProviderModel = decode(json!({"region": {"name": "SNYK-AU-01"}})).unwrap();
        assert_eq!(p.region_settings(&config).region().unwrap().name, "SNYK-AU-01");

        let settings = provider(&[]).region_settings(&ProviderModel::default());
        assert_eq!(settings.region().unwrap().name, DEFAULT_REGION);

        let custom: ProviderModel = decode(json!({"region": {
            "name": "private",
            "app_base_url": "https://app.example",
            "rest_base_url": "https://api.example/rest",
            "v1_base_url": "https://api.example/v1",
        }}))
        .unwrap();
        let region = provider(&[]).region_settings(&custom).region().unwrap();
        assert_eq!(region.rest_base_url, "https://api.example/rest");
    }

    #[tokio::test]
    async fn test_configure() {
        let tester = ProviderTester::new(provider(&[("SNYK_TOKEN", "env-token")]));
        tester.configure(json!({"token": null})).await.unwrap();
        assert!(tester.provider().client().await.is_ok());

        let tester = ProviderTester::new(provider(&[]));
        let err = tester
            .configure(json!({"region": {"name": "SNYK-MARS-01"}}))
            .await
            .unwrap_err();
        let summaries: Vec<String> = err.diagnostics().into_iter().map(|d| d.summary).collect();
        assert_eq!(summaries, vec!["Unknown Snyk region", "Invalid provider config"]);
        assert!(tester.provider().client().await.is_err());
    }

    #[tokio::test]
    async fn test_calls_before_configure() {
        let tester = ProviderTester::new(provider(&[]));
        let err = tester
            .read_data_source("snyk_user", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unconfigured));
        assert_eq!(err.into_diagnostics()[0].summary, "Unconfigured Snyk client");
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let (tester, _) = with_memory_api();
        let err = tester.create("snyk_widget", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(name) if name == "snyk_widget"));
    }

    #[tokio::test]
    async fn test_organization_lifecycle() {
        let (tester, api) = with_memory_api();
        api.insert_group("grp-1", "Acme", Some("ten-1"));

        let state = tester
            .lifecycle_create("snyk_organization", json!({"name": "Platform", "group_id": "grp-1"}))
            .await
            .unwrap();
        assert_eq!(state["tenant_id"], "ten-1");

        let state = tester
            .lifecycle_update("snyk_organization", state, json!({"name": "Platform 2", "group_id": "grp-1"}))
            .await
            .unwrap();
        assert_eq!(state["name"], "Platform 2");

        tester
            .lifecycle_delete("snyk_organization", state.clone())
            .await
            .unwrap();
        assert!(tester.read("snyk_organization", state).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_integration_validation_runs_resource_checks() {
        let (tester, _) = with_memory_api();
        let err = tester
            .validate_resource_config("snyk_integration", json!({"organization_id": "org-1", "type": "github"}))
            .await
            .unwrap_err();
        assert!(has_detail(
            &err.diagnostics(),
            "token must be defined and not empty for 'github' integration"
        ));
    }

    #[tokio::test]
    async fn test_import_broker_deployment() {
        let (tester, _) = with_memory_api();
        let imported = tester
            .import_resource("snyk_broker_deployment", "dep-1,ten-1,inst-1")
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, "snyk_broker_deployment");
        assert_eq!(imported[0].state["app_install_id"], "inst-1");

        let err = tester
            .import_resource("snyk_broker_deployment", "dep-1")
            .await
            .unwrap_err();
        assert_eq!(err.into_diagnostics()[0].summary, "Unexpected Import Identifier");
    }

    #[tokio::test]
    async fn test_data_source_through_provider() {
        let (tester, api) = with_memory_api();
        let project = api.insert_project("org-1", "web");

        tester
            .validate_data_source_config("snyk_project", json!({"name": "web", "organization_id": "org-1"}))
            .await
            .unwrap();
        let state = tester
            .read_data_source("snyk_project", json!({"name": "web", "organization_id": "org-1"}))
            .await
            .unwrap();
        assert_eq!(state["id"], project.id.as_str());
    }
}
