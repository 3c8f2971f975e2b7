//! `snyk_integration`
//!
//! Integrations are addressed by organization and type: an organization has at
//! most one integration per type, and creating one for a type that already
//! exists takes over the existing integration by replacing its credentials.
//! Deleting only removes the stored credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::client::{IntegrationCredentials, IntegrationRequest, IntegrationSettings, SnykApi};
use crate::error::ProviderError;
use crate::helper::split_import_id;
use crate::resource::{decode, encode, string_attr, Resource};
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema, Validator,
};

/// Integration types accepted by `snyk_integration`.
pub const INTEGRATION_TYPES: &[&str] = &[
    "acr",
    "artifactory-cr",
    "azure-repos",
    "bitbucket-cloud",
    "bitbucket-connect-app",
    "bitbucket-server",
    "digitalocean-cr",
    "docker-hub",
    "ecr",
    "gcr",
    "github",
    "github-cr",
    "github-enterprise",
    "gitlab",
    "gitlab-cr",
    "google-artifact-cr",
    "harbor-cr",
    "nexus-cr",
    "quay-cr",
];

/// Credential attributes that must be set for an integration type.
fn required_credentials(integration_type: &str) -> &'static [&'static str] {
    match integration_type {
        "acr" => &["username", "password", "registry_url"],
        "bitbucket-cloud" => &["username", "password"],
        "bitbucket-server" => &["username", "password", "url"],
        "github" | "gitlab" => &["token"],
        _ => &[],
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PullRequestScaModel {
    enabled: Option<bool>,
    fail_on_any_issue: Option<bool>,
    fail_only_for_high_and_critical_severity: Option<bool>,
    fail_only_on_issues_with_fix: Option<bool>,
}

impl PullRequestScaModel {
    fn settings(&self) -> IntegrationSettings {
        IntegrationSettings {
            pull_request_test_enabled: self.enabled,
            pull_request_fail_on_any_issue: self.fail_on_any_issue,
            pull_request_fail_only_for_high_and_critical_severity: self.fail_only_for_high_and_critical_severity,
            pull_request_fail_only_for_issues_with_fix: self.fail_only_on_issues_with_fix,
            ..Default::default()
        }
    }

    fn from_settings(settings: &IntegrationSettings) -> Self {
        Self {
            enabled: settings.pull_request_test_enabled,
            fail_on_any_issue: settings.pull_request_fail_on_any_issue,
            fail_only_for_high_and_critical_severity: settings.pull_request_fail_only_for_high_and_critical_severity,
            fail_only_on_issues_with_fix: settings.pull_request_fail_only_for_issues_with_fix,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DependencyUpgradeModel {
    enabled: Option<bool>,
    ignored_dependencies: Option<Vec<String>>,
    include_major_version: Option<bool>,
    limit: Option<i64>,
}

impl DependencyUpgradeModel {
    fn settings(&self) -> IntegrationSettings {
        IntegrationSettings {
            dependency_upgrade_enabled: self.enabled,
            dependency_upgrade_ignored_dependencies: self.ignored_dependencies.clone(),
            dependency_upgrade_include_major_version: self.include_major_version,
            dependency_upgrade_limit: self.limit,
            ..Default::default()
        }
    }

    fn from_settings(settings: &IntegrationSettings) -> Self {
        Self {
            enabled: settings.dependency_upgrade_enabled,
            ignored_dependencies: Some(settings.dependency_upgrade_ignored_dependencies.clone().unwrap_or_default()),
            include_major_version: settings.dependency_upgrade_include_major_version,
            limit: settings.dependency_upgrade_limit,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IntegrationModel {
    id: Option<String>,
    organization_id: String,
    password: Option<String>,
    pull_request_dependency_upgrade: Option<DependencyUpgradeModel>,
    pull_request_sca: Option<PullRequestScaModel>,
    region: Option<String>,
    registry_url: Option<String>,
    role_arn: Option<String>,
    token: Option<String>,
    #[serde(rename = "type")]
    integration_type: String,
    url: Option<String>,
    username: Option<String>,
}

impl IntegrationModel {
    fn request(&self) -> IntegrationRequest {
        let value = |v: &Option<String>| v.clone().unwrap_or_default();
        IntegrationRequest {
            integration_type: self.integration_type.clone(),
            credentials: IntegrationCredentials {
                username: value(&self.username),
                password: value(&self.password),
                region: value(&self.region),
                registry_base: value(&self.registry_url),
                role_arn: value(&self.role_arn),
                token: value(&self.token),
                url: value(&self.url),
            },
        }
    }

    fn apply_settings(&mut self, settings: &IntegrationSettings) {
        if self.pull_request_sca.is_some() {
            self.pull_request_sca = Some(PullRequestScaModel::from_settings(settings));
        }
        if self.pull_request_dependency_upgrade.is_some() {
            self.pull_request_dependency_upgrade = Some(DependencyUpgradeModel::from_settings(settings));
        }
    }

    /// Push the configured settings blocks, returning the settings the API
    /// ends up with. `None` when no block is configured.
    async fn update_settings(
        &self,
        client: &dyn SnykApi,
        integration_id: &str,
    ) -> Result<Option<IntegrationSettings>, ProviderError> {
        let blocks = [
            self.pull_request_sca.as_ref().map(PullRequestScaModel::settings),
            self.pull_request_dependency_upgrade
                .as_ref()
                .map(DependencyUpgradeModel::settings),
        ];

        let mut result = None;
        for settings in blocks.into_iter().flatten() {
            trace!(integration_id = %integration_id, payload = ?settings, "Updating pull request settings");
            let updated = client
                .update_integration_settings(&self.organization_id, integration_id, &settings)
                .await
                .map_err(|e| ProviderError::api("Error updating pull request settings", e))?;
            result = Some(updated);
        }
        Ok(result)
    }
}

fn settings_block(description: &str, block: Block) -> NestedBlock {
    NestedBlock::single(block.with_description(description))
}

fn computed_bool(description: &str) -> Attribute {
    Attribute::optional_computed_bool()
        .with_description(description)
        .use_state_for_unknown()
}

/// Manages SCM and container registry integrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrationResource;

#[async_trait]
impl Resource for IntegrationResource {
    fn type_name(&self) -> &'static str {
        "snyk_integration"
    }

    fn schema(&self) -> Schema {
        let optional = |description: &str| {
            Attribute::optional_string()
                .with_description(description)
                .use_state_for_unknown()
        };

        Schema::v0()
            .with_description("The integration resource allows you to manage Snyk integration.")
            .with_attribute(
                "id",
                Attribute::computed_string()
                    .with_description("The ID of the integration.")
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "organization_id",
                Attribute::required_string()
                    .with_description("The ID of the organization that the integration belongs to.")
                    .requires_replace(),
            )
            .with_attribute("password", optional("The password used by the integration.").sensitive())
            .with_attribute("region", optional("The region used by the integration."))
            .with_attribute(
                "registry_url",
                optional("The URL for container registries used by the integration (e.g. for ECR)."),
            )
            .with_attribute("role_arn", optional("The role ARN used by the integration (ECR only)."))
            .with_attribute("token", optional("The token used by the integration.").sensitive())
            .with_attribute(
                "type",
                Attribute::required_string()
                    .with_description("The integration type, e.g. 'github'.")
                    .requires_replace()
                    .with_validator(Validator::one_of(INTEGRATION_TYPES.iter().copied())),
            )
            .with_attribute("url", optional("The URL used by the integration."))
            .with_attribute("username", optional("The username used by the integration."))
            .with_block(
                "pull_request_dependency_upgrade",
                settings_block(
                    "The pull request configuration for dependency upgrades. Snyk can automatically raise pull \
                     requests to update out-of-date dependencies.",
                    Block::new()
                        .with_attribute(
                            "enabled",
                            computed_bool(
                                "Denotes the pull request automatic dependency upgrade feature should be enabled \
                                 for this integration",
                            ),
                        )
                        .with_attribute(
                            "ignored_dependencies",
                            Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::optional_computed())
                                .with_description(
                                    "List of exact names of the dependencies that should not be included in the \
                                     automatic upgrade operation. You can use only enter lowercase letters.",
                                )
                                .use_state_for_unknown(),
                        )
                        .with_attribute(
                            "include_major_version",
                            computed_bool(
                                "Defines if major version upgrades will be included in the recommendations. By \
                                 default, only patches and minor versions are included in the upgrade \
                                 recommendations.",
                            ),
                        )
                        .with_attribute(
                            "limit",
                            Attribute::optional_computed_int64()
                                .with_description(
                                    "The maximum number of simultaneously opened pull requests with dependency upgrades.",
                                )
                                .with_validator(Validator::Int64Between(1, 10))
                                .use_state_for_unknown(),
                        ),
                ),
            )
            .with_block(
                "pull_request_sca",
                settings_block(
                    "The pull request testing configuration for SCA (Software Composition Analysis). Snyk checks \
                     projects imported through the SCM integration for security and license issues whenever a new \
                     PR is opened.",
                    Block::new()
                        .with_attribute(
                            "enabled",
                            computed_bool("Denotes the pull request SCA feature should be enabled for this integration."),
                        )
                        .with_attribute(
                            "fail_on_any_issue",
                            computed_bool(
                                "Fails an opened pull request if any vulnerable dependencies have been detected, \
                                 otherwise the pull request should only fail when a dependency with issues is added.",
                            ),
                        )
                        .with_attribute(
                            "fail_only_for_high_and_critical_severity",
                            computed_bool(
                                "Fails an opened pull request if any dependencies are marked as being of high or \
                                 critical severity.",
                            ),
                        )
                        .with_attribute(
                            "fail_only_on_issues_with_fix",
                            computed_bool("Fails an opened pull request only when issues found have a fix available."),
                        ),
                ),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let Some(integration_type) = string_attr(config, "type") else {
            return Vec::new();
        };

        required_credentials(integration_type)
            .iter()
            .filter(|attr| string_attr(config, attr).is_none())
            .map(|attr| {
                Diagnostic::error("Ensure that integration is correctly configured")
                    .with_detail(format!(
                        "{} must be defined and not empty for '{}' integration",
                        attr, integration_type
                    ))
                    .with_attribute("type")
            })
            .collect()
    }

    async fn create(&self, client: &dyn SnykApi, planned: Value) -> Result<Value, ProviderError> {
        let mut data: IntegrationModel = decode(planned)?;
        let org_id = data.organization_id.clone();

        let integrations = client
            .list_integrations(&org_id)
            .await
            .map_err(|e| ProviderError::api("Error reading integrations", e))?;

        let request = data.request();
        let integration = match integrations.get(&data.integration_type) {
            Some(existing_id) => {
                debug!(integration_id = %existing_id, integration_type = %data.integration_type, "Taking over existing integration");
                trace!(payload = ?request, "Updating integration credentials");
                client
                    .update_integration(&org_id, existing_id, &request)
                    .await
                    .map_err(|e| ProviderError::api("Error updating integration", e))?
            },
            None => {
                trace!(payload = ?request, "Creating integration");
                client
                    .create_integration(&org_id, &request)
                    .await
                    .map_err(|e| ProviderError::api("Error creating integration", e))?
            },
        };
        data.id = Some(integration.id.clone());

        if let Some(settings) = data.update_settings(client, &integration.id).await? {
            data.apply_settings(&settings);
        }
        encode(&data)
    }

    async fn read(&self, client: &dyn SnykApi, state: Value) -> Result<Option<Value>, ProviderError> {
        let mut data: IntegrationModel = decode(state)?;
        let org_id = data.organization_id.clone();

        trace!(org_id = %org_id, integration_type = %data.integration_type, "Getting integration");
        let integration = match client.get_integration_by_type(&org_id, &data.integration_type).await {
            Ok(integration) => integration,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(ProviderError::api("Error reading integration", e)),
        };

        if data.pull_request_sca.is_some() || data.pull_request_dependency_upgrade.is_some() {
            let settings = client
                .get_integration_settings(&org_id, &integration.id)
                .await
                .map_err(|e| ProviderError::api("Error reading integration settings", e))?;
            data.apply_settings(&settings);
        }

        data.id = Some(integration.id);
        encode(&data).map(Some)
    }

    async fn update(&self, client: &dyn SnykApi, _prior: Value, planned: Value) -> Result<Value, ProviderError> {
        let mut data: IntegrationModel = decode(planned)?;
        let integration_id = data.id.clone().unwrap_or_default();

        let request = data.request();
        trace!(integration_id = %integration_id, payload = ?request, "Updating integration");
        let integration = client
            .update_integration(&data.organization_id, &integration_id, &request)
            .await
            .map_err(|e| ProviderError::api("Error updating integration", e))?;

        if let Some(settings) = data.update_settings(client, &integration_id).await? {
            data.apply_settings(&settings);
        }
        data.id = Some(integration.id);
        encode(&data)
    }

    async fn delete(&self, client: &dyn SnykApi, state: Value) -> Result<(), ProviderError> {
        let data: IntegrationModel = decode(state)?;
        let integration_id = data.id.unwrap_or_default();

        trace!(integration_id = %integration_id, "Deleting integration credentials");
        client
            .delete_integration_credentials(&data.organization_id, &integration_id)
            .await
            .map_err(|e| ProviderError::api("Error deleting integration", e))
    }

    fn import(&self, id: &str) -> Result<Value, ProviderError> {
        let [organization_id, integration_type] = split_import_id::<2>(id, "organization_id,type")?;
        Ok(json!({
            "organization_id": organization_id,
            "type": integration_type,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_resource;
    use crate::testing::{assert_error_summary, assert_plan_replaces, MemorySnykApi};
    use crate::validation::validate;

    fn details(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().filter_map(|d| d.detail.as_deref()).collect()
    }

    #[test]
    fn test_acr_requires_registry_credentials() {
        let config = json!({"organization_id": "org-1", "type": "acr", "username": "robot", "password": ""});
        let diagnostics = IntegrationResource.validate(&config);

        assert_eq!(
            details(&diagnostics),
            vec![
                "password must be defined and not empty for 'acr' integration",
                "registry_url must be defined and not empty for 'acr' integration",
            ]
        );
        assert!(diagnostics
            .iter()
            .all(|d| d.summary == "Ensure that integration is correctly configured"
                && d.attribute.as_deref() == Some("type")));
    }

    #[test]
    fn test_credential_requirements_per_type() {
        let check = |config: Value| details(&IntegrationResource.validate(&config)).len();

        assert_eq!(check(json!({"type": "github", "token": "t"})), 0);
        assert_eq!(check(json!({"type": "gitlab"})), 1);
        assert_eq!(check(json!({"type": "bitbucket-cloud", "username": "u"})), 1);
        assert_eq!(check(json!({"type": "bitbucket-server", "username": "u", "password": "p"})), 1);
        assert_eq!(check(json!({"type": "docker-hub"})), 0);
        // unknown until apply
        assert_eq!(check(json!({"type": null})), 0);
    }

    #[test]
    fn test_schema_rejects_unknown_type_and_limit() {
        let schema = IntegrationResource.schema();
        let config = json!({
            "organization_id": "org-1",
            "type": "svn",
            "pull_request_dependency_upgrade": {"limit": 11},
        });

        let diagnostics = validate(&schema, &config);
        let attributes: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert!(attributes.contains(&"type"));
        assert!(attributes.contains(&"pull_request_dependency_upgrade.limit"));
    }

    #[tokio::test]
    async fn test_create_new_with_sca_settings() {
        let api = MemorySnykApi::new();
        let config = json!({
            "organization_id": "org-1",
            "type": "github",
            "token": "secret",
            "pull_request_sca": {"enabled": true, "fail_on_any_issue": false},
        });

        let plan = plan_resource(&IntegrationResource.schema(), None, Some(&config));
        let state = IntegrationResource.create(&api, plan.planned_state).await.unwrap();

        let id = state["id"].as_str().unwrap().to_string();
        assert_eq!(api.integration_credentials(&id).unwrap().token, "secret");
        assert_eq!(state["pull_request_sca"]["enabled"], true);
        assert_eq!(state["pull_request_sca"]["fail_on_any_issue"], false);
        assert_eq!(state["pull_request_dependency_upgrade"], Value::Null);
        assert!(api.calls().contains(&"create_integration"));

        // credentials are not read back, state keeps the configured values
        assert_eq!(state["token"], "secret");
    }

    #[tokio::test]
    async fn test_create_takes_over_existing_integration() {
        let api = MemorySnykApi::new();
        let existing = api.insert_integration("org-1", "gitlab");

        let config = json!({"organization_id": "org-1", "type": "gitlab", "token": "t", "url": "https://git.example"});
        let plan = plan_resource(&IntegrationResource.schema(), None, Some(&config));
        let state = IntegrationResource.create(&api, plan.planned_state).await.unwrap();

        assert_eq!(state["id"], existing.as_str());
        assert_eq!(api.integration_credentials(&existing).unwrap().url, "https://git.example");
        assert!(!api.calls().contains(&"create_integration"));
        assert!(!api.calls().contains(&"update_integration_settings"));
    }

    #[tokio::test]
    async fn test_update_dependency_upgrade_and_read_back() {
        let api = MemorySnykApi::new();
        let schema = IntegrationResource.schema();
        let config = json!({
            "organization_id": "org-1",
            "type": "github",
            "token": "t",
            "pull_request_dependency_upgrade": {"enabled": true, "limit": 5},
        });
        let prior = IntegrationResource
            .create(&api, plan_resource(&schema, None, Some(&config)).planned_state)
            .await
            .unwrap();
        assert_eq!(prior["pull_request_dependency_upgrade"]["ignored_dependencies"], json!([]));

        let mut proposed = config.clone();
        proposed["token"] = json!("t2");
        proposed["pull_request_dependency_upgrade"] = json!({"enabled": true, "limit": 3, "ignored_dependencies": ["lodash"]});
        let plan = plan_resource(&schema, Some(&prior), Some(&proposed));
        assert!(!plan.requires_replace);

        let state = IntegrationResource
            .update(&api, prior.clone(), plan.planned_state)
            .await
            .unwrap();
        let id = state["id"].as_str().unwrap();
        assert_eq!(api.integration_credentials(id).unwrap().token, "t2");
        assert_eq!(state["pull_request_dependency_upgrade"]["limit"], 3);
        assert_eq!(api.integration_settings(id).unwrap().dependency_upgrade_limit, Some(3));

        let refreshed = IntegrationResource.read(&api, state.clone()).await.unwrap().unwrap();
        assert_eq!(refreshed, state);
    }

    #[tokio::test]
    async fn test_read_without_blocks_skips_settings() {
        let api = MemorySnykApi::new();
        let id = api.insert_integration("org-1", "docker-hub");

        let state = IntegrationResource
            .read(&api, json!({"organization_id": "org-1", "type": "docker-hub"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["id"], id.as_str());
        assert!(!api.calls().contains(&"get_integration_settings"));

        let gone = IntegrationResource
            .read(&api, json!({"organization_id": "org-1", "type": "github"}))
            .await
            .unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_errors() {
        let api = MemorySnykApi::new();
        api.fail("list_integrations", 500);
        let err = IntegrationResource
            .create(&api, json!({"organization_id": "org-1", "type": "github", "token": "t"}))
            .await
            .unwrap_err();
        assert_error_summary(err, "Error reading integrations");

        let api = MemorySnykApi::new();
        api.fail("update_integration_settings", 400);
        let err = IntegrationResource
            .create(
                &api,
                json!({"organization_id": "org-1", "type": "github", "token": "t", "pull_request_sca": {"enabled": true}}),
            )
            .await
            .unwrap_err();
        assert_error_summary(err, "Error updating pull request settings");
    }

    #[tokio::test]
    async fn test_delete_removes_credentials() {
        let api = MemorySnykApi::new();
        let config = json!({"organization_id": "org-1", "type": "github", "token": "t"});
        let state = IntegrationResource
            .create(&api, plan_resource(&IntegrationResource.schema(), None, Some(&config)).planned_state)
            .await
            .unwrap();
        let id = state["id"].as_str().unwrap().to_string();

        IntegrationResource.delete(&api, state).await.unwrap();
        assert!(api.integration_credentials(&id).is_none());

        let err = IntegrationResource
            .delete(&api, json!({"organization_id": "org-1", "type": "github", "id": "int-404"}))
            .await
            .unwrap_err();
        assert_error_summary(err, "Error deleting integration");
    }

    #[test]
    fn test_changing_type_replaces() {
        let prior = json!({"organization_id": "org-1", "type": "github", "id": "int-1", "token": "t"});
        let plan = plan_resource(
            &IntegrationResource.schema(),
            Some(&prior),
            Some(&json!({"organization_id": "org-1", "type": "gitlab", "token": "t"})),
        );
        assert_plan_replaces(&plan);
    }

    #[test]
    fn test_import() {
        assert_eq!(
            IntegrationResource.import("org-1,github").unwrap(),
            json!({"organization_id": "org-1", "type": "github"})
        );
        assert!(IntegrationResource.import("int-1").is_err());
    }
}
