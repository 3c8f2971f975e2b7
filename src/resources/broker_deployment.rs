//! `snyk_broker_deployment`

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

use crate::client::{BrokerDeployment, BrokerDeploymentRequest, SnykApi};
use crate::error::ProviderError;
use crate::helper::{find_organization_for_app_install, split_import_id};
use crate::resource::{decode, encode, non_empty, Resource};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BrokerDeploymentModel {
    app_install_id: String,
    id: Option<String>,
    metadata: Option<BTreeMap<String, String>>,
    organization_id: Option<String>,
    tenant_id: String,
}

impl BrokerDeploymentModel {
    fn apply(&mut self, deployment: &BrokerDeployment, org_id: &str) {
        if !deployment.app_install_id.is_empty() {
            self.app_install_id = deployment.app_install_id.clone();
        }
        self.id = Some(deployment.id.clone());
        self.organization_id = Some(org_id.to_string());
        self.metadata = Some(deployment.metadata.clone());
    }
}

async fn resolve_organization(client: &dyn SnykApi, data: &BrokerDeploymentModel) -> Result<String, ProviderError> {
    match non_empty(&data.organization_id) {
        Some(org_id) => Ok(org_id.to_string()),
        None => find_organization_for_app_install(client, &data.app_install_id).await,
    }
}

/// Manages Universal Broker deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerDeploymentResource;

#[async_trait]
impl Resource for BrokerDeploymentResource {
    fn type_name(&self) -> &'static str {
        "snyk_broker_deployment"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "The broker deployment resource allows to manage Snyk broker deployments. A broker deployment groups \
                 Universal Broker connections for better organization and management.",
            )
            .with_attribute(
                "app_install_id",
                Attribute::required_string()
                    .with_description("The ID of the app installation for Universal Broker Snyk App.")
                    .requires_replace(),
            )
            .with_attribute(
                "id",
                Attribute::computed_string()
                    .with_description("The ID of the broker deployment.")
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "metadata",
                Attribute::new(AttributeType::map(AttributeType::String), AttributeFlags::optional_computed())
                    .with_description(
                        "A map of string to string to store custom metadata for the broker deployment, such as \
                         ownership or environment.",
                    )
                    .with_default(json!({})),
            )
            .with_attribute(
                "organization_id",
                Attribute::optional_computed_string()
                    .with_description(
                        "The ID of the organization where the Universal Broker Snyk App is installed. If omitted, \
                         every accessible organization is searched for the app installation.",
                    )
                    .requires_replace()
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "tenant_id",
                Attribute::required_string()
                    .with_description("The ID of the tenant to which the broker deployment belongs.")
                    .requires_replace(),
            )
    }

    async fn create(&self, client: &dyn SnykApi, planned: Value) -> Result<Value, ProviderError> {
        let mut data: BrokerDeploymentModel = decode(planned)?;
        let org_id = resolve_organization(client, &data).await?;

        let request = BrokerDeploymentRequest {
            organization_id: org_id.clone(),
            metadata: data.metadata.clone().unwrap_or_default(),
        };
        trace!(app_install_id = %data.app_install_id, tenant_id = %data.tenant_id, payload = ?request, "Creating broker deployment");
        let deployment = client
            .create_broker_deployment(&data.tenant_id, &data.app_install_id, &request)
            .await
            .map_err(|e| ProviderError::api("Unable to create broker deployment", e))?;
        trace!(broker_deployment_id = %deployment.id, "Created broker deployment");

        data.apply(&deployment, &org_id);
        encode(&data)
    }

    async fn read(&self, client: &dyn SnykApi, state: Value) -> Result<Option<Value>, ProviderError> {
        let mut data: BrokerDeploymentModel = decode(state)?;
        let deployment_id = data.id.clone().unwrap_or_default();

        trace!(
            app_install_id = %data.app_install_id,
            broker_deployment_id = %deployment_id,
            tenant_id = %data.tenant_id,
            "Getting broker deployment"
        );
        let deployments = match client
            .list_broker_deployments(&data.tenant_id, &data.app_install_id)
            .await
        {
            Ok(deployments) => deployments,
            // the API answers 404 instead of an empty list when there are no deployments
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(ProviderError::api("Unable to get broker deployment", e)),
        };
        let Some(deployment) = deployments.into_iter().find(|d| d.id == deployment_id) else {
            return Ok(None);
        };

        let org_id = match non_empty(&data.organization_id) {
            Some(org_id) => org_id.to_string(),
            None => match deployment.organization_id.clone() {
                Some(org_id) => org_id,
                None => find_organization_for_app_install(client, &data.app_install_id).await?,
            },
        };

        data.apply(&deployment, &org_id);
        encode(&data).map(Some)
    }

    async fn update(&self, client: &dyn SnykApi, _prior: Value, planned: Value) -> Result<Value, ProviderError> {
        let mut data: BrokerDeploymentModel = decode(planned)?;
        let deployment_id = data.id.clone().unwrap_or_default();
        let org_id = resolve_organization(client, &data).await?;

        let request = BrokerDeploymentRequest {
            organization_id: org_id.clone(),
            metadata: data.metadata.clone().unwrap_or_default(),
        };
        trace!(broker_deployment_id = %deployment_id, payload = ?request, "Updating broker deployment");
        let deployment = client
            .update_broker_deployment(&data.tenant_id, &data.app_install_id, &deployment_id, &request)
            .await
            .map_err(|e| ProviderError::api("Unable to update broker deployment", e))?;

        data.apply(&deployment, &org_id);
        encode(&data)
    }

    async fn delete(&self, client: &dyn SnykApi, state: Value) -> Result<(), ProviderError> {
        let data: BrokerDeploymentModel = decode(state)?;
        let deployment_id = data.id.unwrap_or_default();

        trace!(broker_deployment_id = %deployment_id, tenant_id = %data.tenant_id, "Deleting broker deployment");
        client
            .delete_broker_deployment(&data.tenant_id, &data.app_install_id, &deployment_id)
            .await
            .map_err(|e| ProviderError::api("Unable to delete broker deployment", e))
    }

    fn import(&self, id: &str) -> Result<Value, ProviderError> {
        let [id, tenant_id, app_install_id] = split_import_id::<3>(id, "id,tenant_id,app_install_id")?;
        Ok(json!({
            "id": id,
            "tenant_id": tenant_id,
            "app_install_id": app_install_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_resource;
    use crate::testing::{assert_error_summary, assert_plan_no_changes, MemorySnykApi};

    fn create_config(api: &MemorySnykApi, with_org: bool) -> (Value, String, String) {
        api.insert_organization("Other", None, None);
        let org = api.insert_organization("Broker Org", None, Some("ten-1"));
        let install = api.insert_app_install(&org.id, "broker-app");
        let mut config = json!({"app_install_id": install.id, "tenant_id": "ten-1"});
        if with_org {
            config["organization_id"] = json!(org.id);
        }
        (config, org.id, install.id)
    }

    #[tokio::test]
    async fn test_create_with_default_metadata() {
        let api = MemorySnykApi::new();
        let (config, org_id, _) = create_config(&api, true);

        let plan = plan_resource(&BrokerDeploymentResource.schema(), None, Some(&config));
        assert_eq!(plan.planned_state["metadata"], json!({}));
        let state = BrokerDeploymentResource
            .create(&api, plan.planned_state)
            .await
            .unwrap();

        assert_eq!(state["organization_id"], org_id.as_str());
        assert_eq!(state["metadata"], json!({}));
        assert!(!api.calls().contains(&"list_organizations"));
    }

    #[tokio::test]
    async fn test_create_searches_organization() {
        let api = MemorySnykApi::new();
        let (config, org_id, _) = create_config(&api, false);

        let plan = plan_resource(&BrokerDeploymentResource.schema(), None, Some(&config));
        let state = BrokerDeploymentResource
            .create(&api, plan.planned_state)
            .await
            .unwrap();

        assert_eq!(state["organization_id"], org_id.as_str());
        let deployment = api
            .broker_deployment(state["id"].as_str().unwrap())
            .unwrap();
        assert_eq!(deployment.organization_id.as_deref(), Some(org_id.as_str()));
    }

    #[tokio::test]
    async fn test_create_without_matching_organization() {
        let api = MemorySnykApi::new();
        api.insert_organization("Empty", None, None);

        let err = BrokerDeploymentResource
            .create(&api, json!({"app_install_id": "inst-x", "tenant_id": "ten-1", "metadata": {}}))
            .await
            .unwrap_err();
        let diagnostics = err.into_diagnostics();
        assert_eq!(diagnostics[0].summary, "Unable to find organization");
        assert_eq!(
            diagnostics[0].detail.as_deref(),
            Some("No organization with app installation (inst-x) was found.")
        );
    }

    #[tokio::test]
    async fn test_update_metadata_and_read_back() {
        let api = MemorySnykApi::new();
        let (config, _, _) = create_config(&api, true);
        let schema = BrokerDeploymentResource.schema();
        let plan = plan_resource(&schema, None, Some(&config));
        let prior = BrokerDeploymentResource
            .create(&api, plan.planned_state)
            .await
            .unwrap();

        let mut proposed = config.clone();
        proposed["metadata"] = json!({"owner": "platform"});
        let plan = plan_resource(&schema, Some(&prior), Some(&proposed));
        assert!(!plan.requires_replace);

        let state = BrokerDeploymentResource
            .update(&api, prior.clone(), plan.planned_state)
            .await
            .unwrap();
        assert_eq!(state["metadata"], json!({"owner": "platform"}));

        let refreshed = BrokerDeploymentResource.read(&api, state.clone()).await.unwrap().unwrap();
        assert_eq!(refreshed, state);
        assert_plan_no_changes(&plan_resource(&schema, Some(&refreshed), Some(&proposed)));
    }

    #[tokio::test]
    async fn test_read_gone() {
        let api = MemorySnykApi::new();
        let (config, _, install_id) = create_config(&api, true);
        let mut state = config.clone();
        state["id"] = json!("dep-404");
        assert!(BrokerDeploymentResource.read(&api, state).await.unwrap().is_none());

        // unknown install answers 404
        let state = json!({"id": "dep-1", "app_install_id": "inst-404", "tenant_id": "ten-1"});
        assert!(BrokerDeploymentResource.read(&api, state).await.unwrap().is_none());

        api.fail("list_broker_deployments", 500);
        let state = json!({"id": "dep-1", "app_install_id": install_id, "tenant_id": "ten-1"});
        let err = BrokerDeploymentResource.read(&api, state).await.unwrap_err();
        assert_error_summary(err, "Unable to get broker deployment");
    }

    #[tokio::test]
    async fn test_import_then_read_finds_organization() {
        let api = MemorySnykApi::new();
        let (config, org_id, install_id) = create_config(&api, true);
        let created = BrokerDeploymentResource
            .create(&api, plan_resource(&BrokerDeploymentResource.schema(), None, Some(&config)).planned_state)
            .await
            .unwrap();

        let import_id = format!("{},ten-1,{}", created["id"].as_str().unwrap(), install_id);
        let imported = BrokerDeploymentResource.import(&import_id).unwrap();
        assert_eq!(imported["tenant_id"], "ten-1");

        let state = BrokerDeploymentResource.read(&api, imported).await.unwrap().unwrap();
        assert_eq!(state["organization_id"], org_id.as_str());
        assert_eq!(state["metadata"], json!({}));
    }

    #[test]
    fn test_import_rejects_bad_identifier() {
        let err = BrokerDeploymentResource.import("dep-1,ten-1").unwrap_err();
        assert_error_summary(err, "Unexpected Import Identifier");
    }
}
