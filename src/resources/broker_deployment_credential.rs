//! `snyk_broker_deployment_credential`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

use crate::client::{BrokerDeploymentCredential, BrokerDeploymentCredentialRequest, SnykApi};
use crate::error::ProviderError;
use crate::helper::split_import_id;
use crate::resource::{decode, encode, Resource};
use crate::schema::{Attribute, Schema};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct BrokerDeploymentCredentialModel {
    app_install_id: String,
    broker_connection_type: String,
    broker_deployment_id: String,
    environment_variable_name: String,
    id: Option<String>,
    tenant_id: String,
}

impl BrokerDeploymentCredentialModel {
    fn request(&self) -> BrokerDeploymentCredentialRequest {
        BrokerDeploymentCredentialRequest {
            environment_variable_name: self.environment_variable_name.clone(),
            connection_type: self.broker_connection_type.clone(),
        }
    }

    fn apply(&mut self, credential: &BrokerDeploymentCredential) {
        self.id = Some(credential.id.clone());
        self.environment_variable_name = credential.environment_variable_name.clone();
        self.broker_connection_type = credential.connection_type.clone();
    }
}

/// Manages credential references of a broker deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerDeploymentCredentialResource;

#[async_trait]
impl Resource for BrokerDeploymentCredentialResource {
    fn type_name(&self) -> &'static str {
        "snyk_broker_deployment_credential"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "The broker deployment credential resource allows to manage credential references of a Snyk broker \
                 deployment. The secret value itself stays in the broker environment.",
            )
            .with_attribute(
                "app_install_id",
                Attribute::required_string()
                    .with_description("The ID of the app installation for Universal Broker Snyk App.")
                    .requires_replace(),
            )
            .with_attribute(
                "broker_connection_type",
                Attribute::required_string().with_description(
                    "The type of the broker connection the credential is used for, e.g. `github` or `gitlab`.",
                ),
            )
            .with_attribute(
                "broker_deployment_id",
                Attribute::required_string()
                    .with_description("The ID of the broker deployment.")
                    .requires_replace(),
            )
            .with_attribute(
                "environment_variable_name",
                Attribute::required_string()
                    .with_description("The name of the environment variable holding the credential in the broker."),
            )
            .with_attribute(
                "id",
                Attribute::computed_string()
                    .with_description("The ID of the broker deployment credential.")
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
        let mut data: BrokerDeploymentCredentialModel = decode(planned)?;

        trace!(
            broker_deployment_id = %data.broker_deployment_id,
            environment_variable_name = %data.environment_variable_name,
            "Creating broker deployment credential"
        );
        let credential = client
            .create_broker_deployment_credential(
                &data.tenant_id,
                &data.app_install_id,
                &data.broker_deployment_id,
                &data.request(),
            )
            .await
            .map_err(|e| ProviderError::api("Unable to create broker deployment credential", e))?;
        trace!(credential_id = %credential.id, "Created broker deployment credential");

        data.apply(&credential);
        encode(&data)
    }

    async fn read(&self, client: &dyn SnykApi, state: Value) -> Result<Option<Value>, ProviderError> {
        let mut data: BrokerDeploymentCredentialModel = decode(state)?;
        let credential_id = data.id.clone().unwrap_or_default();

        trace!(credential_id = %credential_id, broker_deployment_id = %data.broker_deployment_id, "Getting broker deployment credential");
        let credential = match client
            .get_broker_deployment_credential(
                &data.tenant_id,
                &data.app_install_id,
                &data.broker_deployment_id,
                &credential_id,
            )
            .await
        {
            Ok(credential) => credential,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(ProviderError::api("Unable to get broker deployment credential", e)),
        };

        data.apply(&credential);
        encode(&data).map(Some)
    }

    async fn update(&self, client: &dyn SnykApi, _prior: Value, planned: Value) -> Result<Value, ProviderError> {
        let mut data: BrokerDeploymentCredentialModel = decode(planned)?;
        let credential_id = data.id.clone().unwrap_or_default();

        trace!(credential_id = %credential_id, "Updating broker deployment credential");
        let credential = client
            .update_broker_deployment_credential(
                &data.tenant_id,
                &data.app_install_id,
                &data.broker_deployment_id,
                &credential_id,
                &data.request(),
            )
            .await
            .map_err(|e| ProviderError::api("Unable to update broker deployment credential", e))?;

        data.apply(&credential);
        encode(&data)
    }

    async fn delete(&self, client: &dyn SnykApi, state: Value) -> Result<(), ProviderError> {
        let data: BrokerDeploymentCredentialModel = decode(state)?;
        let credential_id = data.id.unwrap_or_default();

        trace!(credential_id = %credential_id, "Deleting broker deployment credential");
        client
            .delete_broker_deployment_credential(
                &data.tenant_id,
                &data.app_install_id,
                &data.broker_deployment_id,
                &credential_id,
            )
            .await
            .map_err(|e| ProviderError::api("Unable to delete broker deployment credential", e))
    }

    fn import(&self, id: &str) -> Result<Value, ProviderError> {
        let [id, tenant_id, app_install_id, broker_deployment_id] =
            split_import_id::<4>(id, "id,tenant_id,app_install_id,broker_deployment_id")?;
        Ok(json!({
            "id": id,
            "tenant_id": tenant_id,
            "app_install_id": app_install_id,
            "broker_deployment_id": broker_deployment_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BrokerDeploymentRequest;
    use crate::plan::plan_resource;
    use crate::testing::{assert_error_summary, assert_plan_replaces, assert_plan_updates_in_place, MemorySnykApi};

    async fn deployment(api: &MemorySnykApi) -> Value {
        let install = api.insert_app_install("org-1", "broker-app");
        let deployment = api
            .create_broker_deployment("ten-1", &install.id, &BrokerDeploymentRequest::default())
            .await
            .unwrap();
        json!({
            "app_install_id": install.id,
            "broker_deployment_id": deployment.id,
            "tenant_id": "ten-1",
            "broker_connection_type": "github",
            "environment_variable_name": "GITHUB_TOKEN",
        })
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let api = MemorySnykApi::new();
        let config = deployment(&api).await;
        let schema = BrokerDeploymentCredentialResource.schema();

        let plan = plan_resource(&schema, None, Some(&config));
        let state = BrokerDeploymentCredentialResource
            .create(&api, plan.planned_state)
            .await
            .unwrap();
        let credential_id = state["id"].as_str().unwrap().to_string();
        assert_eq!(
            api.broker_deployment_credential(&credential_id)
                .unwrap()
                .environment_variable_name,
            "GITHUB_TOKEN"
        );

        let mut proposed = config.clone();
        proposed["environment_variable_name"] = json!("GITHUB_TOKEN_2");
        let plan = plan_resource(&schema, Some(&state), Some(&proposed));
        assert_plan_updates_in_place(&plan);
        let state = BrokerDeploymentCredentialResource
            .update(&api, state, plan.planned_state)
            .await
            .unwrap();
        assert_eq!(state["id"], credential_id.as_str());
        assert_eq!(state["environment_variable_name"], "GITHUB_TOKEN_2");

        let refreshed = BrokerDeploymentCredentialResource
            .read(&api, state.clone())
            .await
            .unwrap();
        assert_eq!(refreshed, Some(state.clone()));

        BrokerDeploymentCredentialResource
            .delete(&api, state.clone())
            .await
            .unwrap();
        assert!(api.broker_deployment_credential(&credential_id).is_none());
        assert!(BrokerDeploymentCredentialResource
            .read(&api, state)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_for_unknown_deployment() {
        let api = MemorySnykApi::new();
        let mut config = deployment(&api).await;
        config["broker_deployment_id"] = json!("dep-404");

        let err = BrokerDeploymentCredentialResource
            .create(&api, config)
            .await
            .unwrap_err();
        assert_error_summary(err, "Unable to create broker deployment credential");
    }

    #[tokio::test]
    async fn test_read_error() {
        let api = MemorySnykApi::new();
        let mut state = deployment(&api).await;
        state["id"] = json!("cred-1");
        api.fail("get_broker_deployment_credential", 502);

        let err = BrokerDeploymentCredentialResource
            .read(&api, state)
            .await
            .unwrap_err();
        assert_error_summary(err, "Unable to get broker deployment credential");
    }

    #[test]
    fn test_moving_to_other_deployment_replaces() {
        let prior = json!({
            "id": "cred-1",
            "app_install_id": "inst-1",
            "broker_deployment_id": "dep-1",
            "tenant_id": "ten-1",
            "broker_connection_type": "github",
            "environment_variable_name": "GITHUB_TOKEN",
        });
        let mut proposed = prior.clone();
        proposed["broker_deployment_id"] = json!("dep-2");
        proposed.as_object_mut().unwrap().remove("id");

        let plan = plan_resource(&BrokerDeploymentCredentialResource.schema(), Some(&prior), Some(&proposed));
        assert_plan_replaces(&plan);
    }

    #[test]
    fn test_import() {
        let state = BrokerDeploymentCredentialResource
            .import("cred-1,ten-1,inst-1,dep-1")
            .unwrap();
        assert_eq!(
            state,
            json!({
                "id": "cred-1",
                "tenant_id": "ten-1",
                "app_install_id": "inst-1",
                "broker_deployment_id": "dep-1",
            })
        );

        let err = BrokerDeploymentCredentialResource
            .import("cred-1,ten-1,inst-1")
            .unwrap_err();
        assert_error_summary(err, "Unexpected Import Identifier");
    }

    #[tokio::test]
    async fn test_import_then_read() {
        let api = MemorySnykApi::new();
        let config = deployment(&api).await;
        let created = BrokerDeploymentCredentialResource
            .create(&api, config.clone())
            .await
            .unwrap();

        let import_id = format!(
            "{},{},{},{}",
            created["id"].as_str().unwrap(),
            config["tenant_id"].as_str().unwrap(),
            config["app_install_id"].as_str().unwrap(),
            config["broker_deployment_id"].as_str().unwrap(),
        );
        let imported = BrokerDeploymentCredentialResource.import(&import_id).unwrap();
        let state = BrokerDeploymentCredentialResource
            .read(&api, imported)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, created);
    }
}
