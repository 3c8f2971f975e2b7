//! `snyk_app_install`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::client::{AppInstall, SnykApi};
use crate::error::ProviderError;
use crate::helper::find_organization_for_app_install;
use crate::resource::{decode, encode, Resource};
use crate::schema::{Attribute, Schema};

// imported state carries only the id and maybe the organization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppInstallModel {
    app_id: String,
    app_name: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    id: Option<String>,
    organization_id: String,
}

impl AppInstallModel {
    fn apply(&mut self, install: &AppInstall) {
        if !install.app_id.is_empty() {
            self.app_id = install.app_id.clone();
        }
        if install.app_name.is_some() {
            self.app_name = install.app_name.clone();
        }
        self.client_id = install.client_id.clone();
        self.id = Some(install.id.clone());
    }
}

/// Installs Snyk Apps into organizations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppInstallResource;

#[async_trait]
impl Resource for AppInstallResource {
    fn type_name(&self) -> &'static str {
        "snyk_app_install"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("The app install resource allows to install Snyk Apps into an organization.")
            .with_attribute(
                "app_id",
                Attribute::required_string()
                    .with_description("The ID of the Snyk App to install.")
                    .requires_replace(),
            )
            .with_attribute(
                "app_name",
                Attribute::computed_string()
                    .with_description("The name of the installed Snyk App.")
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "client_id",
                Attribute::computed_string()
                    .with_description("The OAuth client ID of the app install.")
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "client_secret",
                Attribute::computed_string()
                    .with_description("The OAuth client secret of the app install. Only available after creation.")
                    .sensitive()
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "id",
                Attribute::computed_string()
                    .with_description("The ID of the app install.")
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "organization_id",
                Attribute::required_string()
                    .with_description("The ID of the organization to install the app into.")
                    .requires_replace(),
            )
    }

    async fn create(&self, client: &dyn SnykApi, planned: Value) -> Result<Value, ProviderError> {
        let mut data: AppInstallModel = decode(planned)?;
        let org_id = data.organization_id.clone();

        trace!(app_id = %data.app_id, org_id = %org_id, "Creating app install for organization");
        let created = client
            .create_app_install(&org_id, &data.app_id)
            .await
            .map_err(|e| ProviderError::api("Unable to create app install", e))?;
        trace!(app_install_id = %created.id, org_id = %org_id, "Created app install for organization");

        // the secret is only part of the create response
        data.client_secret = created.client_secret.clone();

        trace!(app_install_id = %created.id, org_id = %org_id, "Getting app install with enriched properties");
        let installs = client
            .list_app_installs(&org_id)
            .await
            .map_err(|e| ProviderError::api("Unable to get app install", e))?;
        let install = installs
            .into_iter()
            .find(|i| i.id == created.id)
            .unwrap_or(created);

        data.apply(&install);
        encode(&data)
    }

    async fn read(&self, client: &dyn SnykApi, state: Value) -> Result<Option<Value>, ProviderError> {
        let mut data: AppInstallModel = decode(state)?;
        let install_id = data.id.clone().unwrap_or_default();
        if data.organization_id.is_empty() {
            data.organization_id = find_organization_for_app_install(client, &install_id).await?;
        }

        trace!(app_install_id = %install_id, org_id = %data.organization_id, "Getting app install");
        let installs = client
            .list_app_installs(&data.organization_id)
            .await
            .map_err(|e| ProviderError::api("Unable to get app install", e))?;

        match installs.into_iter().find(|i| i.id == install_id) {
            Some(install) => {
                data.apply(&install);
                encode(&data).map(Some)
            },
            // uninstalled outside of the provider
            None => Ok(None),
        }
    }

    async fn update(&self, _client: &dyn SnykApi, _prior: Value, planned: Value) -> Result<Value, ProviderError> {
        // every input forces replacement
        Ok(planned)
    }

    async fn delete(&self, client: &dyn SnykApi, state: Value) -> Result<(), ProviderError> {
        let data: AppInstallModel = decode(state)?;
        let install_id = data.id.unwrap_or_default();

        trace!(app_install_id = %install_id, org_id = %data.organization_id, "Deleting app install for organization");
        client
            .delete_app_install(&data.organization_id, &install_id)
            .await
            .map_err(|e| ProviderError::api("Unable to delete app install", e))
    }

    fn import(&self, id: &str) -> Result<Value, ProviderError> {
        let state = match id.split_once(',') {
            Some((org_id, install_id)) if !org_id.is_empty() && !install_id.is_empty() && !install_id.contains(',') => {
                serde_json::json!({ "id": install_id, "organization_id": org_id })
            },
            Some(_) => {
                return Err(ProviderError::failed(
                    "Unexpected Import Identifier",
                    format!(
                        "Expected import identifier with format: id or organization_id,id. Got: {:?}",
                        id
                    ),
                ))
            },
            None => serde_json::json!({ "id": id }),
        };
        Ok(state)
    }
}
