//! `snyk_organization`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::client::{Organization, SnykApi};
use crate::error::ProviderError;
use crate::helper::organization::{tenant_id_wait_conf, wait_organization_tenant_id_populated_with};
use crate::helper::StateChangeConf;
use crate::resource::{decode, encode, non_empty, Resource};
use crate::schema::{Attribute, Schema};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct OrganizationModel {
    group_id: Option<String>,
    id: Option<String>,
    name: String,
    slug: Option<String>,
    tenant_id: Option<String>,
}

impl OrganizationModel {
    fn apply(&mut self, organization: &Organization) {
        if organization.group_id.is_some() {
            self.group_id = organization.group_id.clone();
        }
        self.id = Some(organization.id.clone());
        self.name = organization.name.clone();
        self.slug = Some(organization.slug.clone());
        if organization.tenant_id.is_some() {
            self.tenant_id = organization.tenant_id.clone();
        }
    }
}

/// Manages Snyk organizations.
#[derive(Debug, Clone)]
pub struct OrganizationResource {
    tenant_wait: StateChangeConf,
}

impl Default for OrganizationResource {
    fn default() -> Self {
        Self {
            tenant_wait: tenant_id_wait_conf(),
        }
    }
}

impl OrganizationResource {
    /// Override how long create waits for the tenant to show up.
    pub fn with_tenant_wait(mut self, conf: StateChangeConf) -> Self {
        self.tenant_wait = conf;
        self
    }
}

#[async_trait]
impl Resource for OrganizationResource {
    fn type_name(&self) -> &'static str {
        "snyk_organization"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "The organization resource allows to manage Snyk organizations. An Organization in Snyk is a way to \
                 collect and organize your Projects. Members of Organizations have access to these Projects.",
            )
            .with_attribute(
                "group_id",
                Attribute::optional_computed_string()
                    .with_description("The ID of the group to which the organization belongs.")
                    .requires_replace()
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "id",
                Attribute::computed_string()
                    .with_description("The ID of the organization.")
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "name",
                Attribute::required_string().with_description("The name of the organization."),
            )
            .with_attribute(
                "slug",
                Attribute::computed_string()
                    .with_description("The canonical (unique and URL-friendly) name of the organization.")
                    .use_state_for_unknown(),
            )
            .with_attribute(
                "tenant_id",
                Attribute::computed_string()
                    .with_description("The ID of the tenant to which the organization belongs.")
                    .use_state_for_unknown(),
            )
    }

    async fn create(&self, client: &dyn SnykApi, planned: Value) -> Result<Value, ProviderError> {
        let mut data: OrganizationModel = decode(planned)?;

        trace!(name = %data.name, group_id = ?data.group_id, "Creating organization");
        let created = client
            .create_organization(&data.name, non_empty(&data.group_id))
            .await
            .map_err(|e| ProviderError::api("Unable to create organization", e))?;
        trace!(org_id = %created.id, "Created organization");

        trace!(org_id = %created.id, "Getting organization with enriched properties");
        let mut organization = client
            .get_organization(&created.id)
            .await
            .map_err(|e| ProviderError::api("Unable to get organization", e))?;
        if organization.group_id.is_none() {
            organization.group_id = created.group_id.clone();
        }

        // a fresh organization often has no tenant yet, the group already does
        if organization.tenant_id.is_none() {
            if let Some(group_id) = organization.group_id.clone() {
                trace!(group_id = %group_id, "Getting group with tenant information");
                let group = client
                    .get_group(&group_id)
                    .await
                    .map_err(|e| ProviderError::api("Unable to get group", e))?;
                organization.tenant_id = group.tenant_id;
            }
        }

        if organization.tenant_id.is_none() {
            let populated = wait_organization_tenant_id_populated_with(client, &created.id, &self.tenant_wait).await?;
            organization.tenant_id = populated.tenant_id;
        }

        data.apply(&organization);
        encode(&data)
    }

    async fn read(&self, client: &dyn SnykApi, state: Value) -> Result<Option<Value>, ProviderError> {
        let mut data: OrganizationModel = decode(state)?;
        let org_id = data.id.clone().unwrap_or_default();

        trace!(org_id = %org_id, "Getting organization");
        let organization = match client.get_organization(&org_id).await {
            Ok(organization) => organization,
            // already destroyed outside of the provider
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(ProviderError::api("Unable to get organization", e)),
        };

        data.apply(&organization);
        encode(&data).map(Some)
    }

    async fn update(&self, client: &dyn SnykApi, _prior: Value, planned: Value) -> Result<Value, ProviderError> {
        let mut data: OrganizationModel = decode(planned)?;
        let org_id = data.id.clone().unwrap_or_default();

        trace!(org_id = %org_id, name = %data.name, "Updating organization");
        let organization = client
            .update_organization(&org_id, &data.name)
            .await
            .map_err(|e| ProviderError::api("Unable to update organization", e))?;

        data.apply(&organization);
        encode(&data)
    }

    async fn delete(&self, client: &dyn SnykApi, state: Value) -> Result<(), ProviderError> {
        let data: OrganizationModel = decode(state)?;
        let org_id = data.id.unwrap_or_default();

        trace!(org_id = %org_id, "Deleting organization");
        client
            .delete_organization(&org_id)
            .await
            .map_err(|e| ProviderError::api("Unable to delete organization", e))
    }
}
