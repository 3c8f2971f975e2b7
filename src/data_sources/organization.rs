//! `snyk_organization` data source

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, trace};

use crate::client::{Organization, SnykApi};
use crate::error::ProviderError;
use crate::helper::{find_unique, Match, SearchSubject};
use crate::resource::{decode, encode, non_empty, DataSource};
use crate::schema::{Attribute, Schema};

const ORGANIZATION: SearchSubject = SearchSubject {
    singular: "organization",
    plural: "organizations",
    criteria: "'id', 'name' or 'group_id'",
    hint: "Please verify the search attributes.",
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct OrganizationModel {
    group_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    slug: Option<String>,
    tenant_id: Option<String>,
}

struct Criteria<'a> {
    id: Option<&'a str>,
    name: Option<&'a str>,
    group_id: Option<&'a str>,
}

impl Criteria<'_> {
    fn check(&self, org: &Organization) -> Match {
        if self.id.is_some_and(|id| id != org.id) {
            return Match::None;
        }
        if let Some(name) = self.name.filter(|name| *name != org.name) {
            return match self.id {
                Some(id) => Match::Partial(format!(
                    "An organization with id '{}' was found, but it has a different name.\nExpected '{}', got '{}'.",
                    id, name, org.name
                )),
                None => Match::None,
            };
        }
        if let Some(group_id) = self.group_id.filter(|g| Some(*g) != org.group_id.as_deref()) {
            let found = org.group_id.as_deref().unwrap_or_default();
            return match (self.id, self.name) {
                (Some(id), _) => Match::Partial(format!(
                    "An organization with id '{}' was found, but it belongs to a different group.\nExpected '{}', got '{}'.",
                    id, group_id, found
                )),
                (None, Some(name)) => Match::Partial(format!(
                    "An organization with name '{}' was found, but it belongs to a different group.\nExpected '{}', got '{}'.",
                    name, group_id, found
                )),
                (None, None) => Match::None,
            };
        }
        Match::Full
    }
}

/// Looks up an organization by ID or name.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrganizationDataSource;

#[async_trait]
impl DataSource for OrganizationDataSource {
    fn type_name(&self) -> &'static str {
        "snyk_organization"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "The organization data source provides information about an existing Snyk organization. At least \
                 one of `id` or `name` must be set.",
            )
            .with_attribute(
                "group_id",
                Attribute::optional_computed_string()
                    .with_description("The ID of the group to which the organization belongs."),
            )
            .with_attribute(
                "id",
                Attribute::optional_computed_string().with_description("The ID of the organization."),
            )
            .with_attribute(
                "name",
                Attribute::optional_computed_string().with_description("The name of the organization."),
            )
            .with_attribute(
                "slug",
                Attribute::computed_string()
                    .with_description("The canonical (unique and URL-friendly) name of the organization."),
            )
            .with_attribute(
                "tenant_id",
                Attribute::computed_string().with_description("The ID of the tenant to which the organization belongs."),
            )
    }

    async fn read(&self, client: &dyn SnykApi, config: Value) -> Result<Value, ProviderError> {
        let data: OrganizationModel = decode(config)?;
        let criteria = Criteria {
            id: non_empty(&data.id),
            name: non_empty(&data.name),
            group_id: non_empty(&data.group_id),
        };
        if criteria.id.is_none() && criteria.name.is_none() {
            return Err(ProviderError::failed(
                "Missing required attributes",
                r#"The attribute "id" or "name" must be defined."#,
            ));
        }

        trace!("Getting all accessible organizations");
        let organizations = client
            .list_organizations()
            .await
            .map_err(|e| ProviderError::api("Unable to get organizations", e))?;

        info!(
            org_id = ?criteria.id,
            name = ?criteria.name,
            group_id = ?criteria.group_id,
            "Searching for organization by criteria"
        );
        let org = find_unique(organizations, &ORGANIZATION, |o| criteria.check(o), |o| o.id.as_str())?;

        encode(&OrganizationModel {
            group_id: org.group_id,
            id: Some(org.id),
            name: Some(org.name),
            slug: Some(org.slug),
            tenant_id: org.tenant_id,
        })
    }
}
