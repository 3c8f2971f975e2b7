//! `snyk_app_install` data source

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, trace};

use crate::client::{AppInstall, SnykApi};
use crate::error::ProviderError;
use crate::helper::{find_unique, Match, SearchSubject};
use crate::resource::{decode, encode, non_empty, DataSource};
use crate::schema::{Attribute, Schema};

const APP_INSTALL: SearchSubject = SearchSubject {
    singular: "app install",
    plural: "app installs",
    criteria: "'id', 'app_id' or 'app_name'",
    hint: "Please verify the 'organization_id' and other search attributes.",
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct AppInstallModel {
    app_id: Option<String>,
    app_name: Option<String>,
    client_id: Option<String>,
    id: Option<String>,
    organization_id: String,
}

struct Criteria<'a> {
    id: Option<&'a str>,
    app_id: Option<&'a str>,
    app_name: Option<&'a str>,
}

impl Criteria<'_> {
    fn check(&self, install: &AppInstall) -> Match {
        if self.id.is_some_and(|id| id != install.id) {
            return Match::None;
        }
        if let Some(app_id) = self.app_id.filter(|a| *a != install.app_id) {
            return match self.id {
                Some(id) => Match::Partial(format!(
                    "An app install with id '{}' was found, but it has a different app_id.\nExpected '{}', got '{}'.",
                    id, app_id, install.app_id
                )),
                None => Match::None,
            };
        }
        let found_name = install.app_name.as_deref().unwrap_or_default();
        if let Some(app_name) = self.app_name.filter(|n| *n != found_name) {
            return match (self.id, self.app_id) {
                (Some(id), _) => Match::Partial(format!(
                    "An app install with id '{}' was found, but it has a different app_name.\nExpected '{}', got '{}'.",
                    id, app_name, found_name
                )),
                (None, Some(app_id)) => Match::Partial(format!(
                    "An app install with app id '{}' was found, but it has a different app_name.\nExpected '{}', got '{}'.",
                    app_id, app_name, found_name
                )),
                (None, None) => Match::None,
            };
        }
        Match::Full
    }
}

/// Looks up an app installation of an organization.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppInstallDataSource;

#[async_trait]
impl DataSource for AppInstallDataSource {
    fn type_name(&self) -> &'static str {
        "snyk_app_install"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "The app install data source provides information about an existing app installation. Snyk Apps are \
                 the modern and preferred way to build integrations with Snyk, exposing fine-grained scopes for \
                 accessing resources over the Snyk APIs.",
            )
            .with_attribute("app_id", Attribute::optional_computed_string().with_description("The ID of the app."))
            .with_attribute(
                "app_name",
                Attribute::optional_computed_string().with_description("The name of the app."),
            )
            .with_attribute(
                "client_id",
                Attribute::computed_string().with_description("The OAuth2 client id for the app installation."),
            )
            .with_attribute(
                "id",
                Attribute::optional_computed_string().with_description("The ID of the app installation."),
            )
            .with_attribute(
                "organization_id",
                Attribute::required_string().with_description("The organization ID of the app installation."),
            )
    }

    async fn read(&self, client: &dyn SnykApi, config: Value) -> Result<Value, ProviderError> {
        let data: AppInstallModel = decode(config)?;
        let criteria = Criteria {
            id: non_empty(&data.id),
            app_id: non_empty(&data.app_id),
            app_name: non_empty(&data.app_name),
        };
        if criteria.id.is_none() && criteria.app_id.is_none() && criteria.app_name.is_none() {
            return Err(ProviderError::failed(
                "Missing required attributes",
                r#"The attribute "id", "app_id" or "app_name" must be defined."#,
            ));
        }

        let org_id = data.organization_id.as_str();
        trace!(organization_id = %org_id, "Getting app installs for organization");
        let installs = client
            .list_app_installs(org_id)
            .await
            .map_err(|e| ProviderError::api("Unable to get app installs", e))?;
        trace!(count = installs.len(), "Got app installs for organization");

        info!(
            app_install_id = ?criteria.id,
            app_id = ?criteria.app_id,
            app_name = ?criteria.app_name,
            "Searching for app install by criteria"
        );
        let install = find_unique(installs, &APP_INSTALL, |i| criteria.check(i), |i| i.id.as_str())?;

        encode(&AppInstallModel {
            app_id: Some(install.app_id),
            app_name: install.app_name,
            client_id: install.client_id,
            id: Some(install.id),
            organization_id: data.organization_id.clone(),
        })
    }
}
