//! `snyk_project` data source

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::client::SnykApi;
use crate::error::ProviderError;
use crate::helper::{find_unique, Match, SearchSubject};
use crate::resource::{decode, encode, DataSource};
use crate::schema::{Attribute, Schema, Validator};

const PROJECT: SearchSubject = SearchSubject {
    singular: "project",
    plural: "projects",
    criteria: "'name' and 'organization_id'",
    hint: "Please verify the 'organization_id' and 'name' attributes.",
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProjectModel {
    id: Option<String>,
    name: String,
    organization_id: String,
}

/// Looks up a project of an organization by its exact name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectDataSource;

#[async_trait]
impl DataSource for ProjectDataSource {
    fn type_name(&self) -> &'static str {
        "snyk_project"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("The project data source provides information about an existing Snyk project.")
            .with_attribute("id", Attribute::computed_string().with_description("The ID of the project."))
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_description("The name of the project.")
                    .with_validator(Validator::NotEmpty),
            )
            .with_attribute(
                "organization_id",
                Attribute::required_string()
                    .with_description("The ID of the organization that the project belongs to.")
                    .with_validator(Validator::NotEmpty),
            )
    }

    async fn read(&self, client: &dyn SnykApi, config: Value) -> Result<Value, ProviderError> {
        let mut data: ProjectModel = decode(config)?;

        trace!(org_id = %data.organization_id, name = %data.name, "Getting projects by name");
        let projects = client
            .list_projects(&data.organization_id, Some(&data.name))
            .await
            .map_err(|e| ProviderError::api("Unable to get projects", e))?;

        // the name filter of the API is not an exact match
        let project = find_unique(
            projects,
            &PROJECT,
            |p| if p.name == data.name { Match::Full } else { Match::None },
            |p| p.id.as_str(),
        )?;

        data.id = Some(project.id);
        encode(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::has_errors;
    use crate::testing::{assert_error_summary, MemorySnykApi};
    use crate::validation::validate;
    use serde_json::json;

    #[tokio::test]
    async fn test_find_by_name() {
        let api = MemorySnykApi::new();
        api.insert_project("org-1", "frontend");
        let backend = api.insert_project("org-1", "backend");
        api.insert_project("org-2", "backend");

        let state = ProjectDataSource
            .read(&api, json!({"name": "backend", "organization_id": "org-1"}))
            .await
            .unwrap();
        assert_eq!(
            state,
            json!({"id": backend.id, "name": "backend", "organization_id": "org-1"})
        );
    }

    #[tokio::test]
    async fn test_no_match_and_duplicates() {
        let api = MemorySnykApi::new();
        api.insert_project("org-1", "dup");
        api.insert_project("org-1", "dup");

        let err = ProjectDataSource
            .read(&api, json!({"name": "missing", "organization_id": "org-1"}))
            .await
            .unwrap_err();
        assert_error_summary(err, "No search results");

        let err = ProjectDataSource
            .read(&api, json!({"name": "dup", "organization_id": "org-1"}))
            .await
            .unwrap_err();
        assert_error_summary(err, "Ambiguous search results");
    }

    #[test]
    fn test_name_must_not_be_empty() {
        let diagnostics = validate(
            &ProjectDataSource.schema(),
            &json!({"name": "", "organization_id": "org-1"}),
        );
        assert!(has_errors(&diagnostics));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("name"));
    }
}
