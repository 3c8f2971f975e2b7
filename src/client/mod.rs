//! Thin Snyk API client.
//!
//! [`SnykApi`] is the seam between the resources and the network: every
//! handler talks to a `dyn SnykApi`, [`SnykClient`] implements it over HTTP
//! and tests swap in an in-memory implementation. Each method issues a single
//! request; there is no retry and no pagination.

mod http;
pub mod models;
pub mod region;

use async_trait::async_trait;

pub use http::{SnykClient, SnykClientBuilder, REST_API_VERSION};
pub use models::{
    AppInstall, BrokerDeployment, BrokerDeploymentCredential, BrokerDeploymentCredentialRequest,
    BrokerDeploymentRequest, Group, Integration, IntegrationCredentials, IntegrationRequest,
    IntegrationSettings, Organization, Project, User,
};
pub use region::{predefined_regions, region_by_name, Region, DEFAULT_REGION};

use crate::error::ApiError;

/// Result type of every client call.
pub type ApiResult<T> = Result<T, ApiError>;

/// Operations of the Snyk REST and V1 APIs used by the provider.
#[async_trait]
pub trait SnykApi: Send + Sync {
    // orgs

    /// Create an organization (V1), optionally inside a group.
    async fn create_organization(&self, name: &str, group_id: Option<&str>) -> ApiResult<Organization>;

    /// Get an organization including its tenant relationship.
    async fn get_organization(&self, organization_id: &str) -> ApiResult<Organization>;

    /// All organizations the token can access.
    async fn list_organizations(&self) -> ApiResult<Vec<Organization>>;

    /// Rename an organization.
    async fn update_organization(&self, organization_id: &str, name: &str) -> ApiResult<Organization>;

    /// Delete an organization (V1).
    async fn delete_organization(&self, organization_id: &str) -> ApiResult<()>;

    /// Get a group including its tenant relationship.
    async fn get_group(&self, group_id: &str) -> ApiResult<Group>;

    // users and projects

    /// The user owning the token.
    async fn get_self_user(&self) -> ApiResult<User>;

    /// A user by ID (V1).
    async fn get_user(&self, user_id: &str) -> ApiResult<User>;

    /// Projects of an organization, optionally filtered by exact name.
    async fn list_projects(&self, organization_id: &str, name: Option<&str>) -> ApiResult<Vec<Project>>;

    // apps

    /// Install an app into an organization.
    async fn create_app_install(&self, organization_id: &str, app_id: &str) -> ApiResult<AppInstall>;

    /// App installs of an organization, with app names expanded.
    async fn list_app_installs(&self, organization_id: &str) -> ApiResult<Vec<AppInstall>>;

    /// Remove an app install.
    async fn delete_app_install(&self, organization_id: &str, install_id: &str) -> ApiResult<()>;

    // brokers

    /// Create a broker deployment for an app install.
    async fn create_broker_deployment(
        &self,
        tenant_id: &str,
        install_id: &str,
        request: &BrokerDeploymentRequest,
    ) -> ApiResult<BrokerDeployment>;

    /// Broker deployments of an app install.
    async fn list_broker_deployments(&self, tenant_id: &str, install_id: &str) -> ApiResult<Vec<BrokerDeployment>>;

    /// Update a broker deployment.
    async fn update_broker_deployment(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        request: &BrokerDeploymentRequest,
    ) -> ApiResult<BrokerDeployment>;

    /// Delete a broker deployment.
    async fn delete_broker_deployment(&self, tenant_id: &str, install_id: &str, deployment_id: &str) -> ApiResult<()>;

    /// Create a credential in a broker deployment.
    async fn create_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        request: &BrokerDeploymentCredentialRequest,
    ) -> ApiResult<BrokerDeploymentCredential>;

    /// Get a broker deployment credential.
    async fn get_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
    ) -> ApiResult<BrokerDeploymentCredential>;

    /// Update a broker deployment credential.
    async fn update_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
        request: &BrokerDeploymentCredentialRequest,
    ) -> ApiResult<BrokerDeploymentCredential>;

    /// Delete a broker deployment credential.
    async fn delete_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
    ) -> ApiResult<()>;

    // integrations (V1)

    /// Integration IDs of an organization keyed by integration type.
    async fn list_integrations(&self, organization_id: &str) -> ApiResult<std::collections::BTreeMap<String, String>>;

    /// Create an integration.
    async fn create_integration(&self, organization_id: &str, request: &IntegrationRequest) -> ApiResult<Integration>;

    /// Replace the credentials of an integration.
    async fn update_integration(
        &self,
        organization_id: &str,
        integration_id: &str,
        request: &IntegrationRequest,
    ) -> ApiResult<Integration>;

    /// Get the integration of the given type.
    async fn get_integration_by_type(&self, organization_id: &str, integration_type: &str) -> ApiResult<Integration>;

    /// Pull request settings of an integration.
    async fn get_integration_settings(&self, organization_id: &str, integration_id: &str) -> ApiResult<IntegrationSettings>;

    /// Update pull request settings; unset fields are left unchanged.
    async fn update_integration_settings(
        &self,
        organization_id: &str,
        integration_id: &str,
        settings: &IntegrationSettings,
    ) -> ApiResult<IntegrationSettings>;

    /// Remove the stored credentials of an integration.
    async fn delete_integration_credentials(&self, organization_id: &str, integration_id: &str) -> ApiResult<()>;
}
