//! [`SnykApi`] over HTTP.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use super::models::{
    AppInstall, BrokerDeployment, BrokerDeploymentCredential, BrokerDeploymentCredentialRequest,
    BrokerDeploymentRequest, Group, Integration, IntegrationRequest, IntegrationSettings,
    Organization, Project, User,
};
use super::region::{region_by_name, Region, DEFAULT_REGION};
use super::{ApiResult, SnykApi};
use crate::error::ApiError;

/// Version sent with every REST request.
pub const REST_API_VERSION: &str = "2024-10-15";

const JSON_API: &str = "application/vnd.api+json";
const REQUEST_ID_HEADER: &str = "snyk-request-id";

/// HTTP implementation of [`SnykApi`].
#[derive(Debug, Clone)]
pub struct SnykClient {
    http: reqwest::Client,
    rest_base_url: String,
    v1_base_url: String,
}

/// Builder for [`SnykClient`].
#[derive(Debug, Clone)]
pub struct SnykClientBuilder {
    token: String,
    user_agent: Option<String>,
    rest_base_url: String,
    v1_base_url: String,
}

impl SnykClientBuilder {
    /// Start a builder for the default region.
    pub fn new(token: impl Into<String>) -> Self {
        let region = region_by_name(DEFAULT_REGION).unwrap_or_else(|| {
            Region::new(
                DEFAULT_REGION,
                "https://app.snyk.io",
                "https://api.snyk.io/rest",
                "https://api.snyk.io/v1",
            )
        });
        Self {
            token: token.into(),
            user_agent: None,
            rest_base_url: region.rest_base_url,
            v1_base_url: region.v1_base_url,
        }
    }

    /// Use the API base URLs of `region`.
    pub fn with_region(mut self, region: &Region) -> Self {
        self.rest_base_url = region.rest_base_url.clone();
        self.v1_base_url = region.v1_base_url.clone();
        self
    }

    /// Override both API base URLs.
    ///
    /// Primarily used for testing with mock servers.
    pub fn with_base_urls(mut self, rest_base_url: impl Into<String>, v1_base_url: impl Into<String>) -> Self {
        self.rest_base_url = rest_base_url.into();
        self.v1_base_url = v1_base_url.into();
        self
    }

    /// Set the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> ApiResult<SnykClient> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("token {}", self.token))
            .map_err(|_| ApiError::Configuration("invalid token format".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        if let Some(user_agent) = &self.user_agent {
            let value = HeaderValue::from_str(user_agent)
                .map_err(|_| ApiError::Configuration(format!("invalid user agent: {}", user_agent)))?;
            headers.insert(USER_AGENT, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Configuration(e.to_string()))?;

        Ok(SnykClient {
            http,
            rest_base_url: self.rest_base_url.trim_end_matches('/').to_string(),
            v1_base_url: self.v1_base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl SnykClient {
    /// Shorthand for [`SnykClientBuilder::new`].
    pub fn builder(token: impl Into<String>) -> SnykClientBuilder {
        SnykClientBuilder::new(token)
    }

    fn rest_url(&self, segments: &[&str], query: &[(&str, &str)]) -> ApiResult<Url> {
        let mut url = join_segments(&self.rest_base_url, segments)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("version", REST_API_VERSION);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn v1_url(&self, segments: &[&str]) -> ApiResult<Url> {
        join_segments(&self.v1_base_url, segments)
    }

    /// Send a request and return the raw body of a successful response.
    async fn execute(&self, method: Method, url: Url, body: Option<(&str, &Value)>) -> ApiResult<Vec<u8>> {
        let mut request = self.http.request(method.clone(), url.clone());
        request = match body {
            Some((content_type, body)) => request
                .header(CONTENT_TYPE, content_type)
                .header(ACCEPT, content_type)
                .body(serde_json::to_vec(body)?),
            None => request.header(ACCEPT, "application/json, application/vnd.api+json"),
        };

        let response = request.send().await?;
        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        trace!(
            method = %method,
            url = %url,
            status = status.as_u16(),
            snyk_request_id = request_id.as_deref().unwrap_or(""),
            "Snyk API response"
        );

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                method: method.to_string(),
                url: url.to_string(),
                message: error_message(status, &bytes),
                request_id,
            });
        }
        Ok(bytes)
    }

    async fn rest<T: DeserializeOwned>(&self, method: Method, url: Url, body: Option<&Value>) -> ApiResult<T> {
        let bytes = self.execute(method, url, body.map(|b| (JSON_API, b))).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn v1<T: DeserializeOwned>(&self, method: Method, url: Url, body: Option<&Value>) -> ApiResult<T> {
        let bytes = self.execute(method, url, body.map(|b| ("application/json", b))).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_empty(&self, method: Method, url: Url) -> ApiResult<()> {
        self.execute(method, url, None).await.map(|_| ())
    }

    fn deployments_path<'a>(tenant_id: &'a str, install_id: &'a str) -> Vec<&'a str> {
        vec!["tenants", tenant_id, "brokers", "installs", install_id, "deployments"]
    }

    fn credentials_path<'a>(tenant_id: &'a str, install_id: &'a str, deployment_id: &'a str) -> Vec<&'a str> {
        let mut path = Self::deployments_path(tenant_id, install_id);
        path.extend([deployment_id, "credentials"]);
        path
    }
}

/// Append path segments to a base URL. Each segment is percent-encoded, so
/// IDs containing `/`, `?` or `#` stay inside their own segment.
fn join_segments(base: &str, segments: &[&str]) -> ApiResult<Url> {
    let mut url = Url::parse(base).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(format!("{} cannot be used as a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Pull a readable message out of an error body.
///
/// REST errors follow JSON:API (`errors[].detail`), V1 errors carry
/// `message` or `error`.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    let fallback = || status.canonical_reason().unwrap_or("unexpected status").to_string();
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        let text = String::from_utf8_lossy(body).trim().to_string();
        return if text.is_empty() { fallback() } else { text };
    };

    let from_errors = value
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(|e| e.get("detail").or_else(|| e.get("title")))
        .and_then(Value::as_str);
    let from_v1 = value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str);

    from_errors
        .or(from_v1)
        .map(str::to_string)
        .unwrap_or_else(fallback)
}

// JSON:API envelopes

#[derive(Deserialize)]
struct Document<T> {
    data: T,
}

/// Some endpoints answer a single-object request with a one-element array.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_one(self) -> ApiResult<T> {
        match self {
            Self::One(item) => Ok(item),
            Self::Many(items) => items.into_iter().next().ok_or_else(|| {
                ApiError::Decode(<serde_json::Error as serde::de::Error>::custom("empty data array"))
            }),
        }
    }
}

#[derive(Deserialize)]
struct Resource<A> {
    id: String,
    attributes: A,
    #[serde(default)]
    relationships: Relationships,
}

#[derive(Deserialize, Default)]
struct Relationships {
    tenant: Option<Relationship>,
    app: Option<Relationship>,
}

#[derive(Deserialize)]
struct Relationship {
    data: Option<RelatedData>,
}

#[derive(Deserialize)]
struct RelatedData {
    id: String,
    attributes: Option<RelatedAttributes>,
}

#[derive(Deserialize)]
struct RelatedAttributes {
    name: Option<String>,
}

impl Relationship {
    fn id(&self) -> Option<String> {
        self.data.as_ref().map(|d| d.id.clone()).filter(|id| !id.is_empty())
    }

    fn name(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| d.attributes.as_ref())
            .and_then(|a| a.name.clone())
    }
}

#[derive(Deserialize)]
struct OrganizationAttributes {
    name: String,
    #[serde(default)]
    slug: String,
    group_id: Option<String>,
}

impl From<Resource<OrganizationAttributes>> for Organization {
    fn from(r: Resource<OrganizationAttributes>) -> Self {
        Self {
            tenant_id: r.relationships.tenant.as_ref().and_then(Relationship::id),
            id: r.id,
            name: r.attributes.name,
            slug: r.attributes.slug,
            group_id: r.attributes.group_id.filter(|g| !g.is_empty()),
        }
    }
}

#[derive(Deserialize)]
struct GroupAttributes {
    name: String,
}

#[derive(Deserialize, Default)]
struct UserAttributes {
    #[serde(default)]
    name: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
struct ProjectAttributes {
    name: String,
}

#[derive(Deserialize, Default)]
struct AppInstallAttributes {
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl AppInstall {
    fn from_resource(r: Resource<AppInstallAttributes>, fallback_app_id: &str) -> Self {
        let app = r.relationships.app.as_ref();
        Self {
            app_id: app
                .and_then(Relationship::id)
                .unwrap_or_else(|| fallback_app_id.to_string()),
            app_name: app.and_then(Relationship::name),
            id: r.id,
            client_id: r.attributes.client_id,
            client_secret: r.attributes.client_secret,
        }
    }
}

#[derive(Deserialize)]
struct BrokerDeploymentAttributes {
    #[serde(default)]
    install_id: String,
    broker_app_installed_in_org_id: Option<String>,
    metadata: Option<BTreeMap<String, String>>,
}

impl BrokerDeployment {
    fn from_resource(r: Resource<BrokerDeploymentAttributes>, install_id: &str) -> Self {
        let attributes = r.attributes;
        Self {
            id: r.id,
            app_install_id: if attributes.install_id.is_empty() {
                install_id.to_string()
            } else {
                attributes.install_id
            },
            organization_id: attributes.broker_app_installed_in_org_id.filter(|o| !o.is_empty()),
            metadata: attributes.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct CredentialAttributes {
    #[serde(default)]
    deployment_id: String,
    #[serde(default)]
    environment_variable_name: String,
    #[serde(rename = "type", default)]
    connection_type: String,
}

impl BrokerDeploymentCredential {
    fn from_resource(r: Resource<CredentialAttributes>, deployment_id: &str) -> Self {
        let attributes = r.attributes;
        Self {
            id: r.id,
            deployment_id: if attributes.deployment_id.is_empty() {
                deployment_id.to_string()
            } else {
                attributes.deployment_id
            },
            environment_variable_name: attributes.environment_variable_name,
            connection_type: attributes.connection_type,
        }
    }
}

// V1 payloads

#[derive(Deserialize)]
struct V1Organization {
    id: String,
    name: String,
    #[serde(default)]
    slug: String,
    group: Option<V1Group>,
}

#[derive(Deserialize)]
struct V1Group {
    id: String,
}

#[derive(Deserialize)]
struct V1User {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
struct V1Integration {
    id: String,
}

fn broker_deployment_body(id: Option<&str>, install_id: &str, request: &BrokerDeploymentRequest) -> Value {
    let mut data = json!({
        "type": "broker_deployment",
        "attributes": {
            "broker_app_installed_in_org_id": request.organization_id,
            "install_id": install_id,
            "metadata": request.metadata,
        },
    });
    if let Some(id) = id {
        data["id"] = json!(id);
    }
    json!({ "data": data })
}

fn credential_body(id: Option<&str>, request: &BrokerDeploymentCredentialRequest) -> Value {
    let mut data = json!({
        "type": "deployment_credential",
        "attributes": {
            "environment_variable_name": request.environment_variable_name,
            "type": request.connection_type,
        },
    });
    if let Some(id) = id {
        data["id"] = json!(id);
    }
    json!({ "data": data })
}

#[async_trait]
impl SnykApi for SnykClient {
    async fn create_organization(&self, name: &str, group_id: Option<&str>) -> ApiResult<Organization> {
        let mut body = json!({ "name": name });
        if let Some(group_id) = group_id.filter(|g| !g.is_empty()) {
            body["groupId"] = json!(group_id);
        }
        let created: V1Organization = self.v1(Method::POST, self.v1_url(&["org"])?, Some(&body)).await?;
        Ok(Organization {
            id: created.id,
            name: created.name,
            slug: created.slug,
            group_id: created.group.map(|g| g.id),
            tenant_id: None,
        })
    }

    async fn get_organization(&self, organization_id: &str) -> ApiResult<Organization> {
        let url = self.rest_url(&["orgs", organization_id], &[("expand", "tenant")])?;
        let document: Document<Resource<OrganizationAttributes>> = self.rest(Method::GET, url, None).await?;
        Ok(document.data.into())
    }

    async fn list_organizations(&self) -> ApiResult<Vec<Organization>> {
        let url = self.rest_url(&["orgs"], &[("limit", "100")])?;
        let document: Document<Vec<Resource<OrganizationAttributes>>> = self.rest(Method::GET, url, None).await?;
        Ok(document.data.into_iter().map(Organization::from).collect())
    }

    async fn update_organization(&self, organization_id: &str, name: &str) -> ApiResult<Organization> {
        let url = self.rest_url(&["orgs", organization_id], &[])?;
        let body = json!({
            "data": {
                "id": organization_id,
                "type": "org",
                "attributes": { "name": name },
            }
        });
        let document: Document<Resource<OrganizationAttributes>> =
            self.rest(Method::PATCH, url, Some(&body)).await?;
        Ok(document.data.into())
    }

    async fn delete_organization(&self, organization_id: &str) -> ApiResult<()> {
        self.send_empty(Method::DELETE, self.v1_url(&["org", organization_id])?)
            .await
    }

    async fn get_group(&self, group_id: &str) -> ApiResult<Group> {
        let url = self.rest_url(&["groups", group_id], &[])?;
        let document: Document<Resource<GroupAttributes>> = self.rest(Method::GET, url, None).await?;
        let group = document.data;
        Ok(Group {
            tenant_id: group.relationships.tenant.as_ref().and_then(Relationship::id),
            id: group.id,
            name: group.attributes.name,
        })
    }

    async fn get_self_user(&self) -> ApiResult<User> {
        let url = self.rest_url(&["self"], &[])?;
        let document: Document<Resource<UserAttributes>> = self.rest(Method::GET, url, None).await?;
        let user = document.data;
        Ok(User {
            id: user.id,
            name: user.attributes.name,
            username: user.attributes.username,
            email: user.attributes.email,
        })
    }

    async fn get_user(&self, user_id: &str) -> ApiResult<User> {
        let user: V1User = self
            .v1(Method::GET, self.v1_url(&["user", user_id])?, None)
            .await?;
        Ok(User {
            id: user.id,
            name: user.name,
            username: user.username,
            email: user.email,
        })
    }

    async fn list_projects(&self, organization_id: &str, name: Option<&str>) -> ApiResult<Vec<Project>> {
        let query: Vec<(&str, &str)> = name.map(|n| vec![("names", n)]).unwrap_or_default();
        let url = self.rest_url(&["orgs", organization_id, "projects"], &query)?;
        let document: Document<Vec<Resource<ProjectAttributes>>> = self.rest(Method::GET, url, None).await?;
        Ok(document
            .data
            .into_iter()
            .map(|p| Project {
                id: p.id,
                name: p.attributes.name,
            })
            .collect())
    }

    async fn create_app_install(&self, organization_id: &str, app_id: &str) -> ApiResult<AppInstall> {
        let url = self.rest_url(&["orgs", organization_id, "apps", "installs"], &[])?;
        let body = json!({
            "data": {
                "type": "app_install",
                "relationships": {
                    "app": { "data": { "id": app_id, "type": "app" } },
                },
            }
        });
        let document: Document<OneOrMany<Resource<AppInstallAttributes>>> =
            self.rest(Method::POST, url, Some(&body)).await?;
        Ok(AppInstall::from_resource(document.data.into_one()?, app_id))
    }

    async fn list_app_installs(&self, organization_id: &str) -> ApiResult<Vec<AppInstall>> {
        let url = self.rest_url(&["orgs", organization_id, "apps", "installs"], &[("expand", "app")])?;
        let document: Document<Vec<Resource<AppInstallAttributes>>> = self.rest(Method::GET, url, None).await?;
        Ok(document
            .data
            .into_iter()
            .map(|r| AppInstall::from_resource(r, ""))
            .collect())
    }

    async fn delete_app_install(&self, organization_id: &str, install_id: &str) -> ApiResult<()> {
        let url = self.rest_url(&["orgs", organization_id, "apps", "installs", install_id], &[])?;
        self.send_empty(Method::DELETE, url).await
    }

    async fn create_broker_deployment(
        &self,
        tenant_id: &str,
        install_id: &str,
        request: &BrokerDeploymentRequest,
    ) -> ApiResult<BrokerDeployment> {
        let url = self.rest_url(&Self::deployments_path(tenant_id, install_id), &[])?;
        let body = broker_deployment_body(None, install_id, request);
        let document: Document<OneOrMany<Resource<BrokerDeploymentAttributes>>> =
            self.rest(Method::POST, url, Some(&body)).await?;
        Ok(BrokerDeployment::from_resource(document.data.into_one()?, install_id))
    }

    async fn list_broker_deployments(&self, tenant_id: &str, install_id: &str) -> ApiResult<Vec<BrokerDeployment>> {
        let url = self.rest_url(&Self::deployments_path(tenant_id, install_id), &[])?;
        let document: Document<Vec<Resource<BrokerDeploymentAttributes>>> =
            self.rest(Method::GET, url, None).await?;
        Ok(document
            .data
            .into_iter()
            .map(|r| BrokerDeployment::from_resource(r, install_id))
            .collect())
    }

    async fn update_broker_deployment(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        request: &BrokerDeploymentRequest,
    ) -> ApiResult<BrokerDeployment> {
        let mut path = Self::deployments_path(tenant_id, install_id);
        path.push(deployment_id);
        let url = self.rest_url(&path, &[])?;
        let body = broker_deployment_body(Some(deployment_id), install_id, request);
        let document: Document<OneOrMany<Resource<BrokerDeploymentAttributes>>> =
            self.rest(Method::PATCH, url, Some(&body)).await?;
        Ok(BrokerDeployment::from_resource(document.data.into_one()?, install_id))
    }

    async fn delete_broker_deployment(&self, tenant_id: &str, install_id: &str, deployment_id: &str) -> ApiResult<()> {
        let mut path = Self::deployments_path(tenant_id, install_id);
        path.push(deployment_id);
        self.send_empty(Method::DELETE, self.rest_url(&path, &[])?).await
    }

    async fn create_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        request: &BrokerDeploymentCredentialRequest,
    ) -> ApiResult<BrokerDeploymentCredential> {
        let url = self.rest_url(&Self::credentials_path(tenant_id, install_id, deployment_id), &[])?;
        let body = credential_body(None, request);
        let document: Document<OneOrMany<Resource<CredentialAttributes>>> =
            self.rest(Method::POST, url, Some(&body)).await?;
        Ok(BrokerDeploymentCredential::from_resource(document.data.into_one()?, deployment_id))
    }

    async fn get_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
    ) -> ApiResult<BrokerDeploymentCredential> {
        let mut path = Self::credentials_path(tenant_id, install_id, deployment_id);
        path.push(credential_id);
        let document: Document<OneOrMany<Resource<CredentialAttributes>>> =
            self.rest(Method::GET, self.rest_url(&path, &[])?, None).await?;
        Ok(BrokerDeploymentCredential::from_resource(document.data.into_one()?, deployment_id))
    }

    async fn update_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
        request: &BrokerDeploymentCredentialRequest,
    ) -> ApiResult<BrokerDeploymentCredential> {
        let mut path = Self::credentials_path(tenant_id, install_id, deployment_id);
        path.push(credential_id);
        let body = credential_body(Some(credential_id), request);
        let document: Document<OneOrMany<Resource<CredentialAttributes>>> =
            self.rest(Method::PATCH, self.rest_url(&path, &[])?, Some(&body)).await?;
        Ok(BrokerDeploymentCredential::from_resource(document.data.into_one()?, deployment_id))
    }

    async fn delete_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
    ) -> ApiResult<()> {
        let mut path = Self::credentials_path(tenant_id, install_id, deployment_id);
        path.push(credential_id);
        self.send_empty(Method::DELETE, self.rest_url(&path, &[])?).await
    }

    async fn list_integrations(&self, organization_id: &str) -> ApiResult<BTreeMap<String, String>> {
        let url = self.v1_url(&["org", organization_id, "integrations"])?;
        self.v1(Method::GET, url, None).await
    }

    async fn create_integration(&self, organization_id: &str, request: &IntegrationRequest) -> ApiResult<Integration> {
        let url = self.v1_url(&["org", organization_id, "integrations"])?;
        let body = serde_json::to_value(request)?;
        let created: V1Integration = self.v1(Method::POST, url, Some(&body)).await?;
        Ok(Integration {
            id: created.id,
            integration_type: Some(request.integration_type.clone()),
        })
    }

    async fn update_integration(
        &self,
        organization_id: &str,
        integration_id: &str,
        request: &IntegrationRequest,
    ) -> ApiResult<Integration> {
        let url = self.v1_url(&["org", organization_id, "integrations", integration_id])?;
        let body = serde_json::to_value(request)?;
        let updated: V1Integration = self.v1(Method::PUT, url, Some(&body)).await?;
        Ok(Integration {
            id: updated.id,
            integration_type: Some(request.integration_type.clone()),
        })
    }

    async fn get_integration_by_type(&self, organization_id: &str, integration_type: &str) -> ApiResult<Integration> {
        let url = self.v1_url(&["org", organization_id, "integrations", integration_type])?;
        let found: V1Integration = self.v1(Method::GET, url, None).await?;
        Ok(Integration {
            id: found.id,
            integration_type: Some(integration_type.to_string()),
        })
    }

    async fn get_integration_settings(&self, organization_id: &str, integration_id: &str) -> ApiResult<IntegrationSettings> {
        let url = self.v1_url(&["org", organization_id, "integrations", integration_id, "settings"])?;
        self.v1(Method::GET, url, None).await
    }

    async fn update_integration_settings(
        &self,
        organization_id: &str,
        integration_id: &str,
        settings: &IntegrationSettings,
    ) -> ApiResult<IntegrationSettings> {
        let url = self.v1_url(&["org", organization_id, "integrations", integration_id, "settings"])?;
        let body = serde_json::to_value(settings)?;
        self.v1(Method::PUT, url, Some(&body)).await
    }

    async fn delete_integration_credentials(&self, organization_id: &str, integration_id: &str) -> ApiResult<()> {
        let url = self.v1_url(&["org", organization_id, "integrations", integration_id, "authentication"])?;
        self.send_empty(Method::DELETE, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> SnykClient {
        SnykClient::builder("t0k3n")
            .with_base_urls(server.url("/rest"), server.url("/v1"))
            .with_user_agent("terraform-provider-snyk/test")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_token() {
        let err = SnykClient::builder("bad\ntoken").build().unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }

    #[test]
    fn test_error_message_extraction() {
        let rest = br#"{"jsonapi":{"version":"1.0"},"errors":[{"status":"404","detail":"Org not found"}]}"#;
        assert_eq!(error_message(StatusCode::NOT_FOUND, rest), "Org not found");

        let v1 = br#"{"code":401,"message":"Invalid auth token"}"#;
        assert_eq!(error_message(StatusCode::UNAUTHORIZED, v1), "Invalid auth token");

        assert_eq!(error_message(StatusCode::BAD_GATEWAY, b""), "Bad Gateway");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, b"upstream down"), "upstream down");
    }

    #[test]
    fn test_ids_are_encoded_as_single_segments() {
        let client = SnykClient::builder("t0k3n")
            .with_base_urls("https://api.example.test/rest/", "https://api.example.test/v1")
            .build()
            .unwrap();

        let url = client.rest_url(&["orgs", "a/b?c#d"], &[("expand", "tenant")]).unwrap();
        assert_eq!(url.path(), "/rest/orgs/a%2Fb%3Fc%23d");
        assert_eq!(
            url.query(),
            Some(format!("version={}&expand=tenant", REST_API_VERSION).as_str())
        );

        let url = client
            .v1_url(&["org", "org-1", "integrations", "../settings"])
            .unwrap();
        assert_eq!(url.path(), "/v1/org/org-1/integrations/..%2Fsettings");

        let mut path = SnykClient::credentials_path("ten/1", "inst-1", "dep-1");
        path.push("cred-1");
        let url = client.rest_url(&path, &[]).unwrap();
        assert_eq!(
            url.path(),
            "/rest/tenants/ten%2F1/brokers/installs/inst-1/deployments/dep-1/credentials/cred-1"
        );
    }

    #[test]
    fn test_base_url_without_path() {
        let client = SnykClient::builder("t0k3n")
            .with_base_urls("https://api.example.test", "https://api.example.test")
            .build()
            .unwrap();
        assert_eq!(client.v1_url(&["user", "u-1"]).unwrap().as_str(), "https://api.example.test/user/u-1");

        let client = SnykClient::builder("t0k3n")
            .with_base_urls("mailto:someone@example.test", "mailto:someone@example.test")
            .build()
            .unwrap();
        assert!(matches!(client.v1_url(&["user"]), Err(ApiError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_get_organization_with_tenant() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/orgs/org-1")
                .query_param("version", REST_API_VERSION)
                .query_param("expand", "tenant")
                .header("authorization", "token t0k3n")
                .header("user-agent", "terraform-provider-snyk/test");
            then.status(200)
                .header("content-type", JSON_API)
                .header("snyk-request-id", "req-1")
                .json_body(json!({
                    "data": {
                        "id": "org-1",
                        "type": "org",
                        "attributes": {"name": "Platform", "slug": "platform", "group_id": "grp-1"},
                        "relationships": {"tenant": {"data": {"id": "ten-1", "type": "tenant"}}}
                    }
                }));
        });

        let org = client(&server).get_organization("org-1").await.unwrap();
        mock.assert();
        assert_eq!(
            org,
            Organization {
                id: "org-1".to_string(),
                name: "Platform".to_string(),
                slug: "platform".to_string(),
                group_id: Some("grp-1".to_string()),
                tenant_id: Some("ten-1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_not_found_carries_request_id() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/rest/orgs/missing");
            then.status(404)
                .header("snyk-request-id", "req-404")
                .json_body(json!({"errors": [{"status": "404", "detail": "Org missing not found"}]}));
        });

        let err = client(&server).get_organization("missing").await.unwrap_err();
        assert!(err.is_not_found());
        match err {
            ApiError::Status {
                message,
                request_id,
                method,
                ..
            } => {
                assert_eq!(message, "Org missing not found");
                assert_eq!(request_id.as_deref(), Some("req-404"));
                assert_eq!(method, "GET");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_organization_v1() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/org")
                .header("authorization", "token t0k3n")
                .json_body(json!({"name": "Platform", "groupId": "grp-1"}));
            then.status(201).json_body(json!({
                "id": "org-1",
                "name": "Platform",
                "slug": "platform",
                "group": {"id": "grp-1", "name": "Acme"}
            }));
        });

        let org = client(&server)
            .create_organization("Platform", Some("grp-1"))
            .await
            .unwrap();
        mock.assert();
        assert_eq!(org.group_id.as_deref(), Some("grp-1"));
        assert_eq!(org.tenant_id, None);
    }

    #[tokio::test]
    async fn test_create_organization_without_group_omits_field() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/org").json_body(json!({"name": "Solo"}));
            then.status(201).json_body(json!({"id": "org-2", "name": "Solo"}));
        });

        let org = client(&server).create_organization("Solo", Some("")).await.unwrap();
        mock.assert();
        assert_eq!(org.id, "org-2");
        assert_eq!(org.group_id, None);
    }

    #[tokio::test]
    async fn test_list_app_installs_expands_app() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/orgs/org-1/apps/installs")
                .query_param("expand", "app");
            then.status(200).json_body(json!({
                "data": [{
                    "id": "inst-1",
                    "type": "app_install",
                    "attributes": {"client_id": "cid"},
                    "relationships": {"app": {"data": {"id": "app-1", "type": "app", "attributes": {"name": "broker"}}}}
                }]
            }));
        });

        let installs = client(&server).list_app_installs("org-1").await.unwrap();
        mock.assert();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].app_id, "app-1");
        assert_eq!(installs[0].app_name.as_deref(), Some("broker"));
        assert_eq!(installs[0].client_id.as_deref(), Some("cid"));
        assert_eq!(installs[0].client_secret, None);
    }

    #[tokio::test]
    async fn test_create_app_install_returns_secret() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/rest/orgs/org-1/apps/installs")
                .header("content-type", JSON_API)
                .json_body(json!({
                    "data": {
                        "type": "app_install",
                        "relationships": {"app": {"data": {"id": "app-1", "type": "app"}}}
                    }
                }));
            then.status(201).json_body(json!({
                "data": {
                    "id": "inst-1",
                    "type": "app_install",
                    "attributes": {"client_id": "cid", "client_secret": "shh"}
                }
            }));
        });

        let install = client(&server).create_app_install("org-1", "app-1").await.unwrap();
        mock.assert();
        assert_eq!(install.id, "inst-1");
        assert_eq!(install.app_id, "app-1");
        assert_eq!(install.client_secret.as_deref(), Some("shh"));
    }

    #[tokio::test]
    async fn test_update_broker_deployment_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/rest/tenants/ten-1/brokers/installs/inst-1/deployments/dep-1")
                .json_body(json!({
                    "data": {
                        "id": "dep-1",
                        "type": "broker_deployment",
                        "attributes": {
                            "broker_app_installed_in_org_id": "org-1",
                            "install_id": "inst-1",
                            "metadata": {"env": "prod"}
                        }
                    }
                }));
            then.status(200).json_body(json!({
                "data": {
                    "id": "dep-1",
                    "type": "broker_deployment",
                    "attributes": {
                        "install_id": "inst-1",
                        "broker_app_installed_in_org_id": "org-1",
                        "metadata": {"env": "prod"}
                    }
                }
            }));
        });

        let request = BrokerDeploymentRequest {
            organization_id: "org-1".to_string(),
            metadata: BTreeMap::from([("env".to_string(), "prod".to_string())]),
        };
        let deployment = client(&server)
            .update_broker_deployment("ten-1", "inst-1", "dep-1", &request)
            .await
            .unwrap();
        mock.assert();
        assert_eq!(deployment.organization_id.as_deref(), Some("org-1"));
        assert_eq!(deployment.metadata.get("env").map(String::as_str), Some("prod"));
    }

    #[tokio::test]
    async fn test_create_credential_accepts_array_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/rest/tenants/ten-1/brokers/installs/inst-1/deployments/dep-1/credentials");
            then.status(201).json_body(json!({
                "data": [{
                    "id": "cred-1",
                    "type": "deployment_credential",
                    "attributes": {
                        "deployment_id": "dep-1",
                        "environment_variable_name": "GITHUB_TOKEN",
                        "type": "github"
                    }
                }]
            }));
        });

        let request = BrokerDeploymentCredentialRequest {
            environment_variable_name: "GITHUB_TOKEN".to_string(),
            connection_type: "github".to_string(),
        };
        let credential = client(&server)
            .create_broker_deployment_credential("ten-1", "inst-1", "dep-1", &request)
            .await
            .unwrap();
        assert_eq!(credential.id, "cred-1");
        assert_eq!(credential.connection_type, "github");
        assert_eq!(credential.deployment_id, "dep-1");
    }

    #[tokio::test]
    async fn test_list_integrations_map() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/org/org-1/integrations");
            then.status(200)
                .json_body(json!({"github": "int-gh", "gitlab": "int-gl"}));
        });

        let integrations = client(&server).list_integrations("org-1").await.unwrap();
        assert_eq!(integrations.get("github").map(String::as_str), Some("int-gh"));
        assert_eq!(integrations.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_integration_credentials() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(DELETE)
                .path("/v1/org/org-1/integrations/int-1/authentication");
            then.status(200).body("");
        });

        client(&server)
            .delete_integration_credentials("org-1", "int-1")
            .await
            .unwrap();
        mock.assert();
    }
}
