//! Domain models returned by [`SnykApi`](super::SnykApi).
//!
//! These are flat views of the REST (JSON:API) and V1 payloads; the HTTP
//! client takes care of unwrapping envelopes.

// field names mirror the API attributes
#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A Snyk organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub group_id: Option<String>,
    /// Set asynchronously by Snyk some time after the organization is created.
    pub tenant_id: Option<String>,
}

/// A Snyk group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub tenant_id: Option<String>,
}

/// A Snyk user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    pub id: String,
    pub name: String,
    pub username: String,
    pub email: String,
}

/// A project inside an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// An installation of a Snyk App in an organization.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppInstall {
    pub id: String,
    pub app_id: String,
    pub app_name: Option<String>,
    pub client_id: Option<String>,
    /// Only returned once, by the create call.
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for AppInstall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppInstall")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("app_name", &self.app_name)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A Universal Broker deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BrokerDeployment {
    pub id: String,
    pub app_install_id: String,
    pub organization_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Payload for creating or updating a broker deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BrokerDeploymentRequest {
    pub organization_id: String,
    pub metadata: BTreeMap<String, String>,
}

/// A credential (environment variable reference) of a broker deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BrokerDeploymentCredential {
    pub id: String,
    pub deployment_id: String,
    pub environment_variable_name: String,
    pub connection_type: String,
}

/// Payload for creating or updating a broker deployment credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BrokerDeploymentCredentialRequest {
    pub environment_variable_name: String,
    pub connection_type: String,
}

/// A V1 integration of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Integration {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub integration_type: Option<String>,
}

/// Credentials sent when creating or updating an integration.
///
/// Empty values are left out of the request body.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationCredentials {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_base: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl std::fmt::Debug for IntegrationCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &String| if s.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("IntegrationCredentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("region", &self.region)
            .field("registry_base", &self.registry_base)
            .field("role_arn", &self.role_arn)
            .field("token", &redact(&self.token))
            .field("url", &self.url)
            .finish()
    }
}

/// Body of integration create and update calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationRequest {
    #[serde(rename = "type")]
    pub integration_type: String,
    pub credentials: IntegrationCredentials,
}

/// Pull request settings of an integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IntegrationSettings {
    #[serde(rename = "autoDepUpgradeEnabled", skip_serializing_if = "Option::is_none")]
    pub dependency_upgrade_enabled: Option<bool>,
    #[serde(
        rename = "autoDepUpgradeIgnoredDependencies",
        skip_serializing_if = "Option::is_none"
    )]
    pub dependency_upgrade_ignored_dependencies: Option<Vec<String>>,
    #[serde(rename = "isMajorUpgradeEnabled", skip_serializing_if = "Option::is_none")]
    pub dependency_upgrade_include_major_version: Option<bool>,
    #[serde(rename = "autoDepUpgradeLimit", skip_serializing_if = "Option::is_none")]
    pub dependency_upgrade_limit: Option<i64>,
    #[serde(rename = "pullRequestTestEnabled", skip_serializing_if = "Option::is_none")]
    pub pull_request_test_enabled: Option<bool>,
    #[serde(rename = "pullRequestFailOnAnyVulns", skip_serializing_if = "Option::is_none")]
    pub pull_request_fail_on_any_issue: Option<bool>,
    #[serde(
        rename = "pullRequestFailOnlyForHighSeverity",
        skip_serializing_if = "Option::is_none"
    )]
    pub pull_request_fail_only_for_high_and_critical_severity: Option<bool>,
    #[serde(
        rename = "pullRequestFailOnlyForIssuesWithFix",
        skip_serializing_if = "Option::is_none"
    )]
    pub pull_request_fail_only_for_issues_with_fix: Option<bool>,
}
