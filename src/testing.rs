//! Testing utilities.
//!
//! [`ProviderTester`] drives a `ProviderService` without a gRPC server and
//! [`MemorySnykApi`] stands in for the Snyk API.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use terraform_provider_snyk::testing::{MemorySnykApi, ProviderTester};
//! use terraform_provider_snyk::SnykProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_organization() {
//!     let api = Arc::new(MemorySnykApi::new());
//!     let tester = ProviderTester::new(SnykProvider::new("test").with_client(api.clone()));
//!
//!     let state = tester
//!         .lifecycle_create("snyk_organization", json!({"name": "Platform"}))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(state["name"], "Platform");
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{
    ApiResult, AppInstall, BrokerDeployment, BrokerDeploymentCredential, BrokerDeploymentCredentialRequest,
    BrokerDeploymentRequest, Group, Integration, IntegrationCredentials, IntegrationRequest, IntegrationSettings,
    Organization, Project, SnykApi, User,
};
use crate::error::{ApiError, ProviderError};
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// A test harness for `ProviderService` implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration; error diagnostics become `Err`.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider; error diagnostics become `Err`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(&self, resource_type: &str, config: Value) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(&self, resource_type: &str, config: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(&self, resource_type: &str, prior_state: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource. `None` means it is gone.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(&self, data_source_type: &str, config: Value) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read data from a data source.
    pub async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Plan, create and read back a resource.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Value) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read_existing(resource_type, created).await
    }

    /// Plan, update and read back a resource.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read_existing(resource_type, updated).await
    }

    /// Plan and run a deletion.
    pub async fn lifecycle_delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    async fn read_existing(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.read(resource_type, state).await?.ok_or_else(|| {
            ProviderError::failed(
                "Resource disappeared",
                format!("{} was removed right after it was written", resource_type),
            )
        })
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl TestError {
    /// Diagnostics carried by the error, whichever way it failed.
    pub fn diagnostics(self) -> Vec<Diagnostic> {
        match self {
            TestError::Diagnostics(diags) => diags,
            TestError::Provider(e) => e.into_diagnostics(),
        }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan changes things without replacing the resource.
///
/// # Panics
///
/// Panics if the plan is empty or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a provider error reports the given summary.
///
/// # Panics
///
/// Panics if no error diagnostic has exactly this summary.
pub fn assert_error_summary(err: ProviderError, summary: &str) {
    let diagnostics = err.into_diagnostics();
    assert!(
        diagnostics.iter().any(|d| d.is_error() && d.summary == summary),
        "Expected an error '{}', got: {:?}",
        summary,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

// =========================================================================
// In-memory Snyk API
// =========================================================================

#[derive(Debug)]
struct StoredInstall {
    organization_id: String,
    install: AppInstall,
}

#[derive(Debug)]
struct StoredDeployment {
    tenant_id: String,
    deployment: BrokerDeployment,
}

#[derive(Debug)]
struct StoredIntegration {
    organization_id: String,
    integration_type: String,
    credentials: Option<IntegrationCredentials>,
    settings: IntegrationSettings,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, u16>,
    organizations: BTreeMap<String, Organization>,
    groups: BTreeMap<String, Group>,
    pending_tenants: HashMap<String, (usize, String)>,
    default_tenant: Option<(usize, String)>,
    users: BTreeMap<String, User>,
    self_user: Option<User>,
    projects: Vec<(String, Project)>,
    apps: HashMap<String, String>,
    installs: BTreeMap<String, StoredInstall>,
    deployments: BTreeMap<String, StoredDeployment>,
    credentials: BTreeMap<String, BrokerDeploymentCredential>,
    integrations: BTreeMap<String, StoredIntegration>,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn enter(&mut self, operation: &'static str) -> ApiResult<()> {
        self.calls.push(operation);
        match self.failures.get(operation) {
            Some(status) => Err(ApiError::status(*status, format!("{} failed", operation))),
            None => Ok(()),
        }
    }

    fn organization(&self, id: &str) -> ApiResult<&Organization> {
        self.organizations
            .get(id)
            .ok_or_else(|| ApiError::not_found(format!("organization {} not found", id)))
    }

    fn deployment(&mut self, tenant_id: &str, install_id: &str, id: &str) -> ApiResult<&mut BrokerDeployment> {
        self.deployments
            .get_mut(id)
            .filter(|d| d.tenant_id == tenant_id && d.deployment.app_install_id == install_id)
            .map(|d| &mut d.deployment)
            .ok_or_else(|| ApiError::not_found(format!("broker deployment {} not found", id)))
    }

    fn integration(&mut self, organization_id: &str, id: &str) -> ApiResult<&mut StoredIntegration> {
        self.integrations
            .get_mut(id)
            .filter(|i| i.organization_id == organization_id)
            .ok_or_else(|| ApiError::not_found(format!("integration {} not found", id)))
    }
}

/// An in-memory [`SnykApi`] with the same not-found behavior as the real API.
///
/// Every call is recorded under its method name, see [`MemorySnykApi::calls`];
/// [`MemorySnykApi::fail`] makes a method fail with a status code.
#[derive(Debug, Default)]
pub struct MemorySnykApi {
    state: Mutex<MemoryState>,
}

impl MemorySnykApi {
    /// An empty API.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Method names of all calls so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    /// Make every call of `operation` fail with `status`.
    pub fn fail(&self, operation: &'static str, status: u16) {
        self.lock().failures.insert(operation, status);
    }

    /// Organizations created without a tenant get `tenant_id` after
    /// `after_reads` further reads.
    pub fn assign_tenant_later(&self, tenant_id: &str, after_reads: usize) {
        self.lock().default_tenant = Some((after_reads, tenant_id.to_string()));
    }

    /// Add a group.
    pub fn insert_group(&self, id: &str, name: &str, tenant_id: Option<&str>) -> Group {
        let group = Group {
            id: id.to_string(),
            name: name.to_string(),
            tenant_id: tenant_id.map(str::to_string),
        };
        self.lock().groups.insert(group.id.clone(), group.clone());
        group
    }

    /// Add an organization.
    pub fn insert_organization(&self, name: &str, group_id: Option<&str>, tenant_id: Option<&str>) -> Organization {
        let mut state = self.lock();
        let organization = Organization {
            id: state.next_id("org"),
            name: name.to_string(),
            slug: slugify(name),
            group_id: group_id.map(str::to_string),
            tenant_id: tenant_id.map(str::to_string),
        };
        state
            .organizations
            .insert(organization.id.clone(), organization.clone());
        organization
    }

    /// Current copy of an organization.
    pub fn organization(&self, id: &str) -> Option<Organization> {
        self.lock().organizations.get(id).cloned()
    }

    /// Add a user; `is_self` also makes it the token owner.
    pub fn insert_user(&self, user: User, is_self: bool) {
        let mut state = self.lock();
        if is_self {
            state.self_user = Some(user.clone());
        }
        state.users.insert(user.id.clone(), user);
    }

    /// Add a project.
    pub fn insert_project(&self, organization_id: &str, name: &str) -> Project {
        let mut state = self.lock();
        let project = Project {
            id: state.next_id("proj"),
            name: name.to_string(),
        };
        state
            .projects
            .push((organization_id.to_string(), project.clone()));
        project
    }

    /// Make an app known so installs report its name.
    pub fn register_app(&self, app_id: &str, name: &str) {
        self.lock()
            .apps
            .insert(app_id.to_string(), name.to_string());
    }

    /// Install an app without going through the API.
    pub fn insert_app_install(&self, organization_id: &str, app_id: &str) -> AppInstall {
        let mut state = self.lock();
        let install = new_install(&mut *state, app_id);
        state.installs.insert(
            install.id.clone(),
            StoredInstall {
                organization_id: organization_id.to_string(),
                install: install.clone(),
            },
        );
        install
    }

    /// App installs of an organization.
    pub fn app_installs(&self, organization_id: &str) -> Vec<AppInstall> {
        self.lock()
            .installs
            .values()
            .filter(|i| i.organization_id == organization_id)
            .map(|i| i.install.clone())
            .collect()
    }

    /// Current copy of a broker deployment.
    pub fn broker_deployment(&self, id: &str) -> Option<BrokerDeployment> {
        self.lock()
            .deployments
            .get(id)
            .map(|d| d.deployment.clone())
    }

    /// Current copy of a broker deployment credential.
    pub fn broker_deployment_credential(&self, id: &str) -> Option<BrokerDeploymentCredential> {
        self.lock().credentials.get(id).cloned()
    }

    /// Add an integration with no credentials.
    pub fn insert_integration(&self, organization_id: &str, integration_type: &str) -> String {
        let mut state = self.lock();
        let id = state.next_id("int");
        state.integrations.insert(
            id.clone(),
            StoredIntegration {
                organization_id: organization_id.to_string(),
                integration_type: integration_type.to_string(),
                credentials: None,
                settings: IntegrationSettings::default(),
            },
        );
        id
    }

    /// Stored credentials of an integration.
    pub fn integration_credentials(&self, id: &str) -> Option<IntegrationCredentials> {
        self.lock()
            .integrations
            .get(id)
            .and_then(|i| i.credentials.clone())
    }

    /// Stored settings of an integration.
    pub fn integration_settings(&self, id: &str) -> Option<IntegrationSettings> {
        self.lock()
            .integrations
            .get(id)
            .map(|i| i.settings.clone())
    }
}

fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

fn new_install(state: &mut MemoryState, app_id: &str) -> AppInstall {
    let id = state.next_id("inst");
    AppInstall {
        client_id: Some(format!("client-{}", id)),
        client_secret: None,
        app_name: state.apps.get(app_id).cloned(),
        app_id: app_id.to_string(),
        id,
    }
}

fn merge_settings(current: &mut IntegrationSettings, update: &IntegrationSettings) {
    macro_rules! merge {
        ($($field:ident),*) => {
            $(if update.$field.is_some() {
                current.$field = update.$field.clone();
            })*
        };
    }
    merge!(
        dependency_upgrade_enabled,
        dependency_upgrade_ignored_dependencies,
        dependency_upgrade_include_major_version,
        dependency_upgrade_limit,
        pull_request_test_enabled,
        pull_request_fail_on_any_issue,
        pull_request_fail_only_for_high_and_critical_severity,
        pull_request_fail_only_for_issues_with_fix
    );
}

#[async_trait]
impl SnykApi for MemorySnykApi {
    async fn create_organization(&self, name: &str, group_id: Option<&str>) -> ApiResult<Organization> {
        let mut state = self.lock();
        state.enter("create_organization")?;
        let group_id = group_id.filter(|g| !g.is_empty()).map(str::to_string);
        let tenant_id = group_id
            .as_ref()
            .and_then(|g| state.groups.get(g))
            .and_then(|g| g.tenant_id.clone());
        let organization = Organization {
            id: state.next_id("org"),
            name: name.to_string(),
            slug: slugify(name),
            group_id,
            tenant_id: None,
        };
        let mut stored = organization.clone();
        match (tenant_id, state.default_tenant.clone()) {
            (Some(tenant_id), _) => stored.tenant_id = Some(tenant_id),
            (None, Some(pending)) => {
                state.pending_tenants.insert(stored.id.clone(), pending);
            },
            (None, None) => {},
        }
        state.organizations.insert(stored.id.clone(), stored);
        Ok(organization)
    }

    async fn get_organization(&self, organization_id: &str) -> ApiResult<Organization> {
        let mut state = self.lock();
        state.enter("get_organization")?;
        if let Some((remaining, tenant_id)) = state.pending_tenants.remove(organization_id) {
            if remaining == 0 {
                if let Some(org) = state.organizations.get_mut(organization_id) {
                    org.tenant_id = Some(tenant_id);
                }
            } else {
                state
                    .pending_tenants
                    .insert(organization_id.to_string(), (remaining - 1, tenant_id));
            }
        }
        state.organization(organization_id).cloned()
    }

    async fn list_organizations(&self) -> ApiResult<Vec<Organization>> {
        let mut state = self.lock();
        state.enter("list_organizations")?;
        Ok(state.organizations.values().cloned().collect())
    }

    async fn update_organization(&self, organization_id: &str, name: &str) -> ApiResult<Organization> {
        let mut state = self.lock();
        state.enter("update_organization")?;
        let organization = state
            .organizations
            .get_mut(organization_id)
            .ok_or_else(|| ApiError::not_found(format!("organization {} not found", organization_id)))?;
        organization.name = name.to_string();
        Ok(organization.clone())
    }

    async fn delete_organization(&self, organization_id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        state.enter("delete_organization")?;
        state
            .organizations
            .remove(organization_id)
            .map(|_| ())
            .ok_or_else(|| ApiError::not_found(format!("organization {} not found", organization_id)))
    }

    async fn get_group(&self, group_id: &str) -> ApiResult<Group> {
        let mut state = self.lock();
        state.enter("get_group")?;
        state
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("group {} not found", group_id)))
    }

    async fn get_self_user(&self) -> ApiResult<User> {
        let mut state = self.lock();
        state.enter("get_self_user")?;
        state
            .self_user
            .clone()
            .ok_or_else(|| ApiError::status(401, "no token owner"))
    }

    async fn get_user(&self, user_id: &str) -> ApiResult<User> {
        let mut state = self.lock();
        state.enter("get_user")?;
        state
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("user {} not found", user_id)))
    }

    async fn list_projects(&self, organization_id: &str, name: Option<&str>) -> ApiResult<Vec<Project>> {
        let mut state = self.lock();
        state.enter("list_projects")?;
        Ok(state
            .projects
            .iter()
            .filter(|(org, p)| org == organization_id && name.map_or(true, |n| p.name == n))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn create_app_install(&self, organization_id: &str, app_id: &str) -> ApiResult<AppInstall> {
        let mut state = self.lock();
        state.enter("create_app_install")?;
        state.organization(organization_id)?;
        let install = new_install(&mut *state, app_id);
        state.installs.insert(
            install.id.clone(),
            StoredInstall {
                organization_id: organization_id.to_string(),
                install: install.clone(),
            },
        );
        Ok(AppInstall {
            client_secret: Some(format!("secret-{}", install.id)),
            ..install
        })
    }

    async fn list_app_installs(&self, organization_id: &str) -> ApiResult<Vec<AppInstall>> {
        let mut state = self.lock();
        state.enter("list_app_installs")?;
        Ok(state
            .installs
            .values()
            .filter(|i| i.organization_id == organization_id)
            .map(|i| i.install.clone())
            .collect())
    }

    async fn delete_app_install(&self, organization_id: &str, install_id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        state.enter("delete_app_install")?;
        let owned = state
            .installs
            .get(install_id)
            .is_some_and(|i| i.organization_id == organization_id);
        if !owned {
            return Err(ApiError::not_found(format!("app install {} not found", install_id)));
        }
        state.installs.remove(install_id);
        Ok(())
    }

    async fn create_broker_deployment(
        &self,
        tenant_id: &str,
        install_id: &str,
        request: &BrokerDeploymentRequest,
    ) -> ApiResult<BrokerDeployment> {
        let mut state = self.lock();
        state.enter("create_broker_deployment")?;
        if !state.installs.contains_key(install_id) {
            return Err(ApiError::not_found(format!("app install {} not found", install_id)));
        }
        let deployment = BrokerDeployment {
            id: state.next_id("dep"),
            app_install_id: install_id.to_string(),
            organization_id: Some(request.organization_id.clone()),
            metadata: request.metadata.clone(),
        };
        state.deployments.insert(
            deployment.id.clone(),
            StoredDeployment {
                tenant_id: tenant_id.to_string(),
                deployment: deployment.clone(),
            },
        );
        Ok(deployment)
    }

    async fn list_broker_deployments(&self, tenant_id: &str, install_id: &str) -> ApiResult<Vec<BrokerDeployment>> {
        let mut state = self.lock();
        state.enter("list_broker_deployments")?;
        if !state.installs.contains_key(install_id) {
            return Err(ApiError::not_found(format!("app install {} not found", install_id)));
        }
        Ok(state
            .deployments
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.deployment.app_install_id == install_id)
            .map(|d| d.deployment.clone())
            .collect())
    }

    async fn update_broker_deployment(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        request: &BrokerDeploymentRequest,
    ) -> ApiResult<BrokerDeployment> {
        let mut state = self.lock();
        state.enter("update_broker_deployment")?;
        let deployment = state.deployment(tenant_id, install_id, deployment_id)?;
        deployment.organization_id = Some(request.organization_id.clone());
        deployment.metadata = request.metadata.clone();
        Ok(deployment.clone())
    }

    async fn delete_broker_deployment(&self, tenant_id: &str, install_id: &str, deployment_id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        state.enter("delete_broker_deployment")?;
        state.deployment(tenant_id, install_id, deployment_id)?;
        state.deployments.remove(deployment_id);
        Ok(())
    }

    async fn create_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        request: &BrokerDeploymentCredentialRequest,
    ) -> ApiResult<BrokerDeploymentCredential> {
        let mut state = self.lock();
        state.enter("create_broker_deployment_credential")?;
        state.deployment(tenant_id, install_id, deployment_id)?;
        let credential = BrokerDeploymentCredential {
            id: state.next_id("cred"),
            deployment_id: deployment_id.to_string(),
            environment_variable_name: request.environment_variable_name.clone(),
            connection_type: request.connection_type.clone(),
        };
        state
            .credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(credential)
    }

    async fn get_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
    ) -> ApiResult<BrokerDeploymentCredential> {
        let mut state = self.lock();
        state.enter("get_broker_deployment_credential")?;
        state.deployment(tenant_id, install_id, deployment_id)?;
        state
            .credentials
            .get(credential_id)
            .filter(|c| c.deployment_id == deployment_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("credential {} not found", credential_id)))
    }

    async fn update_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
        request: &BrokerDeploymentCredentialRequest,
    ) -> ApiResult<BrokerDeploymentCredential> {
        let mut state = self.lock();
        state.enter("update_broker_deployment_credential")?;
        state.deployment(tenant_id, install_id, deployment_id)?;
        let credential = state
            .credentials
            .get_mut(credential_id)
            .filter(|c| c.deployment_id == deployment_id)
            .ok_or_else(|| ApiError::not_found(format!("credential {} not found", credential_id)))?;
        credential.environment_variable_name = request.environment_variable_name.clone();
        credential.connection_type = request.connection_type.clone();
        Ok(credential.clone())
    }

    async fn delete_broker_deployment_credential(
        &self,
        tenant_id: &str,
        install_id: &str,
        deployment_id: &str,
        credential_id: &str,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        state.enter("delete_broker_deployment_credential")?;
        state.deployment(tenant_id, install_id, deployment_id)?;
        state
            .credentials
            .remove(credential_id)
            .map(|_| ())
            .ok_or_else(|| ApiError::not_found(format!("credential {} not found", credential_id)))
    }

    async fn list_integrations(&self, organization_id: &str) -> ApiResult<BTreeMap<String, String>> {
        let mut state = self.lock();
        state.enter("list_integrations")?;
        Ok(state
            .integrations
            .iter()
            .filter(|(_, i)| i.organization_id == organization_id)
            .map(|(id, i)| (i.integration_type.clone(), id.clone()))
            .collect())
    }

    async fn create_integration(&self, organization_id: &str, request: &IntegrationRequest) -> ApiResult<Integration> {
        let mut state = self.lock();
        state.enter("create_integration")?;
        let exists = state
            .integrations
            .values()
            .any(|i| i.organization_id == organization_id && i.integration_type == request.integration_type);
        if exists {
            return Err(ApiError::status(409, "integration already exists"));
        }
        let id = state.next_id("int");
        state.integrations.insert(
            id.clone(),
            StoredIntegration {
                organization_id: organization_id.to_string(),
                integration_type: request.integration_type.clone(),
                credentials: Some(request.credentials.clone()),
                settings: IntegrationSettings::default(),
            },
        );
        Ok(Integration {
            id,
            integration_type: Some(request.integration_type.clone()),
        })
    }

    async fn update_integration(
        &self,
        organization_id: &str,
        integration_id: &str,
        request: &IntegrationRequest,
    ) -> ApiResult<Integration> {
        let mut state = self.lock();
        state.enter("update_integration")?;
        let integration = state.integration(organization_id, integration_id)?;
        integration.credentials = Some(request.credentials.clone());
        Ok(Integration {
            id: integration_id.to_string(),
            integration_type: Some(integration.integration_type.clone()),
        })
    }

    async fn get_integration_by_type(&self, organization_id: &str, integration_type: &str) -> ApiResult<Integration> {
        let mut state = self.lock();
        state.enter("get_integration_by_type")?;
        state
            .integrations
            .iter()
            .find(|(_, i)| i.organization_id == organization_id && i.integration_type == integration_type)
            .map(|(id, i)| Integration {
                id: id.clone(),
                integration_type: Some(i.integration_type.clone()),
            })
            .ok_or_else(|| ApiError::not_found(format!("no {} integration", integration_type)))
    }

    async fn get_integration_settings(&self, organization_id: &str, integration_id: &str) -> ApiResult<IntegrationSettings> {
        let mut state = self.lock();
        state.enter("get_integration_settings")?;
        Ok(state
            .integration(organization_id, integration_id)?
            .settings
            .clone())
    }

    async fn update_integration_settings(
        &self,
        organization_id: &str,
        integration_id: &str,
        settings: &IntegrationSettings,
    ) -> ApiResult<IntegrationSettings> {
        let mut state = self.lock();
        state.enter("update_integration_settings")?;
        let integration = state.integration(organization_id, integration_id)?;
        merge_settings(&mut integration.settings, settings);
        Ok(integration.settings.clone())
    }

    async fn delete_integration_credentials(&self, organization_id: &str, integration_id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        state.enter("delete_integration_credentials")?;
        state.integration(organization_id, integration_id)?.credentials = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Schema};
    use crate::types::AttributeChange;
    use serde_json::json;

    // Minimal provider for exercising the tester itself.
    struct EchoProvider;

    #[async_trait]
    impl ProviderService for EchoProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new().with_resource(
                "echo",
                Schema::v0()
                    .with_attribute("name", Attribute::required_string())
                    .with_attribute("id", Attribute::computed_string()),
            )
        }

        async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![Diagnostic::warning("configured")])
        }

        async fn plan(
            &self,
            _resource_type: &str,
            prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            match prior_state {
                Some(prior) if prior == proposed_state => Ok(PlanResult::no_change(prior)),
                _ => Ok(PlanResult::with_changes(
                    proposed_state.clone(),
                    vec![AttributeChange::added("name", proposed_state["name"].clone())],
                    false,
                )),
            }
        }

        async fn create(&self, _resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn read(&self, _resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
            Ok(Some(current_state).filter(|s| s["name"] != "gone"))
        }

        async fn update(&self, _resource_type: &str, _prior_state: Value, planned_state: Value) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn delete(&self, _resource_type: &str, _current_state: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tester_lifecycle() {
        let tester = ProviderTester::new(EchoProvider);
        assert!(tester.configure(json!({})).await.is_ok());
        assert_eq!(tester.resource_types(), vec!["echo".to_string()]);

        let state = tester
            .lifecycle_create("echo", json!({"name": "a"}))
            .await
            .unwrap();
        assert_eq!(state["name"], "a");

        let plan = tester.plan_update("echo", state.clone(), state.clone()).await.unwrap();
        assert_plan_no_changes(&plan);

        let err = tester
            .lifecycle_create("echo", json!({"name": "gone"}))
            .await
            .unwrap_err();
        assert_error_summary(err, "Resource disappeared");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("field1"));
        assert!(display.contains("More info"));
        assert_error_contains(&err.diagnostics(), "Second");
    }

    #[tokio::test]
    async fn test_memory_api_records_and_fails_calls() {
        let api = MemorySnykApi::new();
        let org = api.insert_organization("Platform Team", None, None);
        assert_eq!(org.slug, "platform-team");

        api.get_organization(&org.id).await.unwrap();
        api.fail("get_organization", 503);
        let err = api.get_organization(&org.id).await.unwrap_err();
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(api.calls(), vec!["get_organization", "get_organization"]);

        let err = api.get_group("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_memory_api_assigns_tenant_later() {
        let api = MemorySnykApi::new();
        api.assign_tenant_later("ten-9", 1);
        let org = api.create_organization("Late", None).await.unwrap();

        assert_eq!(api.get_organization(&org.id).await.unwrap().tenant_id, None);
        assert_eq!(
            api.get_organization(&org.id).await.unwrap().tenant_id.as_deref(),
            Some("ten-9")
        );
    }

    #[tokio::test]
    async fn test_memory_api_settings_merge() {
        let api = MemorySnykApi::new();
        let id = api.insert_integration("org-1", "github");

        api.update_integration_settings(
            "org-1",
            &id,
            &IntegrationSettings {
                pull_request_test_enabled: Some(true),
                dependency_upgrade_limit: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let merged = api
            .update_integration_settings(
                "org-1",
                &id,
                &IntegrationSettings {
                    dependency_upgrade_limit: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(merged.pull_request_test_enabled, Some(true));
        assert_eq!(merged.dependency_upgrade_limit, Some(5));
        assert!(api
            .get_integration_settings("org-2", &id)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
