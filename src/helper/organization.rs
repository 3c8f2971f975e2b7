//! Organization lookups shared by resources: waiting for a new organization
//! to be attached to a tenant and finding the organization of an app install.

use std::time::Duration;

use tracing::{info, trace};

use super::wait::{StateChangeConf, WaitError};
use crate::client::{ApiResult, Organization, SnykApi};
use crate::error::ProviderError;

/// The organization reports a tenant.
pub const TENANT_ID_POPULATED: &str = "tenantIDPopulated";
/// The organization has no tenant yet.
pub const TENANT_ID_NOT_POPULATED: &str = "tenantIDNotPopulated";

/// Polling settings for [`wait_organization_tenant_id_populated`].
pub fn tenant_id_wait_conf() -> StateChangeConf {
    StateChangeConf::new(
        &[TENANT_ID_NOT_POPULATED],
        &[TENANT_ID_POPULATED],
        Duration::from_secs(10 * 60),
    )
    .with_delay(Duration::from_secs(3))
    .with_min_timeout(Duration::from_secs(5))
}

/// Fetch the organization and classify its tenant state.
pub async fn organization_tenant_state(
    client: &dyn SnykApi,
    organization_id: &str,
) -> ApiResult<(Organization, String)> {
    let organization = client.get_organization(organization_id).await?;
    let state = if organization.tenant_id.as_deref().is_some_and(|t| !t.is_empty()) {
        TENANT_ID_POPULATED
    } else {
        TENANT_ID_NOT_POPULATED
    };
    trace!(org_id = %organization_id, state, "Checked organization tenant");
    Ok((organization, state.to_string()))
}

/// Block until the organization reports a tenant and return it.
pub async fn wait_organization_tenant_id_populated(
    client: &dyn SnykApi,
    organization_id: &str,
) -> Result<Organization, ProviderError> {
    wait_organization_tenant_id_populated_with(client, organization_id, &tenant_id_wait_conf()).await
}

/// [`wait_organization_tenant_id_populated`] with custom polling settings.
pub async fn wait_organization_tenant_id_populated_with(
    client: &dyn SnykApi,
    organization_id: &str,
    conf: &StateChangeConf,
) -> Result<Organization, ProviderError> {
    conf.wait_for_state(|| organization_tenant_state(client, organization_id))
        .await
        .map_err(|e: WaitError| {
            ProviderError::failed(
                "Unable to get organization",
                format!(
                    "failed to wait for organization ({}) to become tenant_id set: {}",
                    organization_id, e
                ),
            )
        })
}

/// Find the organization an app is installed in by looking through every
/// organization the token can access.
pub async fn find_organization_for_app_install(client: &dyn SnykApi, app_install_id: &str) -> Result<String, ProviderError> {
    info!(app_install_id = %app_install_id, "Searching in all accessible organizations for app install");

    trace!("Getting all accessible organizations");
    let organizations = client
        .list_organizations()
        .await
        .map_err(|e| ProviderError::api("Unable to get organizations", e))?;

    for org in organizations {
        let installs = client
            .list_app_installs(&org.id)
            .await
            .map_err(|e| ProviderError::api("Unable to get app installs", e))?;
        if installs.iter().any(|i| i.id == app_install_id) {
            info!(organization_id = %org.id, organization_name = %org.name, "Found org for configured app install");
            return Ok(org.id);
        }
    }

    Err(ProviderError::failed(
        "Unable to find organization",
        format!("No organization with app installation ({}) was found.", app_install_id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySnykApi;

    fn fast_conf() -> StateChangeConf {
        StateChangeConf::new(
            &[TENANT_ID_NOT_POPULATED],
            &[TENANT_ID_POPULATED],
            Duration::from_millis(300),
        )
    }

    #[test]
    fn test_default_conf() {
        let conf = tenant_id_wait_conf();
        assert_eq!(conf.delay, Duration::from_secs(3));
        assert_eq!(conf.min_timeout, Duration::from_secs(5));
        assert_eq!(conf.timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_tenant_already_populated() {
        let api = MemorySnykApi::new();
        let org = api.insert_organization("Platform", None, Some("ten-1"));

        let found = wait_organization_tenant_id_populated_with(&api, &org.id, &fast_conf())
            .await
            .unwrap();
        assert_eq!(found.tenant_id.as_deref(), Some("ten-1"));
    }

    #[tokio::test]
    async fn test_tenant_never_populated() {
        let api = MemorySnykApi::new();
        let org = api.insert_organization("Platform", None, None);

        let err = wait_organization_tenant_id_populated_with(&api, &org.id, &fast_conf())
            .await
            .unwrap_err();
        let diagnostics = err.into_diagnostics();
        assert_eq!(diagnostics[0].summary, "Unable to get organization");
        let detail = diagnostics[0].detail.clone().unwrap_or_default();
        assert!(detail.starts_with(&format!(
            "failed to wait for organization ({}) to become tenant_id set",
            org.id
        )));
    }

    #[tokio::test]
    async fn test_find_organization_for_app_install() {
        let api = MemorySnykApi::new();
        api.insert_organization("Empty", None, None);
        let org = api.insert_organization("Platform", None, None);
        let install = api.insert_app_install(&org.id, "app-1");

        let found = find_organization_for_app_install(&api, &install.id).await.unwrap();
        assert_eq!(found, org.id);

        let err = find_organization_for_app_install(&api, "inst-missing")
            .await
            .unwrap_err();
        let diagnostics = err.into_diagnostics();
        assert_eq!(diagnostics[0].summary, "Unable to find organization");
        assert_eq!(
            diagnostics[0].detail.as_deref(),
            Some("No organization with app installation (inst-missing) was found.")
        );
    }

    #[tokio::test]
    async fn test_missing_organization_fails_fast() {
        let api = MemorySnykApi::new();
        let err = wait_organization_tenant_id_populated_with(&api, "nope", &fast_conf())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to wait for organization (nope)"));
    }
}
