//! Managed resources.

mod app_install;
mod broker_deployment;
mod broker_deployment_credential;
mod integration;
mod organization;

pub use app_install::AppInstallResource;
pub use broker_deployment::BrokerDeploymentResource;
pub use broker_deployment_credential::BrokerDeploymentCredentialResource;
pub use integration::{IntegrationResource, INTEGRATION_TYPES};
pub use organization::OrganizationResource;

use crate::resource::Resource;

/// Every resource the provider registers.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(AppInstallResource),
        Box::new(BrokerDeploymentResource),
        Box::new(BrokerDeploymentCredentialResource),
        Box::new(IntegrationResource),
        Box::new(OrganizationResource::default()),
    ]
}
