//! Data sources of the provider.

mod app_install;
mod organization;
mod project;
mod user;

pub use app_install::AppInstallDataSource;
pub use organization::OrganizationDataSource;
pub use project::ProjectDataSource;
pub use user::UserDataSource;

use crate::resource::DataSource;

/// Every data source the provider serves.
pub fn all() -> Vec<Box<dyn DataSource>> {
    vec![
        Box::new(AppInstallDataSource),
        Box::new(OrganizationDataSource),
        Box::new(ProjectDataSource),
        Box::new(UserDataSource),
    ]
}
