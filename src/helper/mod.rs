//! Small utilities shared by resources and data sources.

pub mod import_id;
pub mod organization;
pub mod search;
pub mod wait;

pub use import_id::split_import_id;
pub use organization::{find_organization_for_app_install, wait_organization_tenant_id_populated};
pub use search::{find_unique, Match, SearchSubject};
pub use wait::{StateChangeConf, WaitError};
