//! Terraform provider for Snyk
//!
//! Manages Snyk organizations, app installations, Universal Broker
//! deployments with their credentials and SCM integrations, and looks up
//! existing users, projects, organizations and app installations.
//!
//! # Overview
//!
//! - **Plugin server**: [`serve`] speaks the provider gRPC protocol and
//!   prints the handshake line the host waits for
//! - **Provider**: [`SnykProvider`] resolves region and token, builds the
//!   API client in `Configure` and dispatches all calls by type name
//! - **Client**: [`client::SnykClient`] talks to the REST and V1 APIs,
//!   [`client::SnykApi`] is the seam every handler is written against
//! - **Handlers**: [`resources`] and [`data_sources`]
//! - **Helpers**: polling, search disambiguation and import ID parsing in
//!   [`helper`]
//!
//! # Quick Start
//!
//! ```ignore
//! use terraform_provider_snyk::{serve, SnykProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     serve(SnykProvider::new(env!("CARGO_PKG_VERSION"))).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! Once the server listens, one line goes to stdout:
//!
//! ```text
//! 1|1|tcp|127.0.0.1:50051|grpc
//! ```
//!
//! Format: `<core_version>|<app_version>|tcp|<address>|grpc`
//!
//! The host only launches plugins with `TF_PLUGIN_MAGIC_COOKIE` set. In
//! debug mode the cookie check is skipped and reattach settings are printed
//! instead.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod data_sources;
pub mod error;
pub mod helper;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use error::{ApiError, ProviderError};
pub use logging::{init_logging, init_logging_with_default};
pub use provider::SnykProvider;
pub use schema::ProviderSchema;
pub use server::{serve, serve_on, serve_on_listener, serve_with_options, ProviderService, ServeOptions};
pub use types::{ImportedResource, PlanResult};
