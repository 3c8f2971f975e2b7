//! gRPC server for the provider plugin.
//!
//! This module provides the [`ProviderService`] trait and the `serve` family of
//! functions that run it behind the plugin protocol.
//!
//! # Launch
//!
//! The host launches the plugin with [`MAGIC_COOKIE_KEY`] set. The server binds
//! a free port on 127.0.0.1 and writes the handshake line
//! `1|1|tcp|127.0.0.1:PORT|grpc` to stdout. In debug mode the cookie is not
//! required and a `TF_REATTACH_PROVIDERS` value is printed instead, so that a
//! developer can attach the host to an already running provider.
//!
//! # Signal Handling
//!
//! On SIGTERM or SIGINT the server:
//! 1. Stops accepting new connections
//! 2. Waits for in-flight requests to complete, at most `shutdown_timeout`
//! 3. Calls the provider's `stop()` method

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated;
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, PlanModifier, ProviderSchema};
use crate::types::{
    handshake_line, ImportedResource, PlanResult, ProviderMetadata, MAGIC_COOKIE_KEY,
    MAGIC_COOKIE_VALUE, PROVIDER_ADDRESS, REATTACH_ENV,
};

/// Trait that provider implementations must implement.
///
/// Payloads are plain JSON values; the server takes care of the protocol
/// encoding and of turning errors into diagnostics.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. Derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.keys().cloned().collect();
        let mut data_sources: Vec<String> = schema.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
            capabilities: Default::default(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with credentials and settings.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource. `proposed_state` is `Value::Null` for a destroy.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh a resource. `Ok(None)` means it no longer exists remotely.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::failed(
            "Resource Import Not Implemented",
            format!("Import is not supported for resource type: {}", resource_type),
        ))
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read data from the remote API.
    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

/// Wrapper that implements the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<generated::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => generated::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => generated::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_proto(err: ProviderError) -> Vec<generated::Diagnostic> {
    diagnostics_to_proto(err.into_diagnostics())
}

/// Empty payloads decode to null. Anything else must be valid JSON.
fn decode(bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| ProviderError::failed("Invalid JSON payload", e.to_string()))
}

fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn schema_to_proto(schema: &crate::schema::Schema) -> generated::Schema {
    generated::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &crate::schema::Block) -> generated::Block {
    generated::Block {
        attributes: block
            .attribute_names()
            .into_iter()
            .map(|name| {
                let attr = &block.attributes[name];
                generated::Attribute {
                    name: name.to_string(),
                    r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                    required: attr.flags.required,
                    optional: attr.flags.optional,
                    computed: attr.flags.computed,
                    sensitive: attr.flags.sensitive,
                    description: attr.description.clone().unwrap_or_default(),
                    requires_replace: attr.has_modifier(PlanModifier::RequiresReplace),
                    default_value: attr.default.as_ref().map(encode).unwrap_or_default(),
                }
            })
            .collect(),
        block_types: block
            .block_names()
            .into_iter()
            .map(|name| {
                let nested = &block.blocks[name];
                generated::NestedBlock {
                    type_name: name.to_string(),
                    block: Some(block_to_proto(&nested.block)),
                    nesting_mode: generated::nested_block::NestingMode::Single as i32,
                    min_items: 0,
                    max_items: 1,
                }
            })
            .collect(),
        description: block.description.clone().unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl<P: ProviderService> generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<generated::GetMetadataRequest>,
    ) -> Result<tonic::Response<generated::GetMetadataResponse>, tonic::Status> {
        debug!("GetMetadata called");
        let metadata = self.provider.metadata();
        info!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        Ok(tonic::Response::new(generated::GetMetadataResponse {
            server_capabilities: Some(generated::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<generated::GetSchemaRequest>,
    ) -> Result<tonic::Response<generated::GetSchemaResponse>, tonic::Status> {
        debug!("GetSchema called");
        let schema = self.provider.schema();
        Ok(tonic::Response::new(generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<generated::ValidateProviderConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateProviderConfigResponse>, tonic::Status> {
        debug!("ValidateProviderConfig called");
        let req = request.into_inner();

        let result = match decode(&req.config) {
            Ok(config) => self.provider.validate_provider_config(config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(diagnostics = diagnostics.len(), "ValidateProviderConfig completed with errors");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "ValidateProviderConfig failed");
                error_to_proto(e)
            },
        };
        Ok(tonic::Response::new(generated::ValidateProviderConfigResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<generated::ConfigureRequest>,
    ) -> Result<tonic::Response<generated::ConfigureResponse>, tonic::Status> {
        debug!("Configure called");
        let req = request.into_inner();

        let result = match decode(&req.config) {
            Ok(config) => self.provider.configure(config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(diagnostics = diagnostics.len(), "Configure completed with errors");
                } else {
                    info!("Configure completed successfully");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "Configure failed");
                error_to_proto(e)
            },
        };
        Ok(tonic::Response::new(generated::ConfigureResponse { diagnostics }))
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<generated::StopRequest>,
    ) -> Result<tonic::Response<generated::StopResponse>, tonic::Status> {
        info!("Stop called");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(tonic::Response::new(generated::StopResponse { error }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<generated::ValidateResourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateResourceConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "ValidateResourceConfig called");

        let result = match decode(&req.config) {
            Ok(config) => self.provider.validate_resource_config(&req.resource_type, config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(resource_type = %req.resource_type, diagnostics = diagnostics.len(), "ValidateResourceConfig completed with errors");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "ValidateResourceConfig failed");
                error_to_proto(e)
            },
        };
        Ok(tonic::Response::new(generated::ValidateResourceConfigResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: tonic::Request<generated::UpgradeResourceStateRequest>,
    ) -> Result<tonic::Response<generated::UpgradeResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, version = req.version, "UpgradeResourceState called");

        let result = match decode(&req.raw_state) {
            Ok(raw_state) => {
                self.provider
                    .upgrade_resource_state(&req.resource_type, req.version, raw_state)
                    .await
            },
            Err(e) => Err(e),
        };
        match result {
            Ok(upgraded) => Ok(tonic::Response::new(generated::UpgradeResourceStateResponse {
                upgraded_state: encode(&upgraded),
                diagnostics: vec![],
            })),
            Err(e) => {
                error!(resource_type = %req.resource_type, version = req.version, error = %e, "UpgradeResourceState failed");
                Ok(tonic::Response::new(generated::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_to_proto(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.plan")]
    async fn plan(
        &self,
        request: tonic::Request<generated::PlanRequest>,
    ) -> Result<tonic::Response<generated::PlanResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, is_create = req.prior_state.is_empty(), "Plan called");

        let result = async {
            let prior_state = Some(decode(&req.prior_state)?).filter(|v| !v.is_null());
            let config = decode(&req.config)?;
            let proposed_state = if req.proposed_state.is_empty() {
                config.clone()
            } else {
                decode(&req.proposed_state)?
            };
            self.provider
                .plan(&req.resource_type, prior_state, proposed_state, config)
                .await
        }
        .await;

        match result {
            Ok(result) => {
                debug!(
                    resource_type = %req.resource_type,
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                Ok(tonic::Response::new(generated::PlanResponse {
                    planned_state: encode(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Plan failed");
                Ok(tonic::Response::new(generated::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_proto(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.create")]
    async fn create(
        &self,
        request: tonic::Request<generated::CreateRequest>,
    ) -> Result<tonic::Response<generated::CreateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Create called");

        let result = match decode(&req.planned_state) {
            Ok(planned_state) => self.provider.create(&req.resource_type, planned_state).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(state) => {
                info!(resource_type = %req.resource_type, "Create completed successfully");
                Ok(tonic::Response::new(generated::CreateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Create failed");
                Ok(tonic::Response::new(generated::CreateResponse {
                    state: vec![],
                    diagnostics: error_to_proto(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.read")]
    async fn read(
        &self,
        request: tonic::Request<generated::ReadRequest>,
    ) -> Result<tonic::Response<generated::ReadResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(resource_type = %req.resource_type, "Read called");

        let result = match decode(&req.current_state) {
            Ok(current_state) => self.provider.read(&req.resource_type, current_state).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(Some(state)) => Ok(tonic::Response::new(generated::ReadResponse {
                state: encode(&state),
                diagnostics: vec![],
            })),
            Ok(None) => {
                warn!(resource_type = %req.resource_type, "Resource not found, removing from state");
                Ok(tonic::Response::new(generated::ReadResponse {
                    state: vec![],
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Read failed");
                Ok(tonic::Response::new(generated::ReadResponse {
                    state: req.current_state,
                    diagnostics: error_to_proto(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.update")]
    async fn update(
        &self,
        request: tonic::Request<generated::UpdateRequest>,
    ) -> Result<tonic::Response<generated::UpdateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Update called");

        let result = async {
            let prior_state = decode(&req.prior_state)?;
            let planned_state = decode(&req.planned_state)?;
            self.provider
                .update(&req.resource_type, prior_state, planned_state)
                .await
        }
        .await;

        match result {
            Ok(state) => {
                info!(resource_type = %req.resource_type, "Update completed successfully");
                Ok(tonic::Response::new(generated::UpdateResponse {
                    state: encode(&state),
                    diagnostics: vec![],
                }))
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Update failed");
                Ok(tonic::Response::new(generated::UpdateResponse {
                    state: vec![],
                    diagnostics: error_to_proto(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.delete")]
    async fn delete(
        &self,
        request: tonic::Request<generated::DeleteRequest>,
    ) -> Result<tonic::Response<generated::DeleteResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, "Delete called");

        let result = match decode(&req.current_state) {
            Ok(current_state) => self.provider.delete(&req.resource_type, current_state).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(()) => {
                info!(resource_type = %req.resource_type, "Delete completed successfully");
                vec![]
            },
            Err(e) => {
                error!(resource_type = %req.resource_type, error = %e, "Delete failed");
                error_to_proto(e)
            },
        };
        Ok(tonic::Response::new(generated::DeleteResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<generated::ImportResourceStateRequest>,
    ) -> Result<tonic::Response<generated::ImportResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        info!(resource_type = %req.resource_type, id = %req.id, "ImportResourceState called");

        match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => Ok(tonic::Response::new(generated::ImportResourceStateResponse {
                imported: imported
                    .into_iter()
                    .map(|r| generated::ImportedResource {
                        resource_type: r.resource_type,
                        state: encode(&r.state),
                    })
                    .collect(),
                diagnostics: vec![],
            })),
            Err(e) => {
                error!(resource_type = %req.resource_type, id = %req.id, error = %e, "ImportResourceState failed");
                Ok(tonic::Response::new(generated::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_to_proto(e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), name = "grpc.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        request: tonic::Request<generated::ValidateDataSourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateDataSourceConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(data_source_type = %req.data_source_type, "ValidateDataSourceConfig called");

        let result = match decode(&req.config) {
            Ok(config) => {
                self.provider
                    .validate_data_source_config(&req.data_source_type, config)
                    .await
            },
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                if has_errors(&diagnostics) {
                    warn!(data_source_type = %req.data_source_type, diagnostics = diagnostics.len(), "ValidateDataSourceConfig completed with errors");
                }
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(data_source_type = %req.data_source_type, error = %e, "ValidateDataSourceConfig failed");
                error_to_proto(e)
            },
        };
        Ok(tonic::Response::new(generated::ValidateDataSourceConfigResponse { diagnostics }))
    }

    #[instrument(skip(self, request), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: tonic::Request<generated::ReadDataSourceRequest>,
    ) -> Result<tonic::Response<generated::ReadDataSourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(data_source_type = %req.data_source_type, "ReadDataSource called");

        let result = match decode(&req.config) {
            Ok(config) => self.provider.read_data_source(&req.data_source_type, config).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(state) => Ok(tonic::Response::new(generated::ReadDataSourceResponse {
                state: encode(&state),
                diagnostics: vec![],
            })),
            Err(e) => {
                error!(data_source_type = %req.data_source_type, error = %e, "ReadDataSource failed");
                Ok(tonic::Response::new(generated::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_to_proto(e),
                }))
            },
        }
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may run after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
    /// Run without the host: skip the magic cookie check and print reattach
    /// information instead of the handshake line.
    pub debug: bool,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            debug: false,
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable debug mode.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Check the magic cookie the host passes through the environment.
pub fn check_magic_cookie(value: Option<&str>) -> Result<(), ProviderError> {
    if value == Some(MAGIC_COOKIE_VALUE) {
        return Ok(());
    }
    Err(ProviderError::Handshake(
        "This binary is a plugin. These are not meant to be executed directly.\n\
         Please execute the program that consumes these plugins, which will\n\
         load any plugins automatically"
            .to_string(),
    ))
}

/// Build the `TF_REATTACH_PROVIDERS` value for a provider listening on `addr`.
pub fn reattach_config(addr: SocketAddr, pid: u32) -> Value {
    json!({
        PROVIDER_ADDRESS: {
            "Protocol": "grpc",
            "ProtocolVersion": 6,
            "Pid": pid,
            "Test": true,
            "Addr": {
                "Network": "tcp",
                "String": addr.to_string(),
            },
        }
    })
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// If no handler can be installed this never returns and the host is
/// expected to kill the process.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                }
            },
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                std::future::pending::<()>().await;
            },
        }
    }

    #[cfg(windows)]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received CTRL+C, initiating graceful shutdown"),
            Err(e) => {
                error!(error = %e, "Failed to install CTRL+C handler");
                std::future::pending::<()>().await;
            },
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider implementation as a gRPC server.
///
/// Binds a free port on 127.0.0.1, announces it and serves until a shutdown
/// signal arrives. For custom configuration, use [`serve_with_options`].
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), ProviderError> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    if !options.debug {
        check_magic_cookie(std::env::var(MAGIC_COOKIE_KEY).ok().as_deref())?;
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_on_listener(provider, listener, options).await
}

/// Serve a provider on a specific address.
pub async fn serve_on<P: ProviderService>(provider: P, addr: SocketAddr) -> Result<(), ProviderError> {
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(provider, listener, ServeOptions::default()).await
}

/// Serve on an already bound listener until SIGTERM/SIGINT.
pub async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    let addr = listener.local_addr()?;
    announce(addr, &options)?;
    run_until(provider, listener, options, wait_for_shutdown_signal()).await
}

fn announce(addr: SocketAddr, options: &ServeOptions) -> Result<(), ProviderError> {
    if options.debug {
        let reattach = serde_json::to_string(&reattach_config(addr, std::process::id()))?;
        println!("Provider started. To attach the host CLI, set the {} environment variable with the following:\n", REATTACH_ENV);
        println!("\t{}='{}'", REATTACH_ENV, reattach);
    } else {
        println!("{}", handshake_line(addr));
    }
    Ok(())
}

/// Run the server on `listener` until `signal` completes, then drain
/// in-flight requests for at most `shutdown_timeout` and stop the provider.
pub(crate) async fn run_until<P, F>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
    signal: F,
) -> Result<(), ProviderError>
where
    P: ProviderService,
    F: Future<Output = ()>,
{
    let addr = listener.local_addr()?;
    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let grpc_service = ProviderGrpcService {
        provider: Arc::clone(&provider),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = Server::builder()
        .add_service(generated::provider_server::ProviderServer::new(grpc_service))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async {
                let _ = shutdown_rx.await;
            },
        );
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
        },
        _ = signal => {
            let _ = shutdown_tx.send(());
            // only the drain is bounded by the timeout
            match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
                Ok(Ok(())) => info!("Server shutdown complete"),
                Ok(Err(e)) => {
                    error!(error = %e, "Server error during shutdown");
                    return Err(e.into());
                },
                Err(_) => warn!(
                    timeout = ?options.shutdown_timeout,
                    "Shutdown timeout exceeded, forcing shutdown"
                ),
            }
        },
    }

    debug!("Calling provider stop()");
    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_server::Provider;
    use crate::schema::{Attribute, Block, NestedBlock, Schema};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct StubProvider {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl ProviderService for StubProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
                .with_resource(
                    "stub_thing",
                    Schema::v0().with_attribute("name", Attribute::required_string()),
                )
                .with_data_source("stub_lookup", Schema::v0())
        }

        async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![Diagnostic::warning("configured")])
        }

        async fn stop(&self) -> Result<(), ProviderError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn plan(
            &self,
            _resource_type: &str,
            _prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            Ok(PlanResult::no_change(proposed_state))
        }

        async fn create(&self, _resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
            Ok(planned_state)
        }

        async fn read(&self, _resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
            if current_state["name"] == "gone" {
                return Ok(None);
            }
            Ok(Some(current_state))
        }

        async fn update(&self, _resource_type: &str, _prior_state: Value, _planned_state: Value) -> Result<Value, ProviderError> {
            Err(ProviderError::failed("Unable to update thing", "remote said no"))
        }

        async fn delete(&self, _resource_type: &str, _current_state: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn service() -> ProviderGrpcService<StubProvider> {
        ProviderGrpcService {
            provider: Arc::new(StubProvider::default()),
        }
    }

    #[test]
    fn test_check_magic_cookie() {
        assert!(check_magic_cookie(Some(MAGIC_COOKIE_VALUE)).is_ok());
        assert!(check_magic_cookie(Some("nope")).is_err());

        let err = check_magic_cookie(None).unwrap_err();
        assert!(err.to_string().contains("This binary is a plugin"));
    }

    #[test]
    fn test_reattach_config() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let config = reattach_config(addr, 42);
        let entry = &config["registry.terraform.io/pavel-snyk/snyk"];
        assert_eq!(entry["Protocol"], "grpc");
        assert_eq!(entry["ProtocolVersion"], 6);
        assert_eq!(entry["Pid"], 42);
        assert_eq!(entry["Addr"]["String"], "127.0.0.1:5000");
    }

    #[test]
    fn test_block_to_proto_is_sorted_and_flags_replace() {
        let block = Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("group_id", Attribute::optional_computed_string().requires_replace())
            .with_block("region", NestedBlock::single(Block::new()));

        let proto = block_to_proto(&block);
        let names: Vec<_> = proto.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["group_id", "name"]);
        assert!(proto.attributes[0].requires_replace);
        assert!(!proto.attributes[1].requires_replace);
        assert_eq!(
            proto.block_types[0].nesting_mode,
            generated::nested_block::NestingMode::Single as i32
        );
    }

    #[test]
    fn test_diagnostics_to_proto() {
        let proto = diagnostics_to_proto(vec![
            Diagnostic::error("bad").with_attribute("name"),
            Diagnostic::warning("meh"),
        ]);
        assert_eq!(proto[0].severity, generated::diagnostic::Severity::Error as i32);
        assert_eq!(proto[0].attribute, "name");
        assert_eq!(proto[1].severity, generated::diagnostic::Severity::Warning as i32);
        assert!(proto[1].detail.is_empty());
    }

    #[test]
    fn test_serve_options() {
        let options = ServeOptions::new()
            .with_shutdown_timeout(Duration::from_secs(5))
            .with_debug(true);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
        assert!(options.debug);
        assert!(!ServeOptions::default().debug);
    }

    #[tokio::test]
    async fn test_metadata_is_sorted() {
        let response = service()
            .get_metadata(tonic::Request::new(generated::GetMetadataRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.resources, vec!["stub_thing"]);
        assert_eq!(response.data_sources, vec!["stub_lookup"]);
    }

    #[tokio::test]
    async fn test_read_missing_resource_returns_empty_state() {
        let response = service()
            .read(tonic::Request::new(generated::ReadRequest {
                resource_type: "stub_thing".to_string(),
                current_state: encode(&json!({"name": "gone"})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.state.is_empty());
        assert!(response.diagnostics.is_empty());

        let response = service()
            .read(tonic::Request::new(generated::ReadRequest {
                resource_type: "stub_thing".to_string(),
                current_state: encode(&json!({"name": "here"})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(decode(&response.state).unwrap(), json!({"name": "here"}));
    }

    #[tokio::test]
    async fn test_errors_become_diagnostics() {
        let response = service()
            .update(tonic::Request::new(generated::UpdateRequest {
                resource_type: "stub_thing".to_string(),
                prior_state: vec![],
                planned_state: vec![],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(response.diagnostics[0].summary, "Unable to update thing");
        assert_eq!(response.diagnostics[0].detail, "remote said no");

        let response = service()
            .read_data_source(tonic::Request::new(generated::ReadDataSourceRequest {
                data_source_type: "stub_missing".to_string(),
                config: vec![],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics[0].summary.contains("stub_missing"));
    }

    #[tokio::test]
    async fn test_plan_falls_back_to_config() {
        let response = service()
            .plan(tonic::Request::new(generated::PlanRequest {
                resource_type: "stub_thing".to_string(),
                prior_state: vec![],
                proposed_state: vec![],
                config: encode(&json!({"name": "x"})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(decode(&response.planned_state).unwrap(), json!({"name": "x"}));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error_not_a_destroy() {
        let response = service()
            .plan(tonic::Request::new(generated::PlanRequest {
                resource_type: "stub_thing".to_string(),
                prior_state: encode(&json!({"name": "x"})),
                proposed_state: b"{".to_vec(),
                config: encode(&json!({"name": "x"})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.planned_state.is_empty());
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(
            response.diagnostics[0].severity,
            generated::diagnostic::Severity::Error as i32
        );
        assert_eq!(response.diagnostics[0].summary, "Invalid JSON payload");

        let response = service()
            .read(tonic::Request::new(generated::ReadRequest {
                resource_type: "stub_thing".to_string(),
                current_state: b"not json".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.state, b"not json".to_vec());
        assert_eq!(response.diagnostics[0].summary, "Invalid JSON payload");
    }

    #[test]
    fn test_decode_empty_is_null() {
        assert_eq!(decode(&[]).unwrap(), Value::Null);
        assert!(decode(b"{").is_err());
    }

    #[tokio::test]
    async fn test_run_until_stops_provider() {
        let provider = StubProvider::default();
        let stopped = Arc::clone(&provider.stopped);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(run_until(
            provider,
            listener,
            ServeOptions::new().with_shutdown_timeout(Duration::from_secs(1)),
            async {
                let _ = rx.await;
            },
        ));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }
}
