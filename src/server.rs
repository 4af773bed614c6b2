//! MCP Server implementation using rmcp

use crate::config::ServerConfig;
use crate::error::Error;
use crate::interop::{dry_run_command, run_action, Action, CallResult};
use anyhow::Result;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, service::RequestContext, tool, tool_handler, tool_router, RoleServer,
    ServerHandler, ServiceExt,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// URI prefix shared by all resources
const RESOURCE_SCHEME: &str = "codesys://";
const STATUS_URI: &str = "codesys://project/status";
const HEALTH_URI: &str = "codesys://health";
const VERSION_URI: &str = "codesys://version";

/// CODESYS MCP Server
#[derive(Clone)]
pub struct CodesysServer {
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request types for project tools
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenProjectParams {
    /// Project file path (relative paths resolve against the workspace)
    pub file_path: String,
    /// Open a copy when the project is locked by another session
    #[serde(default)]
    pub copy_on_lock: bool,
    /// Open mode hint passed to CODESYS
    #[serde(default)]
    pub open_mode: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectParams {
    /// Path of the project file to create
    pub file_path: String,
    /// Template project file to start from
    #[serde(default)]
    pub template_path: String,
    /// Name of an installed template
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub device_version: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileParams {
    /// Project file path (relative paths resolve against the workspace)
    pub project_file_path: String,
}

// ============================================================================
// Request types for POU tools
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePouParams {
    pub project_file_path: String,
    /// POU name
    pub name: String,
    /// Program, FunctionBlock or Function
    #[serde(rename = "type")]
    pub pou_type: String,
    /// Implementation language (e.g. ST)
    pub language: String,
    /// Object path of the parent folder (e.g. Application)
    pub parent_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetPouCodeParams {
    pub project_file_path: String,
    /// Object path of the POU, method or property
    pub pou_path: String,
    #[serde(default)]
    pub declaration_code: String,
    #[serde(default)]
    pub implementation_code: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePropertyParams {
    pub project_file_path: String,
    /// Object path of the owning function block
    pub parent_pou_path: String,
    pub property_name: String,
    pub property_type: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateMethodParams {
    pub project_file_path: String,
    /// Object path of the owning function block
    pub parent_pou_path: String,
    pub method_name: String,
    #[serde(default)]
    pub return_type: String,
}

// ============================================================================
// Request types for device and diagnostic tools
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddDeviceParams {
    pub project_file_path: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub device_version: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosePathParams {
    pub project_path: String,
    /// Object path to normalize (e.g. Application/POUs/PLC_PRG)
    pub object_path: String,
}

/// Resource addressed by a `codesys://` URI
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResourceRequest {
    Status,
    Health,
    Version,
    Structure {
        project_path: String,
    },
    PouCode {
        project_path: String,
        pou_path: String,
    },
    LockStatus {
        project_path: String,
    },
    DiagnosePath {
        project_path: String,
        object_path: String,
    },
}

impl ResourceRequest {
    fn parse(uri: &str) -> crate::error::Result<Self> {
        let unknown = || Error::UnknownResource {
            uri: uri.to_string(),
        };

        match uri {
            STATUS_URI => return Ok(ResourceRequest::Status),
            HEALTH_URI => return Ok(ResourceRequest::Health),
            VERSION_URI => return Ok(ResourceRequest::Version),
            _ => {}
        }

        let rest = uri
            .strip_prefix(RESOURCE_SCHEME)
            .and_then(|r| r.strip_prefix("project/"))
            .ok_or_else(unknown)?;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string()).ok_or_else(unknown);

        if let Some((project, object)) = rest.split_once("/diagnose_path/") {
            return Ok(ResourceRequest::DiagnosePath {
                project_path: non_empty(project)?,
                object_path: non_empty(object)?,
            });
        }
        if let Some(inner) = rest.strip_suffix("/code") {
            if let Some((project, pou)) = inner.split_once("/pou/") {
                return Ok(ResourceRequest::PouCode {
                    project_path: non_empty(project)?,
                    pou_path: non_empty(pou)?,
                });
            }
        }
        if let Some(project) = rest.strip_suffix("/structure") {
            return Ok(ResourceRequest::Structure {
                project_path: non_empty(project)?,
            });
        }
        if let Some(project) = rest.strip_suffix("/lock_status") {
            return Ok(ResourceRequest::LockStatus {
                project_path: non_empty(project)?,
            });
        }

        Err(unknown())
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl CodesysServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new CodesysServer with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Open a CODESYS project
    #[tool(
        description = "Open a CODESYS project file. Set copyOnLock to open a copy when the project is locked by another session."
    )]
    async fn open_project(&self, Parameters(params): Parameters<OpenProjectParams>) -> String {
        self.run_json(
            Action::OpenProject,
            json!({
                "project_file_path": self.config.resolve_path(&params.file_path),
                "copy_on_lock": params.copy_on_lock,
                "open_mode": params.open_mode,
            }),
        )
        .await
    }

    /// Create a CODESYS project
    #[tool(
        description = "Create a new CODESYS project, optionally from a template and with a target device."
    )]
    async fn create_project(&self, Parameters(params): Parameters<CreateProjectParams>) -> String {
        self.run_json(
            Action::CreateProject,
            json!({
                "project_file_path": self.config.resolve_path(&params.file_path),
                "template_path": self.config.resolve_path(&params.template_path),
                "template_name": params.template_name,
                "device_id": params.device_id,
                "device_name": params.device_name,
                "device_version": params.device_version,
            }),
        )
        .await
    }

    #[tool(description = "Save a CODESYS project.")]
    async fn save_project(&self, Parameters(params): Parameters<ProjectFileParams>) -> String {
        self.run_project_action(Action::SaveProject, &params).await
    }

    /// Create a POU
    #[tool(
        description = "Create a POU (Program, FunctionBlock or Function) under the given parent path."
    )]
    async fn create_pou(&self, Parameters(params): Parameters<CreatePouParams>) -> String {
        self.run_json(
            Action::CreatePou,
            json!({
                "project_file_path": self.config.resolve_path(&params.project_file_path),
                "name": params.name,
                "type": params.pou_type,
                "language": params.language,
                "parent_path": params.parent_path,
            }),
        )
        .await
    }

    /// Write declaration and implementation code
    #[tool(description = "Set the declaration and/or implementation code of a POU, method or property.")]
    async fn set_pou_code(&self, Parameters(params): Parameters<SetPouCodeParams>) -> String {
        self.run_json(
            Action::SetPouCode,
            json!({
                "project_file_path": self.config.resolve_path(&params.project_file_path),
                "pou_path": params.pou_path,
                "declaration_code": params.declaration_code,
                "implementation_code": params.implementation_code,
            }),
        )
        .await
    }

    #[tool(description = "Create a property on a function block.")]
    async fn create_property(
        &self,
        Parameters(params): Parameters<CreatePropertyParams>,
    ) -> String {
        self.run_json(
            Action::CreateProperty,
            json!({
                "project_file_path": self.config.resolve_path(&params.project_file_path),
                "parent_pou_path": params.parent_pou_path,
                "property_name": params.property_name,
                "property_type": params.property_type,
            }),
        )
        .await
    }

    #[tool(description = "Create a method on a function block.")]
    async fn create_method(&self, Parameters(params): Parameters<CreateMethodParams>) -> String {
        self.run_json(
            Action::CreateMethod,
            json!({
                "project_file_path": self.config.resolve_path(&params.project_file_path),
                "parent_pou_path": params.parent_pou_path,
                "method_name": params.method_name,
                "return_type": params.return_type,
            }),
        )
        .await
    }

    /// Build the project
    #[tool(description = "Compile a CODESYS project and report error and warning counts.")]
    async fn compile_project(&self, Parameters(params): Parameters<ProjectFileParams>) -> String {
        self.run_project_action(Action::CompileProject, &params).await
    }

    #[tool(description = "List the project templates available to CODESYS.")]
    async fn list_templates(&self) -> String {
        self.run_json(Action::ListTemplates, json!({})).await
    }

    #[tool(description = "List the devices installed in the CODESYS device repository.")]
    async fn list_devices(&self) -> String {
        self.run_json(Action::ListDevices, json!({})).await
    }

    #[tool(description = "Add a device to a CODESYS project.")]
    async fn add_device_to_project(
        &self,
        Parameters(params): Parameters<AddDeviceParams>,
    ) -> String {
        self.run_json(
            Action::AddDeviceToProject,
            json!({
                "project_file_path": self.config.resolve_path(&params.project_file_path),
                "device_id": params.device_id,
                "device_name": params.device_name,
                "device_version": params.device_version,
            }),
        )
        .await
    }

    #[tool(description = "Deploy the active application of a project to its device.")]
    async fn deploy_application(
        &self,
        Parameters(params): Parameters<ProjectFileParams>,
    ) -> String {
        self.run_project_action(Action::DeployApplication, &params)
            .await
    }

    #[tool(description = "Download the active application to the device and start it.")]
    async fn download_and_start(
        &self,
        Parameters(params): Parameters<ProjectFileParams>,
    ) -> String {
        self.run_project_action(Action::DownloadAndStart, &params)
            .await
    }

    /// Normalize an object path
    #[tool(
        description = "Normalize a project object path and list candidate objects when it does not resolve."
    )]
    async fn diagnose_path(&self, Parameters(params): Parameters<DiagnosePathParams>) -> String {
        self.run_json(
            Action::DiagnosePath,
            json!({
                "project_path": params.project_path,
                "object_path": params.object_path,
            }),
        )
        .await
    }
}

impl CodesysServer {
    async fn dispatch(&self, action: Action, params: Value) -> CallResult {
        tracing::debug!(%action, "dispatching action");
        run_action(&self.config, action.name(), &object(params)).await
    }

    async fn run_json(&self, action: Action, params: Value) -> String {
        self.dispatch(action, params).await.to_json_string()
    }

    async fn run_project_action(&self, action: Action, params: &ProjectFileParams) -> String {
        self.run_json(
            action,
            json!({ "project_file_path": self.config.resolve_path(&params.project_file_path) }),
        )
        .await
    }

    fn health(&self) -> Value {
        let codesys_path = self.config.codesys_path.display().to_string();
        json!({
            "ready": self.config.executable_ready(),
            "command": dry_run_command(&codesys_path, &self.config.profile),
            "codesys_path": codesys_path,
            "profile": self.config.profile,
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    async fn read_json_resource(&self, request: ResourceRequest) -> Value {
        let (action, params) = match request {
            ResourceRequest::Health => return self.health(),
            ResourceRequest::Version => return json!({ "version": env!("CARGO_PKG_VERSION") }),
            ResourceRequest::Status => (Action::ProjectStatus, json!({})),
            ResourceRequest::Structure { project_path } => (
                Action::ProjectStructure,
                json!({ "project_path": project_path }),
            ),
            ResourceRequest::PouCode {
                project_path,
                pou_path,
            } => (
                Action::PouCode,
                json!({ "project_path": project_path, "pou_path": pou_path }),
            ),
            ResourceRequest::LockStatus { project_path } => {
                (Action::LockStatus, json!({ "project_path": project_path }))
            }
            ResourceRequest::DiagnosePath {
                project_path,
                object_path,
            } => (
                Action::DiagnosePath,
                json!({ "project_path": project_path, "object_path": object_path }),
            ),
        };
        serde_json::to_value(self.dispatch(action, params).await).unwrap_or(Value::Null)
    }
}

impl Default for CodesysServer {
    fn default() -> Self {
        Self::new()
    }
}

fn static_resource(uri: &str, name: &str, description: &str) -> Resource {
    let mut resource = RawResource::new(uri.to_string(), name.to_string());
    resource.mime_type = Some("application/json".to_string());
    resource.description = Some(description.to_string());
    Annotated {
        raw: resource,
        annotations: None,
    }
}

fn template(uri_template: &str, name: &str, description: &str) -> ResourceTemplate {
    Annotated {
        raw: RawResourceTemplate {
            uri_template: uri_template.to_string(),
            name: name.to_string(),
            title: None,
            description: Some(description.to_string()),
            mime_type: Some("application/json".to_string()),
            icons: None,
        },
        annotations: None,
    }
}

/// Templated `codesys://project/...` resources served by `read_resource`
fn resource_templates() -> Vec<ResourceTemplate> {
    vec![
        template(
            "codesys://project/{+project_path}/structure",
            "project_structure",
            "Object tree of a project",
        ),
        template(
            "codesys://project/{+project_path}/pou/{+pou_path}/code",
            "pou_code",
            "Declaration and implementation code of a POU",
        ),
        template(
            "codesys://project/{+project_path}/lock_status",
            "lock_status",
            "Whether a project is locked by another session",
        ),
        template(
            "codesys://project/{+project_path}/diagnose_path/{+object_path}",
            "diagnose_path",
            "Normalize an object path inside a project",
        ),
    ]
}

#[tool_handler]
impl ServerHandler for CodesysServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "CODESYS MCP Server drives CODESYS headlessly: each tool runs a generated script \
                 in CODESYS and returns {success, data|error, exit_code}. Project status, \
                 structure, POU code, lock status and health are exposed as codesys:// resources."
                    .into(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult {
            resources: vec![
                static_resource(
                    STATUS_URI,
                    "project_status",
                    "Scripting engine and open project status",
                ),
                static_resource(
                    HEALTH_URI,
                    "health",
                    "Whether the configured CODESYS executable is available",
                ),
                static_resource(VERSION_URI, "version", "Server version"),
            ],
            next_cursor: None,
            meta: Default::default(),
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, ErrorData> {
        Ok(ListResourceTemplatesResult {
            resource_templates: resource_templates(),
            next_cursor: None,
            meta: Default::default(),
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let uri = &request.uri;

        let resource = ResourceRequest::parse(uri).map_err(|e| {
            tracing::warn!(error = %e, "read_resource failed");
            ErrorData::invalid_params(e.client_message(), None)
        })?;

        let value = self.read_json_resource(resource).await;
        let text = serde_json::to_string_pretty(&value).map_err(|e| {
            let e = Error::from(e);
            ErrorData::internal_error(e.client_message(), None)
        })?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: uri.clone(),
                mime_type: Some("application/json".to_string()),
                text,
                meta: Default::default(),
            }],
        })
    }
}

/// Run the MCP server with configuration from the environment
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::from_env()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    tracing::info!(
        codesys_path = %config.codesys_path.display(),
        profile = %config.profile,
        timeout_secs = config.timeout.as_secs(),
        "CODESYS MCP Server configured"
    );
    if !config.executable_ready() {
        tracing::warn!("CODESYS executable not found; tool calls will fail until it is available");
    }

    let server = CodesysServer::with_config(config);

    tracing::info!("CODESYS MCP Server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
