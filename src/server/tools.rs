use std::sync::Arc;
use rmcp::model::{AnnotateAble, CallToolResult, Content, Implementation, ListResourcesResult, PaginatedRequestParam, ProtocolVersion, RawResource, Resource, ServerCapabilities, ServerInfo};
use tokio::sync::RwLock;
use serde_json::json;
use serde::{Deserialize, Serialize};

use rmcp::{
    Error as McpError, RoleServer, ServerHandler, model::*, schemars,
    service::RequestContext, tool,
};

use crate::storage::{ChunkIndex, MetadataFilter, MetadataValue};

/// URI scheme prefix of per-file resources
const FILE_RESOURCE_PREFIX: &str = "guides://file/";
const ASK_PROMPT: &str = "ask_guides";

pub type SharedIndex = Arc<RwLock<ChunkIndex>>;

#[derive(Clone)]
pub struct GuidesServer {
    pub index: SharedIndex,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchDocumentationRequest {
    #[schemars(description = "the search query")]
    pub query: String,

    #[schemars(description = "number of results to return (default: 5)")]
    #[serde(default = "default_search_results")]
    pub n_results: usize,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchByFileRequest {
    #[schemars(description = "the file to search within, e.g. \"installation.md\" or \"infrastructure/ssl_certificates.md\"")]
    pub filename: String,

    #[schemars(description = "optional search query within that file")]
    #[serde(default)]
    pub query: String,

    #[schemars(description = "number of results to return (default: 3)")]
    #[serde(default = "default_file_results")]
    pub n_results: usize,
}

fn default_search_results() -> usize {
    5
}

fn default_file_results() -> usize {
    3
}

#[derive(Debug, Serialize)]
struct FormattedResult<'a> {
    file: &'a str,
    title: &'a str,
    section: &'a str,
    uri: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    relevance_score: Option<f64>,
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("failed to encode result: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

#[tool(tool_box)]
impl GuidesServer {

    pub fn new(index: SharedIndex) -> Self {
        Self {
            index,
        }
    }

    fn file_resource(&self, file: &str) -> Resource {
        RawResource::new(format!("{FILE_RESOURCE_PREFIX}{file}"), file.to_string()).no_annotation()
    }

    /// Markdown text of a `guides://file/` resource
    pub async fn file_text(&self, uri: &str) -> Result<String, McpError> {
        let index = self.index.read().await;
        let chunks = uri
            .strip_prefix(FILE_RESOURCE_PREFIX)
            .map(|file| index.chunks_for_file(file))
            .unwrap_or_default();

        if chunks.is_empty() {
            return Err(McpError::resource_not_found(
                "resource_not_found",
                Some(json!({
                    "uri": uri
                })),
            ));
        }

        Ok(chunks
            .iter()
            .map(|record| match record.meta_str("section_header") {
                "" => record.document.clone(),
                header => format!("## {header}\n\n{}", record.document),
            })
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    #[tool(description = "Search the DCC guides documentation for relevant information. Returns file, title, section, link, content and relevance score for each match.")]
    pub async fn search_documentation(
        &self,
        #[tool(aggr)] SearchDocumentationRequest { query, n_results }: SearchDocumentationRequest,
    ) -> Result<CallToolResult, McpError> {
        if query.trim().is_empty() {
            return Err(McpError::invalid_params("query must not be empty", None));
        }

        let index = self.index.read().await;
        let hits = index.search(&query, n_results, None);
        tracing::debug!("search_documentation '{}' returned {} hits", query, hits.len());

        let results: Vec<_> = hits
            .iter()
            .map(|hit| FormattedResult {
                file: hit.meta_str("file"),
                title: hit.meta_str("title"),
                section: hit.meta_str("section_header"),
                uri: hit.meta_str("section_uri"),
                content: &hit.document,
                relevance_score: Some(hit.relevance_score()),
            })
            .collect();

        json_result(&results)
    }

    #[tool(description = "Get statistics about the indexed documentation")]
    pub async fn get_documentation_stats(&self) -> Result<CallToolResult, McpError> {
        let index = self.index.read().await;
        json_result(&index.stats())
    }

    #[tool(description = "Search within a specific documentation file. Without a query, returns the first sections of that file.")]
    pub async fn search_by_file(
        &self,
        #[tool(aggr)] SearchByFileRequest { filename, query, n_results }: SearchByFileRequest,
    ) -> Result<CallToolResult, McpError> {
        let key = if filename.contains('/') { "file" } else { "file_name" };
        let filter = MetadataFilter::from([(key.to_string(), MetadataValue::from(filename.as_str()))]);

        let index = self.index.read().await;

        let hits;
        let results: Vec<FormattedResult> = if query.trim().is_empty() {
            index
                .get(Some(&filter), n_results)
                .into_iter()
                .map(|record| FormattedResult {
                    file: record.meta_str("file"),
                    title: record.meta_str("title"),
                    section: record.meta_str("section_header"),
                    uri: record.meta_str("section_uri"),
                    content: &record.document,
                    relevance_score: None,
                })
                .collect()
        } else {
            hits = index.search(&query, n_results, Some(&filter));
            hits.iter()
                .map(|hit| FormattedResult {
                    file: hit.meta_str("file"),
                    title: hit.meta_str("title"),
                    section: hit.meta_str("section_header"),
                    uri: hit.meta_str("section_uri"),
                    content: &hit.document,
                    relevance_score: Some(hit.relevance_score()),
                })
                .collect()
        };

        json_result(&results)
    }
}


#[tool(tool_box)]
impl ServerHandler for GuidesServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_prompts()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("This server helps users find information in the DCC guides. Use 'search_documentation' for questions about the guides, 'search_by_file' to look inside one page, and 'get_documentation_stats' to see what is indexed. Each indexed page is also available as a resource.".to_string()),
        }
    }

    async fn list_resources(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let index = self.index.read().await;
        Ok(ListResourcesResult {
            resources: index.files().iter().map(|file| self.file_resource(file)).collect(),
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri }: ReadResourceRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let text = self.file_text(&uri).await?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        })
    }

    async fn list_prompts(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult {
            next_cursor: None,
            prompts: vec![Prompt::new(
                ASK_PROMPT,
                Some("Answer a question using only the DCC guides"),
                Some(vec![PromptArgument {
                    name: "question".to_string(),
                    description: Some("The question to answer".to_string()),
                    required: Some(true),
                }]),
            )],
        })
    }

    async fn get_prompt(
        &self,
        GetPromptRequestParam { name, arguments }: GetPromptRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        if name != ASK_PROMPT {
            return Err(McpError::invalid_params("prompt not found", None));
        }

        let question = arguments
            .as_ref()
            .and_then(|args| args.get("question"))
            .and_then(|q| q.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| McpError::invalid_params("missing required argument: question", None))?;

        let prompt = format!(
            "Use the search_documentation tool to find the parts of the DCC guides relevant to this question, then answer it using only what you found. Cite the file and section of every source you rely on, and say so if the guides do not cover it.\n\nQuestion: {question}"
        );

        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage {
                role: PromptMessageRole::User,
                content: PromptMessageContent::text(prompt),
            }],
        })
    }

    async fn list_resource_templates(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult {
            next_cursor: None,
            resource_templates: Vec::new(),
        })
    }
}
