//! # guia
//!
//! A documentation assistant for the DCC guides: it indexes a Quarto/Markdown
//! documentation tree and answers questions about it through a Model Context
//! Protocol (MCP) server, and checks the documentation site for broken links.
//!
//! ## Features
//!
//! - Split Quarto and Markdown pages into header-delimited chunks
//! - Embed chunks into a persistent local vector index
//! - Serve search tools, per-page resources and a question prompt over MCP
//! - Validate links in markdown, Quarto and rendered HTML files
//! - Generate the client configuration that registers the server
//! - Evaluate retrieval quality against a question dataset
//!
//! ## Modules
//!
//! - `document`: Quarto/Markdown parsing and chunking
//! - `embedding`: text embedding and similarity
//! - `storage`: the persistent chunk index
//! - `server`: MCP server implementation and tools
//! - `github`: GitHub API integration for fetching documentation
//! - `linkcheck`: link extraction and validation
//! - `mcp_config`: client configuration for launching the server
//! - `evaluation`: retrieval and answer evaluation

/// Agent directory layout
pub mod config;
/// Document parsing and chunking
pub mod document;
/// Text embedding
pub mod embedding;
/// Retrieval evaluation
pub mod evaluation;
/// GitHub API integration
pub mod github;
/// Link checking
pub mod linkcheck;
/// Client configuration
pub mod mcp_config;
/// Server implementation and MCP tools
pub mod server;
/// Chunk storage and retrieval
pub mod storage;
