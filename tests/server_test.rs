use std::sync::Arc;

use guia::document::{QuartoParser, SourceFile};
use guia::embedding::HashingEmbedder;
use guia::server::{GuidesServer, SearchByFileRequest, SearchDocumentationRequest};
use guia::storage::ChunkIndex;
use rmcp::model::CallToolResult;
use serde_json::Value;
use tokio::sync::RwLock;

fn build_server(dir: &std::path::Path) -> GuidesServer {
    let parser = QuartoParser::new("docs");
    let sources = [
        SourceFile {
            path: "infrastructure/ssl_certificates.md".to_string(),
            content: "---\ntitle: SSL certificates\n---\n## Renewal\n\nRenew SSL certificates through HARICA every year.\n\n## Installation\n\nCopy the renewed certificate to the web server.".to_string(),
        },
        SourceFile {
            path: "python/environments.md".to_string(),
            content: "# Environments\n\nUse a virtual environment to isolate Python packages installed with pip.".to_string(),
        },
    ];
    let chunks: Vec<_> = sources.iter().flat_map(|s| parser.parse_source(s)).collect();

    let mut index = ChunkIndex::open(dir, Arc::new(HashingEmbedder::default())).unwrap();
    index.index_chunks(&chunks, 100).unwrap();
    GuidesServer::new(Arc::new(RwLock::new(index)))
}

fn result_json(result: CallToolResult) -> Value {
    let value = serde_json::to_value(&result).unwrap();
    let text = value["content"][0]["text"].as_str().unwrap().to_string();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_search_documentation_formats_results() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = build_server(temp_dir.path());

    let result = server
        .search_documentation(SearchDocumentationRequest {
            query: "How do I renew SSL certificates?".to_string(),
            n_results: 2,
        })
        .await
        .unwrap();
    let results = result_json(result);
    let results = results.as_array().unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["file"], "infrastructure/ssl_certificates.md");
    assert_eq!(results[0]["title"], "SSL certificates");
    assert_eq!(results[0]["section"], "Renewal");
    assert!(results[0]["content"].as_str().unwrap().contains("HARICA"));
    assert!(results[0]["relevance_score"].as_f64().unwrap() >= results[1]["relevance_score"].as_f64().unwrap());
}

#[tokio::test]
async fn test_search_documentation_rejects_empty_query() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = build_server(temp_dir.path());

    let result = server
        .search_documentation(SearchDocumentationRequest {
            query: "   ".to_string(),
            n_results: 5,
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_search_on_empty_index_returns_empty_list() {
    let temp_dir = tempfile::tempdir().unwrap();
    let index = ChunkIndex::open(temp_dir.path(), Arc::new(HashingEmbedder::default())).unwrap();
    let server = GuidesServer::new(Arc::new(RwLock::new(index)));

    let result = server
        .search_documentation(SearchDocumentationRequest {
            query: "anything".to_string(),
            n_results: 5,
        })
        .await
        .unwrap();
    assert_eq!(result_json(result), serde_json::json!([]));
}

#[tokio::test]
async fn test_documentation_stats() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = build_server(temp_dir.path());

    let stats = result_json(server.get_documentation_stats().await.unwrap());
    assert_eq!(stats["total_chunks"], 3);
    assert_eq!(stats["total_files"], 2);
    assert_eq!(stats["collection_name"], "guides_docs");
}

#[tokio::test]
async fn test_search_by_file_without_query_returns_sections_in_order() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = build_server(temp_dir.path());

    let result = server
        .search_by_file(SearchByFileRequest {
            filename: "ssl_certificates.md".to_string(),
            query: String::new(),
            n_results: 3,
        })
        .await
        .unwrap();
    let results = result_json(result);
    let results = results.as_array().unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["section"], "Renewal");
    assert_eq!(results[1]["section"], "Installation");
    assert!(results[0].get("relevance_score").is_none());
}

#[tokio::test]
async fn test_search_by_file_with_query_and_full_path() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = build_server(temp_dir.path());

    let result = server
        .search_by_file(SearchByFileRequest {
            filename: "python/environments.md".to_string(),
            query: "virtual environment".to_string(),
            n_results: 3,
        })
        .await
        .unwrap();
    let results = result_json(result);
    let results = results.as_array().unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["file"], "python/environments.md");
    assert!(results[0]["relevance_score"].as_f64().is_some());
}

#[tokio::test]
async fn test_search_by_unknown_file_is_empty() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = build_server(temp_dir.path());

    let result = server
        .search_by_file(SearchByFileRequest {
            filename: "missing.md".to_string(),
            query: String::new(),
            n_results: 3,
        })
        .await
        .unwrap();
    assert_eq!(result_json(result), serde_json::json!([]));
}

#[tokio::test]
async fn test_file_resource_text() {
    let temp_dir = tempfile::tempdir().unwrap();
    let server = build_server(temp_dir.path());

    let text = server
        .file_text("guides://file/infrastructure/ssl_certificates.md")
        .await
        .unwrap();
    assert!(text.starts_with("## Renewal\n\nRenew SSL certificates"));
    assert!(text.contains("## Installation"));

    assert!(server.file_text("guides://file/missing.md").await.is_err());
    assert!(server.file_text("memo://other").await.is_err());
}

#[test]
fn test_request_defaults() {
    let request: SearchDocumentationRequest = serde_json::from_str(r#"{"query": "ssl"}"#).unwrap();
    assert_eq!(request.n_results, 5);

    let request: SearchByFileRequest = serde_json::from_str(r#"{"filename": "a.md"}"#).unwrap();
    assert_eq!(request.n_results, 3);
    assert!(request.query.is_empty());
}
