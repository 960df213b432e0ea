use std::sync::Arc;

use guia::document::{Chunk, Frontmatter};
use guia::embedding::{Embedder, HashingEmbedder};
use guia::storage::{ChunkIndex, MetadataFilter, MetadataValue};

fn chunk(file: &str, index: usize, header: &str, content: &str) -> Chunk {
    let stem = file.trim_end_matches(".md").replace('/', "_");
    Chunk {
        file: file.to_string(),
        title: stem.clone(),
        section_header: header.to_string(),
        section_uri: String::new(),
        section_level: 2,
        content: content.to_string(),
        chunk_id: format!("{stem}_{index}"),
        metadata: Frontmatter::new(),
    }
}

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::default())
}

#[test]
fn test_index_and_retrieve_chunks() {
    // Create a temporary directory for the index
    let temp_dir = tempfile::tempdir().unwrap();
    let mut index = ChunkIndex::open(temp_dir.path(), embedder()).unwrap();
    assert!(index.is_empty());

    let chunks = vec![
        chunk("infrastructure/ssl.md", 1, "Renewal", "Renew the SSL certificate through HARICA before it expires."),
        chunk("python/setup.md", 1, "Environments", "Create a virtual environment and install packages with pip."),
    ];
    index.index_chunks(&chunks, 1).unwrap();

    assert_eq!(index.count(), 2);
    let record = index.get_by_id("infrastructure_ssl_1").unwrap();
    assert_eq!(record.meta_str("file"), "infrastructure/ssl.md");
    assert_eq!(record.meta_str("file_name"), "ssl.md");
    assert_eq!(record.meta_str("section_header"), "Renewal");
    assert_eq!(record.metadata.get("section_level"), Some(&MetadataValue::Int(2)));
    assert_eq!(record.document, "Renew the SSL certificate through HARICA before it expires.");
}

#[test]
fn test_index_persists_across_opens() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let mut index = ChunkIndex::open(temp_dir.path(), embedder()).unwrap();
        index.index_chunks(&[chunk("a.md", 0, "", "alpha content")], 100).unwrap();
    }

    let reopened = ChunkIndex::open(temp_dir.path(), embedder()).unwrap();
    assert_eq!(reopened.count(), 1);
    assert_eq!(reopened.files(), vec!["a.md".to_string()]);
}

#[test]
fn test_reindexing_replaces_records() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut index = ChunkIndex::open(temp_dir.path(), embedder()).unwrap();

    index.index_chunks(&[chunk("a.md", 0, "", "old text")], 100).unwrap();
    index.index_chunks(&[chunk("a.md", 0, "", "new text")], 100).unwrap();

    assert_eq!(index.count(), 1);
    assert_eq!(index.get_by_id("a_0").unwrap().document, "new text");

    index.reset().unwrap();
    assert!(index.is_empty());
}

#[test]
fn test_embedder_mismatch_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    {
        let mut index = ChunkIndex::open(temp_dir.path(), embedder()).unwrap();
        index.index_chunks(&[chunk("a.md", 0, "", "text")], 100).unwrap();
    }

    let result = ChunkIndex::open(temp_dir.path(), Arc::new(HashingEmbedder::new(64)));
    assert!(result.is_err());
}

#[test]
fn test_search_ranks_relevant_chunks_first() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut index = ChunkIndex::open(temp_dir.path(), embedder()).unwrap();

    index
        .index_chunks(
            &[
                chunk("python/setup.md", 0, "Environments", "Python virtual environments isolate packages installed with pip."),
                chunk("infrastructure/ssl.md", 0, "Certificates", "SSL certificates must be renewed every year. Request a renewed certificate from HARICA."),
                chunk("git/branches.md", 0, "Branching", "Create a feature branch and open a pull request for review."),
            ],
            100,
        )
        .unwrap();

    let hits = index.search("How do I renew SSL certificates?", 3, None);
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].id, "infrastructure_ssl_0");
    assert!(hits[0].distance <= hits[1].distance);
    assert!(hits[0].relevance_score() > 0.0);

    assert_eq!(index.search("anything", 0, None).len(), 0);
}

#[test]
fn test_filters_restrict_results() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut index = ChunkIndex::open(temp_dir.path(), embedder()).unwrap();

    index
        .index_chunks(
            &[
                chunk("a.md", 0, "One", "first section of a"),
                chunk("b.md", 0, "One", "first section of b"),
                chunk("a.md", 1, "Two", "second section of a"),
                chunk("a.md", 2, "Three", "third section of a"),
            ],
            2,
        )
        .unwrap();

    let filter = MetadataFilter::from([("file".to_string(), MetadataValue::from("a.md"))]);
    let hits = index.search("section", 10, Some(&filter));
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|hit| hit.meta_str("file") == "a.md"));

    let first_two: Vec<_> = index.get(Some(&filter), 2).into_iter().map(|r| r.id.clone()).collect();
    assert_eq!(first_two, vec!["a_0", "a_1"]);

    assert_eq!(index.chunks_for_file("b.md").len(), 1);
    assert_eq!(index.files(), vec!["a.md".to_string(), "b.md".to_string()]);

    let stats = index.stats();
    assert_eq!(stats.total_chunks, 4);
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.collection_name, "guides_docs");
}

#[test]
fn test_scalar_frontmatter_is_flattened() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut index = ChunkIndex::open(temp_dir.path(), embedder()).unwrap();

    let mut with_meta = chunk("a.md", 0, "", "content");
    with_meta.metadata = serde_yaml::from_str("author: DCC\nweight: 3\ndraft: false\ntags: [x, y]").unwrap();
    index.index_chunks(&[with_meta], 100).unwrap();

    let record = index.get_by_id("a_0").unwrap();
    assert_eq!(record.metadata.get("meta_author"), Some(&MetadataValue::from("DCC")));
    assert_eq!(record.metadata.get("meta_weight"), Some(&MetadataValue::Int(3)));
    assert_eq!(record.metadata.get("meta_draft"), Some(&MetadataValue::Bool(false)));
    assert!(!record.metadata.contains_key("meta_tags"));
}
