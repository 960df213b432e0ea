use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::embedding::HashingEmbedder;
use crate::storage::ChunkIndex;

const INDEX_DIR_NAME: &str = "guides_index";
const LOG_FILE_NAME: &str = "guia.log";

/// Locations derived from the agent's working directory
#[derive(Debug, Clone)]
pub struct AgentPaths {
    directory: PathBuf,
}

impl AgentPaths {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn index_dir(&self) -> PathBuf {
        self.directory.join(INDEX_DIR_NAME)
    }

    /// Log file used while serving, since stdout carries the protocol
    pub fn log_file(&self) -> PathBuf {
        self.directory.join(LOG_FILE_NAME)
    }

    /// Open the index with the default embedder
    pub fn open_index(&self) -> Result<ChunkIndex> {
        ChunkIndex::open(self.index_dir(), Arc::new(HashingEmbedder::default()))
    }
}
