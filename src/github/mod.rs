use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use octocrab::Octocrab;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};

use crate::document::{QuartoParser, SourceFile};

const MAX_CONCURRENT_REQUESTS: usize = 5;
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Documentation source backed by a GitHub repository
#[derive(Clone)]
pub struct GitHubSource {
    client: Arc<Octocrab>,
    owner: String,
    pub repo: String,
    // Fetched file bodies keyed by repository path
    cache: Arc<RwLock<HashMap<String, String>>>,
    permits: Arc<Semaphore>,
}

impl GitHubSource {
    pub fn new(owner: &str, repo: &str, token: Option<&str>) -> Result<Self> {
        if owner.trim().is_empty() {
            anyhow::bail!("Owner cannot be empty");
        }
        if repo.trim().is_empty() {
            anyhow::bail!("Repository name cannot be empty");
        }

        let mut builder = Octocrab::builder();
        if let Some(token) = token {
            if token.trim().is_empty() {
                anyhow::bail!("Personal access token cannot be empty");
            }
            tracing::info!("Using personal access token for GitHub API");
            builder = builder.personal_token(token);
        }

        Ok(Self {
            client: Arc::new(builder.build()?),
            owner: owner.to_string(),
            repo: repo.to_string(),
            cache: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    /// Fetch a file body, retrying with exponential backoff
    pub async fn fetch_file(&self, path: &str) -> Result<String> {
        if let Some(content) = self.cache.read().await.get(path) {
            return Ok(content.clone());
        }

        let _permit = self.permits.clone().acquire_owned().await?;
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 1;

        let content = loop {
            match self.fetch_once(path).await {
                Ok(content) => break content,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!("Attempt {}/{} for {} failed: {}", attempt, MAX_ATTEMPTS, path, e);
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e.context(format!("failed to fetch {path} after {MAX_ATTEMPTS} attempts"))),
            }
        };

        self.cache.write().await.insert(path.to_string(), content.clone());
        Ok(content)
    }

    async fn fetch_once(&self, path: &str) -> Result<String> {
        let listing = self
            .client
            .repos(&self.owner, &self.repo)
            .get_content()
            .path(path)
            .send()
            .await?;

        let encoded = listing
            .items
            .first()
            .and_then(|item| item.content.as_ref())
            .ok_or_else(|| anyhow::anyhow!("{path} is not a file or is empty"))?;

        let decoded = STANDARD.decode(encoded.replace('\n', ""))?;
        Ok(String::from_utf8(decoded)?)
    }

    /// Collect every documentation page under `subfolder`, paths relative to it
    pub async fn list_sources(&self, subfolder: &str, parser: &QuartoParser) -> Result<Vec<SourceFile>> {
        let root = subfolder.trim_matches('/').to_string();
        let mut pending = vec![root.clone()];
        let mut pages = Vec::new();

        while let Some(dir) = pending.pop() {
            let listing = match self
                .client
                .repos(&self.owner, &self.repo)
                .get_content()
                .path(&dir)
                .send()
                .await
            {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::error!("Failed to list directory {}: {}", dir, e);
                    continue;
                }
            };

            for item in listing.items {
                let relative = relative_to(&root, &item.path);
                if parser.is_excluded(Path::new(&relative)) {
                    continue;
                }
                match item.r#type.as_str() {
                    "dir" => pending.push(item.path),
                    "file" if parser.is_supported_file(Path::new(&item.path)) => {
                        pages.push((item.path, relative));
                    }
                    _ => {}
                }
            }
        }

        tracing::info!("Found {} documentation files in {}/{}", pages.len(), self.owner, self.repo);

        let mut tasks = JoinSet::new();
        for (path, relative) in pages {
            let source = self.clone();
            tasks.spawn(async move {
                match source.fetch_file(&path).await {
                    Ok(content) => Some(SourceFile { path: relative, content }),
                    Err(e) => {
                        tracing::error!("{:#}", e);
                        None
                    }
                }
            });
        }

        let mut sources = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(source)) = result {
                sources.push(source);
            }
        }
        sources.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(sources)
    }
}

fn relative_to(root: &str, path: &str) -> String {
    if root.is_empty() {
        return path.to_string();
    }
    path.strip_prefix(root)
        .map(|rest| rest.trim_start_matches('/').to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::relative_to;

    #[test]
    fn paths_are_made_relative_to_subfolder() {
        assert_eq!(relative_to("docs", "docs/infra/ssl.qmd"), "infra/ssl.qmd");
        assert_eq!(relative_to("", "README.md"), "README.md");
    }
}
