use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

/// Base URL of the published documentation site
pub const DEFAULT_BASE_URL: &str = "https://tu-delft-dcc.github.io/docs/";

/// Directory names that never contain indexable pages
const EXCLUDED_DIRS: &[&str] = &["_archived", "img"];

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)(?:\s+\{([^}]*)\})?(?:\s+#+)?\s*$").expect("valid header regex"));
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(`{3,}|~{3,})").expect("valid fence regex"));

/// YAML frontmatter of a page, keyed by field name
pub type Frontmatter = BTreeMap<String, serde_yaml::Value>;

/// A raw documentation file, before it is split into chunks
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the documentation root, `/`-separated
    pub path: String,
    pub content: String,
}

/// One header-delimited section of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub header: String,
    /// Header depth, 0 for text preceding the first header
    pub level: usize,
    pub uri: String,
    pub content: String,
}

/// An indexable unit of documentation
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub file: String,
    pub title: String,
    pub section_header: String,
    pub section_uri: String,
    pub section_level: usize,
    pub content: String,
    pub chunk_id: String,
    pub metadata: Frontmatter,
}

/// Splits Quarto and Markdown pages into section chunks
pub struct QuartoParser {
    docs_path: PathBuf,
    base_url: String,
    extensions: Vec<String>,
}

impl QuartoParser {
    pub fn new(docs_path: impl AsRef<Path>) -> Self {
        Self {
            docs_path: docs_path.as_ref().to_path_buf(),
            base_url: DEFAULT_BASE_URL.to_string(),
            extensions: vec!["md".to_string(), "qmd".to_string()],
        }
    }

    /// Override the site URL used to build section links
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    /// Add a supported file extension
    pub fn add_extension(&mut self, extension: &str) {
        self.extensions.push(extension.trim_start_matches('.').to_lowercase());
    }

    pub fn docs_path(&self) -> &Path {
        &self.docs_path
    }

    /// Check if a file has a supported documentation extension
    pub fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }

    /// True when any component of a relative path is hidden, private or an excluded directory
    pub fn is_excluded(&self, relative_path: &Path) -> bool {
        relative_path.components().any(|component| match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                part.starts_with('.') || part.starts_with('_') || EXCLUDED_DIRS.contains(&part.as_ref())
            }
            _ => false,
        })
    }

    /// Extract the leading YAML frontmatter block
    pub fn extract_frontmatter(&self, content: &str) -> (Frontmatter, String) {
        let normalized = content.replace("\r\n", "\n");
        let Some(rest) = normalized.strip_prefix("---\n") else {
            return (Frontmatter::new(), normalized);
        };

        let (yaml, body) = if let Some(body) = rest.strip_prefix("---\n") {
            ("", body)
        } else if let Some(end) = rest.find("\n---\n") {
            (&rest[..end], &rest[end + 5..])
        } else if let Some(yaml) = rest.strip_suffix("\n---") {
            (yaml, "")
        } else {
            return (Frontmatter::new(), normalized);
        };

        match serde_yaml::from_str::<Option<Frontmatter>>(yaml) {
            Ok(frontmatter) => (frontmatter.unwrap_or_default(), body.to_string()),
            Err(e) => {
                tracing::debug!("Ignoring invalid frontmatter: {}", e);
                (Frontmatter::new(), normalized)
            }
        }
    }

    /// Split a page body into sections at ATX headers outside code fences
    pub fn split_by_headers(&self, body: &str) -> Vec<Section> {
        self.sections_with_index(body, "")
            .into_iter()
            .map(|(_, section)| section)
            .collect()
    }

    /// Sections paired with their position among all sections, empty ones included
    fn sections_with_index(&self, body: &str, relative_path: &str) -> Vec<(usize, Section)> {
        let mut sections = Vec::new();
        let mut header = String::new();
        let mut level = 0;
        let mut anchor: Option<String> = None;
        let mut lines: Vec<&str> = Vec::new();
        let mut fence: Option<String> = None;
        let mut index = 0;

        for line in body.lines() {
            if let Some(cap) = FENCE_RE.captures(line) {
                let marker = &cap[1];
                match &fence {
                    None => fence = Some(marker.to_string()),
                    Some(open) if marker.starts_with(open.as_str()) => fence = None,
                    Some(_) => {}
                }
                lines.push(line);
                continue;
            }

            let header_match = if fence.is_none() { HEADER_RE.captures(line) } else { None };
            if let Some(cap) = header_match {
                let uri = self.heading_uri(relative_path, &header, anchor.as_deref());
                push_section(&mut sections, index, &header, level, &lines, uri);
                index += 1;
                header = cap[2].to_string();
                level = cap[1].len();
                anchor = cap.get(3).and_then(|attrs| explicit_id(attrs.as_str()));
                lines.clear();
            } else {
                lines.push(line);
            }
        }
        let uri = self.heading_uri(relative_path, &header, anchor.as_deref());
        push_section(&mut sections, index, &header, level, &lines, uri);

        sections
    }

    /// Link to a section on the rendered site
    pub fn section_uri(&self, relative_path: &str, header: &str) -> String {
        self.page_link(relative_path, &slugify(header))
    }

    /// Section link using an explicit `{#id}` anchor when the heading declares one
    fn heading_uri(&self, relative_path: &str, header: &str, anchor: Option<&str>) -> String {
        match anchor {
            Some(id) => self.page_link(relative_path, id),
            None => self.section_uri(relative_path, header),
        }
    }

    fn page_link(&self, relative_path: &str, fragment: &str) -> String {
        if relative_path.is_empty() {
            return String::new();
        }
        let page = match relative_path.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => format!("{stem}.html"),
            _ => format!("{relative_path}.html"),
        };
        if fragment.is_empty() {
            format!("{}{}", self.base_url, page)
        } else {
            format!("{}{}#{}", self.base_url, page, fragment)
        }
    }

    /// Parse one page held in memory
    pub fn parse_source(&self, source: &SourceFile) -> Vec<Chunk> {
        let (frontmatter, body) = self.extract_frontmatter(&source.content);
        let path = Path::new(&source.path);

        let title = frontmatter
            .get("title")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("Untitled")
                    .to_string()
            });

        let file_id = match source.path.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => source.path.as_str(),
        }
        .replace('/', "_");

        self.sections_with_index(&body, &source.path)
            .into_iter()
            .map(|(index, section)| Chunk {
                file: source.path.clone(),
                title: title.clone(),
                section_header: section.header,
                section_uri: section.uri,
                section_level: section.level,
                content: section.content,
                chunk_id: format!("{file_id}_{index}"),
                metadata: frontmatter.clone(),
            })
            .collect()
    }

    /// Parse a single file below the documentation root
    pub fn parse_file(&self, file_path: &Path) -> Result<Vec<Chunk>> {
        let content = std::fs::read_to_string(file_path)
            .with_context(|| format!("failed to read {}", file_path.display()))?;
        let relative = file_path.strip_prefix(&self.docs_path).unwrap_or(file_path);

        Ok(self.parse_source(&SourceFile {
            path: to_slash_path(relative),
            content,
        }))
    }

    /// Parse every supported page under the documentation root
    pub fn parse_all_files(&self) -> Result<Vec<Chunk>> {
        if !self.docs_path.is_dir() {
            anyhow::bail!("documentation directory not found: {}", self.docs_path.display());
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&self.docs_path)
            .into_iter()
            .filter_entry(|entry| {
                let relative = entry.path().strip_prefix(&self.docs_path).unwrap_or(entry.path());
                !self.is_excluded(relative)
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && self.is_supported_file(e.path()))
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        let mut chunks = Vec::new();
        for path in paths {
            tracing::debug!("Parsing file: {}", path.display());
            match self.parse_file(&path) {
                Ok(file_chunks) => chunks.extend(file_chunks),
                Err(e) => tracing::warn!("Skipping {}: {:#}", path.display(), e),
            }
        }

        Ok(chunks)
    }
}

fn push_section(
    sections: &mut Vec<(usize, Section)>,
    index: usize,
    header: &str,
    level: usize,
    lines: &[&str],
    uri: String,
) {
    let content = lines.join("\n").trim().to_string();
    if content.is_empty() {
        return;
    }
    sections.push((
        index,
        Section {
            header: header.to_string(),
            level,
            uri,
            content,
        },
    ));
}

/// The `#id` entry of a Pandoc attribute block such as `{#sec-renew .unnumbered}`
fn explicit_id(attrs: &str) -> Option<String> {
    attrs
        .split_whitespace()
        .find_map(|attr| attr.strip_prefix('#'))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Lowercase anchor slug as generated for rendered headings
pub fn slugify(header: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in header.chars() {
        if c.is_alphanumeric() || c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
