//! Link validation for markdown, Quarto and rendered HTML pages.
//!
//! Local links must point at an existing file or directory. Remote links are
//! deduplicated and requested concurrently, retrying network failures, `429`
//! and `5xx` responses with exponential backoff.

mod config;
mod extract;

pub use config::{parse_status_range, AcceptEntry, LinkCheckConfig, LinkRules, DEFAULT_CONFIG_FILE};
pub use extract::{classify, extract_html, extract_links, extract_markdown, LinkKind, RawLink};

use anyhow::Result;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use url::Url;
use walkdir::WalkDir;

const SCANNED_EXTENSIONS: &[&str] = &["md", "qmd", "html", "htm"];

static MAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid mail regex"));

/// A link that failed to resolve
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BrokenLink {
    pub source: PathBuf,
    pub line: Option<usize>,
    pub link: String,
    pub reason: String,
}

/// Outcome of a link check run
#[derive(Debug, Default, Clone, Serialize)]
pub struct LinkReport {
    pub files: usize,
    pub total: usize,
    pub ok: usize,
    pub excluded: usize,
    pub broken: Vec<BrokenLink>,
}

impl LinkReport {
    pub fn is_success(&self) -> bool {
        self.broken.is_empty()
    }

    /// Human-readable listing of broken links followed by totals
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for broken in &self.broken {
            let location = match broken.line {
                Some(line) => format!("{}:{}", broken.source.display(), line),
                None => broken.source.display().to_string(),
            };
            let _ = writeln!(out, "[ERROR] {} ({}) in {}", broken.link, broken.reason, location);
        }
        let _ = writeln!(
            out,
            "{} files, {} links: {} OK, {} errors, {} excluded",
            self.files,
            self.total,
            self.ok,
            self.broken.len(),
            self.excluded
        );
        out
    }
}

#[derive(Debug, Clone)]
enum LinkStatus {
    Ok,
    Excluded,
    Broken(String),
}

/// Where a remote link occurred, so its result can be attributed
struct Occurrence {
    source: PathBuf,
    line: Option<usize>,
    link: String,
}

/// Settings shared by remote check tasks
struct RetryPolicy {
    max_retries: u32,
    initial_wait: Duration,
    rules: Arc<LinkRules>,
}

pub struct LinkChecker {
    config: LinkCheckConfig,
    rules: Arc<LinkRules>,
    client: Client,
    root_dir: PathBuf,
}

impl LinkChecker {
    pub fn new(config: LinkCheckConfig) -> Result<Self> {
        let rules = Arc::new(config.compile()?);
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(config.timeout())
            .build()?;
        let root_dir = match &config.root_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        Ok(Self {
            config,
            rules,
            client,
            root_dir,
        })
    }

    pub fn rules(&self) -> &LinkRules {
        &self.rules
    }

    /// Expand input files and directories into the list of pages to scan
    pub fn collect_inputs(&self, inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for input in inputs {
            if input.is_file() {
                if !self.rules.is_excluded_path(input) {
                    files.push(input.clone());
                }
            } else if input.is_dir() {
                let walker = WalkDir::new(input).into_iter().filter_entry(|entry| {
                    if entry.depth() == 0 {
                        return true;
                    }
                    let name = entry.file_name().to_string_lossy();
                    !name.starts_with('.') && name != "node_modules"
                });
                for entry in walker.filter_map(|e| e.ok()) {
                    let path = entry.path();
                    let scanned = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| SCANNED_EXTENSIONS.contains(&e.to_lowercase().as_str()));
                    if entry.file_type().is_file() && scanned && !self.rules.is_excluded_path(path) {
                        files.push(path.to_path_buf());
                    }
                }
            } else {
                anyhow::bail!("input not found: {}", input.display());
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Check every link in the given files
    pub async fn check_files(&self, files: &[PathBuf]) -> Result<LinkReport> {
        let mut report = LinkReport {
            files: files.len(),
            ..Default::default()
        };
        let mut remote: BTreeMap<String, (Url, Vec<Occurrence>)> = BTreeMap::new();

        for file in files {
            let content = match std::fs::read_to_string(file) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Cannot read {}: {}", file.display(), e);
                    report.broken.push(BrokenLink {
                        source: file.clone(),
                        line: None,
                        link: file.display().to_string(),
                        reason: format!("unreadable input: {e}"),
                    });
                    continue;
                }
            };

            let links = extract_links(file, &content);
            tracing::debug!("{}: {} links", file.display(), links.len());

            for raw in links {
                report.total += 1;
                let status = if self.rules.is_excluded_link(&raw.url) {
                    LinkStatus::Excluded
                } else {
                    match classify(&raw.url, file, &self.root_dir) {
                        LinkKind::Remote(_) if self.config.offline => LinkStatus::Excluded,
                        LinkKind::Remote(mut url) => {
                            url.set_fragment(None);
                            let key = url.as_str().to_string();
                            remote
                                .entry(key)
                                .or_insert_with(|| (url, Vec::new()))
                                .1
                                .push(Occurrence {
                                    source: file.clone(),
                                    line: raw.line,
                                    link: raw.url,
                                });
                            continue;
                        }
                        LinkKind::Local(path) => check_local(&path),
                        LinkKind::Mail(address) => self.check_mail(&address),
                        LinkKind::Ignored => LinkStatus::Excluded,
                        LinkKind::Invalid(reason) => LinkStatus::Broken(reason),
                    }
                };
                record(&mut report, status, file, raw.line, raw.url);
            }
        }

        if !remote.is_empty() {
            tracing::info!("Checking {} distinct remote links", remote.len());
        }
        let results = self.check_remote(remote.iter().map(|(key, (url, _))| (key.clone(), url.clone()))).await;

        for (key, (_, occurrences)) in remote {
            let status = results
                .get(&key)
                .cloned()
                .unwrap_or_else(|| LinkStatus::Broken("check did not complete".to_string()));
            for occurrence in occurrences {
                record(&mut report, status.clone(), &occurrence.source, occurrence.line, occurrence.link);
            }
        }

        report.broken.sort_by(|a, b| (&a.source, a.line).cmp(&(&b.source, b.line)));
        Ok(report)
    }

    /// Collect inputs and check them
    pub async fn run(&self, inputs: &[PathBuf]) -> Result<LinkReport> {
        let files = self.collect_inputs(inputs)?;
        tracing::info!("Scanning {} files for links", files.len());
        self.check_files(&files).await
    }

    fn check_mail(&self, address: &str) -> LinkStatus {
        if !self.config.include_mail {
            return LinkStatus::Excluded;
        }
        let address = address.split('?').next().unwrap_or_default();
        if MAIL_RE.is_match(address) {
            LinkStatus::Ok
        } else {
            LinkStatus::Broken(format!("invalid mail address '{address}'"))
        }
    }

    async fn check_remote(&self, urls: impl Iterator<Item = (String, Url)>) -> BTreeMap<String, LinkStatus> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let policy = Arc::new(RetryPolicy {
            max_retries: self.config.max_retries,
            initial_wait: Duration::from_secs(self.config.retry_wait_time),
            rules: self.rules.clone(),
        });

        let mut tasks = JoinSet::new();
        for (key, url) in urls {
            let client = self.client.clone();
            let permits = permits.clone();
            let policy = policy.clone();
            tasks.spawn(async move {
                let status = match permits.acquire_owned().await {
                    Ok(_permit) => check_url(&client, url, &policy).await,
                    Err(e) => LinkStatus::Broken(e.to_string()),
                };
                (key, status)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, status)) => {
                    results.insert(key, status);
                }
                Err(e) => tracing::error!("Link check task failed: {}", e),
            }
        }
        results
    }
}

fn record(report: &mut LinkReport, status: LinkStatus, source: &Path, line: Option<usize>, link: String) {
    match status {
        LinkStatus::Ok => report.ok += 1,
        LinkStatus::Excluded => report.excluded += 1,
        LinkStatus::Broken(reason) => report.broken.push(BrokenLink {
            source: source.to_path_buf(),
            line,
            link,
            reason,
        }),
    }
}

fn check_local(path: &Path) -> LinkStatus {
    if path.exists() {
        LinkStatus::Ok
    } else {
        LinkStatus::Broken(format!("file not found: {}", path.display()))
    }
}

async fn check_url(client: &Client, url: Url, policy: &RetryPolicy) -> LinkStatus {
    let mut wait = policy.initial_wait;
    let mut attempt = 0;

    loop {
        let outcome = match client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                if policy.rules.accepts(status.as_u16()) {
                    return LinkStatus::Ok;
                }
                let retryable = status.as_u16() == 429 || status.is_server_error();
                (retryable, format!("status {status}"))
            }
            Err(e) if e.is_timeout() => (true, "request timed out".to_string()),
            Err(e) => (true, format!("request failed: {e}")),
        };

        let (retryable, reason) = outcome;
        if !retryable || attempt >= policy.max_retries {
            tracing::debug!("{} is broken: {}", url, reason);
            return LinkStatus::Broken(reason);
        }

        attempt += 1;
        tracing::debug!("Retry {}/{} for {}: {}", attempt, policy.max_retries, url, reason);
        sleep(wait).await;
        wait *= 2;
    }
}
