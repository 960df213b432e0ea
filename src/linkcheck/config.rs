use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, shared with the CI link-check action
pub const DEFAULT_CONFIG_FILE: &str = "lychee.toml";

const DEFAULT_USER_AGENT: &str = concat!("guia-linkcheck/", env!("CARGO_PKG_VERSION"));

/// An accepted status: a single code or a range such as `"200..=299"`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AcceptEntry {
    Code(u16),
    Spec(String),
}

/// Link checker settings, read from a lychee-style TOML file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkCheckConfig {
    /// Regexes of links that are never checked
    pub exclude: Vec<String>,
    /// Regexes of file paths that are not scanned
    pub exclude_path: Vec<String>,
    pub include_mail: bool,
    pub max_retries: u32,
    /// Seconds before the first retry, doubled on each further attempt
    pub retry_wait_time: u64,
    /// Request timeout in seconds
    pub timeout: u64,
    pub max_concurrency: usize,
    pub accept: Option<Vec<AcceptEntry>>,
    pub user_agent: String,
    pub offline: bool,
    /// Directory that root-relative links (`/page.html`) resolve against
    pub root_dir: Option<PathBuf>,
}

impl Default for LinkCheckConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            exclude_path: Vec::new(),
            include_mail: false,
            max_retries: 2,
            retry_wait_time: 1,
            timeout: 20,
            max_concurrency: 16,
            accept: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            offline: false,
            root_dir: None,
        }
    }
}

/// Compiled form of the pattern and status settings
#[derive(Debug, Clone)]
pub struct LinkRules {
    pub exclude: Vec<Regex>,
    pub exclude_path: Vec<Regex>,
    pub accept: Vec<RangeInclusive<u16>>,
}

impl LinkRules {
    pub fn is_excluded_link(&self, link: &str) -> bool {
        self.exclude.iter().any(|re| re.is_match(link))
    }

    pub fn is_excluded_path(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.exclude_path.iter().any(|re| re.is_match(&path))
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.accept.iter().any(|range| range.contains(&status))
    }
}

impl LinkCheckConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read link checker config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid link checker config {}", path.display()))
    }

    /// Load `path` when given, else the default file if present, else defaults
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::load(Path::new(DEFAULT_CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    pub fn compile(&self) -> Result<LinkRules> {
        let exclude = compile_patterns(&self.exclude, "exclude")?;
        let exclude_path = compile_patterns(&self.exclude_path, "exclude_path")?;

        let accept = match &self.accept {
            None => vec![100..=103, 200..=299],
            Some(entries) => {
                let mut ranges = Vec::new();
                for entry in entries {
                    match entry {
                        AcceptEntry::Code(code) => ranges.push(*code..=*code),
                        AcceptEntry::Spec(spec) => {
                            for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                                ranges.push(parse_status_range(part)?);
                            }
                        }
                    }
                }
                ranges
            }
        };

        Ok(LinkRules {
            exclude,
            exclude_path,
            accept,
        })
    }
}

fn compile_patterns(patterns: &[String], field: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("invalid {field} pattern '{p}'")))
        .collect()
}

/// Parse `200`, `200..=299` or `200..300`
pub fn parse_status_range(spec: &str) -> Result<RangeInclusive<u16>> {
    let parse = |s: &str| -> Result<u16> {
        s.trim()
            .parse::<u16>()
            .with_context(|| format!("invalid status code '{s}' in accept range '{spec}'"))
    };

    let range = if let Some((start, end)) = spec.split_once("..=") {
        parse(start)?..=parse(end)?
    } else if let Some((start, end)) = spec.split_once("..") {
        let end = parse(end)?;
        if end == 0 {
            anyhow::bail!("empty accept range '{spec}'");
        }
        parse(start)?..=end - 1
    } else {
        let code = parse(spec)?;
        code..=code
    };

    if range.is_empty() {
        anyhow::bail!("empty accept range '{spec}'");
    }
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranges() {
        assert_eq!(parse_status_range("200..=299").unwrap(), 200..=299);
        assert_eq!(parse_status_range("200..300").unwrap(), 200..=299);
        assert_eq!(parse_status_range("429").unwrap(), 429..=429);
        assert!(parse_status_range("300..=200").is_err());
        assert!(parse_status_range("abc").is_err());
    }

    #[test]
    fn config_from_toml() {
        let config: LinkCheckConfig = toml::from_str(
            r#"
            exclude = ["^https://localhost"]
            max_retries = 4
            accept = [200, "300..=308", "429"]
            unknown_key = "ignored"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.timeout, 20);

        let rules = config.compile().unwrap();
        assert!(rules.accepts(200));
        assert!(rules.accepts(301));
        assert!(rules.accepts(429));
        assert!(!rules.accepts(404));
        assert!(rules.is_excluded_link("https://localhost:4000/x"));
    }

    #[test]
    fn default_accepts_success_codes() {
        let rules = LinkCheckConfig::default().compile().unwrap();
        assert!(rules.accepts(204));
        assert!(!rules.accepts(429));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let config = LinkCheckConfig {
            exclude: vec!["(".to_string()],
            ..Default::default()
        };
        assert!(config.compile().is_err());
    }
}
