use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd, TextMergeWithOffset};
use regex::Regex;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use url::Url;

static BARE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`\)\]]+"#).expect("valid url regex"));
static HTML_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(?:href|src)\s*=\s*["']([^"']+)["']"#).expect("valid attribute regex"));

/// Element/attribute pairs that carry links in rendered pages
const HTML_LINK_ATTRS: &[(&str, &str)] = &[
    ("a[href]", "href"),
    ("link[href]", "href"),
    ("img[src]", "src"),
    ("script[src]", "src"),
    ("source[src]", "src"),
    ("iframe[src]", "src"),
];

/// A link as written in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub url: String,
    /// 1-based line, when the format allows locating it
    pub line: Option<usize>,
}

/// What a link points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Remote(Url),
    Mail(String),
    Local(PathBuf),
    /// Same-page anchors, templates and schemes that cannot be checked
    Ignored,
    Invalid(String),
}

pub fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
}

/// Extract links from a markdown, Quarto or HTML file
pub fn extract_links(path: &Path, content: &str) -> Vec<RawLink> {
    if is_html(path) {
        extract_html(content)
    } else {
        extract_markdown(content)
    }
}

pub fn extract_markdown(content: &str) -> Vec<RawLink> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(content.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let line_of = |offset: usize| Some(line_starts.partition_point(|&start| start <= offset));

    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_YAML_STYLE_METADATA_BLOCKS;

    let mut links = Vec::new();
    let mut in_code_block = false;
    let mut link_depth = 0usize;

    // `~` and `*` split text events, so merge them before looking for bare URLs
    let events = TextMergeWithOffset::new(Parser::new_ext(content, options).into_offset_iter());

    for (event, range) in events {
        match event {
            Event::Start(Tag::Link { dest_url, .. }) => {
                link_depth += 1;
                links.push(RawLink {
                    url: dest_url.to_string(),
                    line: line_of(range.start),
                });
            }
            Event::End(TagEnd::Link) => link_depth = link_depth.saturating_sub(1),
            Event::Start(Tag::Image { dest_url, .. }) => links.push(RawLink {
                url: dest_url.to_string(),
                line: line_of(range.start),
            }),
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::Text(text) if !in_code_block && link_depth == 0 => {
                for m in BARE_URL_RE.find_iter(&text) {
                    links.push(RawLink {
                        url: trim_trailing_punctuation(m.as_str()).to_string(),
                        line: line_of(range.start),
                    });
                }
            }
            Event::Html(html) | Event::InlineHtml(html) => {
                for cap in HTML_ATTR_RE.captures_iter(&html) {
                    links.push(RawLink {
                        url: cap[1].to_string(),
                        line: line_of(range.start),
                    });
                }
            }
            _ => {}
        }
    }

    links
}

pub fn extract_html(content: &str) -> Vec<RawLink> {
    let document = Html::parse_document(content);
    let mut links = Vec::new();

    for (selector, attr) in HTML_LINK_ATTRS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            if let Some(url) = element.value().attr(attr) {
                links.push(RawLink {
                    url: url.trim().to_string(),
                    line: None,
                });
            }
        }
    }

    links
}

fn trim_trailing_punctuation(url: &str) -> &str {
    url.trim_end_matches(['.', ',', ';', ':', '!', '?'])
}

/// Classify a link found in `source`; root-relative links resolve against `root_dir`
pub fn classify(raw: &str, source: &Path, root_dir: &Path) -> LinkKind {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || raw.contains("{{") {
        return LinkKind::Ignored;
    }
    if raw.starts_with("//") {
        return match Url::parse(&format!("https:{raw}")) {
            Ok(url) => LinkKind::Remote(url),
            Err(e) => LinkKind::Invalid(format!("{e}")),
        };
    }

    match Url::parse(raw) {
        Ok(url) => match url.scheme() {
            "http" | "https" => LinkKind::Remote(url),
            "mailto" => LinkKind::Mail(url.path().to_string()),
            "file" => match url.to_file_path() {
                Ok(path) => LinkKind::Local(path),
                Err(()) => LinkKind::Invalid(format!("unusable file URL {raw}")),
            },
            _ => LinkKind::Ignored,
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => resolve_local(raw, source, root_dir),
        Err(e) => LinkKind::Invalid(format!("{e}")),
    }
}

fn resolve_local(raw: &str, source: &Path, root_dir: &Path) -> LinkKind {
    let (base, relative) = match raw.strip_prefix('/') {
        Some(rest) => (root_dir.to_path_buf(), rest.trim_start_matches('/')),
        None => (source.parent().map(Path::to_path_buf).unwrap_or_default(), raw),
    };

    let base = match std::path::absolute(if base.as_os_str().is_empty() { Path::new(".") } else { &base }) {
        Ok(base) => base,
        Err(e) => return LinkKind::Invalid(format!("cannot resolve {raw}: {e}")),
    };
    let Ok(base_url) = Url::from_directory_path(&base) else {
        return LinkKind::Invalid(format!("cannot resolve {raw} from {}", base.display()));
    };

    match base_url.join(relative) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            match url.to_file_path() {
                Ok(path) => LinkKind::Local(path),
                Err(()) => LinkKind::Invalid(format!("cannot resolve {raw}")),
            }
        }
        Err(e) => LinkKind::Invalid(format!("{e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_links_with_lines() {
        let md = "---\ntitle: x\n---\n# Title\n\nSee [guide](setup.qmd#install) and ![logo](img/logo.png).\n\nVisit https://example.org/page.\n\n```\nhttps://in-code.example\n```\n<a href=\"https://raw.example\">raw</a>\n";
        let links = extract_markdown(md);
        let urls: Vec<_> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["setup.qmd#install", "img/logo.png", "https://example.org/page", "https://raw.example"]
        );
        assert_eq!(links[0].line, Some(6));
        assert_eq!(links[2].line, Some(8));
    }

    #[test]
    fn bare_urls_keep_tilde_and_asterisk() {
        let md = "Home: https://example.org/~user/page and more\n\nGlob https://example.org/files/a*b/c here\n";
        let urls: Vec<_> = extract_markdown(md).into_iter().map(|l| l.url).collect();
        assert_eq!(urls, vec!["https://example.org/~user/page", "https://example.org/files/a*b/c"]);
    }

    #[test]
    fn autolinks_are_not_duplicated() {
        let links = extract_markdown("<https://example.org>\n");
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn html_links() {
        let html = r#"<html><head><link rel="stylesheet" href="site.css"></head>
            <body><a href="index.html">home</a><img src="logo.png"><a name="anchor">x</a></body></html>"#;
        let urls: Vec<_> = extract_html(html).into_iter().map(|l| l.url).collect();
        assert_eq!(urls, vec!["index.html", "site.css", "logo.png"]);
    }

    #[test]
    fn classification() {
        let source = Path::new("/site/guides/page.md");
        let root = Path::new("/site");
        assert!(matches!(classify("https://example.org", source, root), LinkKind::Remote(_)));
        assert_eq!(classify("mailto:a@b.org", source, root), LinkKind::Mail("a@b.org".to_string()));
        assert_eq!(classify("#top", source, root), LinkKind::Ignored);
        assert_eq!(classify("tel:+3112345", source, root), LinkKind::Ignored);
        assert_eq!(classify("{{< var url >}}", source, root), LinkKind::Ignored);
        assert_eq!(
            classify("//cdn.jsdelivr.net/npm/x.js", Path::new("/site/index.html"), root),
            LinkKind::Remote(Url::parse("https://cdn.jsdelivr.net/npm/x.js").unwrap())
        );
        assert_eq!(
            classify("../other%20page.md#sec", source, root),
            LinkKind::Local(PathBuf::from("/site/other page.md"))
        );
        assert_eq!(
            classify("/assets/logo.png?v=2", source, root),
            LinkKind::Local(PathBuf::from("/site/assets/logo.png"))
        );
    }
}
