use std::fs;
use std::path::{Path, PathBuf};

use guia::linkcheck::{LinkCheckConfig, LinkChecker};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn offline_config(root: &Path) -> LinkCheckConfig {
    LinkCheckConfig {
        offline: true,
        root_dir: Some(root.to_path_buf()),
        ..Default::default()
    }
}

fn remote_config(root: &Path) -> LinkCheckConfig {
    LinkCheckConfig {
        max_retries: 2,
        retry_wait_time: 0,
        timeout: 5,
        root_dir: Some(root.to_path_buf()),
        ..Default::default()
    }
}

async fn respond(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

fn site(root: &Path) {
    write(
        root,
        "docs/index.qmd",
        "# Welcome\n\nRead the [setup guide](guides/setup.qmd) and the [missing page](guides/gone.qmd).\n\nWrite to <mailto:dcc@example.org> or see https://example.org/docs.\n",
    );
    write(
        root,
        "docs/guides/setup.qmd",
        "## Setup\n\nBack to [home](../index.qmd#welcome) or [top](#setup).\n\n![diagram](../img/flow.png)\n",
    );
    write(
        root,
        "_site/index.html",
        r#"<html><body><a href="/docs/index.qmd">source</a><img src="missing.png"></body></html>"#,
    );
}

#[tokio::test]
async fn test_offline_run_reports_broken_local_links() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    site(root);

    let checker = LinkChecker::new(offline_config(root)).unwrap();
    let report = checker.run(&[root.to_path_buf()]).await.unwrap();

    assert_eq!(report.files, 3);
    assert!(!report.is_success());

    let broken: Vec<_> = report.broken.iter().map(|b| b.link.as_str()).collect();
    assert_eq!(broken, vec!["missing.png", "../img/flow.png", "guides/gone.qmd"]);

    let gone = &report.broken[2];
    assert!(gone.source.ends_with("docs/index.qmd"));
    assert_eq!(gone.line, Some(3));

    // remote link, mail link and same-page anchor
    assert_eq!(report.excluded, 3);
    assert_eq!(report.ok, 3);
    assert_eq!(report.total, report.ok + report.excluded + report.broken.len());
    assert!(report.summary().contains("3 errors"));
}

#[tokio::test]
async fn test_exclude_path_and_exclude_patterns() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    site(root);

    let config = LinkCheckConfig {
        exclude: vec![r"gone\.qmd$".to_string(), r"flow\.png".to_string()],
        exclude_path: vec![r"_site".to_string()],
        ..offline_config(root)
    };
    let checker = LinkChecker::new(config).unwrap();
    let report = checker.run(&[root.join("docs")]).await.unwrap();

    assert_eq!(report.files, 2);
    assert!(report.is_success(), "{}", report.summary());
}

#[tokio::test]
async fn test_unreachable_remote_link_is_broken() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let page = write(
        root,
        "page.md",
        "Two mentions of [one server](http://127.0.0.1:9/a) and http://127.0.0.1:9/a again.\n",
    );

    let config = LinkCheckConfig {
        max_retries: 0,
        timeout: 2,
        root_dir: Some(root.to_path_buf()),
        ..Default::default()
    };
    let checker = LinkChecker::new(config).unwrap();
    let report = checker.check_files(&[page]).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.broken.len(), 2);
    assert!(report.broken.iter().all(|b| b.reason.starts_with("request")));
}

#[tokio::test]
async fn test_remote_status_decides_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/guide"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let base = server.uri();
    let page = write(
        root,
        "page.md",
        &format!("See [intro]({base}/guide#intro), [usage]({base}/guide#usage)\n\nand the [old page]({base}/gone).\n"),
    );

    let checker = LinkChecker::new(remote_config(root)).unwrap();
    let report = checker.check_files(&[page]).await.unwrap();

    // both anchors share one request to /guide
    assert_eq!(report.ok, 2);
    assert_eq!(report.broken.len(), 1);
    assert_eq!(report.broken[0].link, format!("{base}/gone"));
    assert_eq!(report.broken[0].reason, "status 404 Not Found");
    assert_eq!(report.broken[0].line, Some(3));
}

#[tokio::test]
async fn test_rate_limited_and_unavailable_links_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    respond(&server, "/busy", 200).await;
    respond(&server, "/flaky", 200).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let base = server.uri();
    let page = write(root, "page.md", &format!("{base}/busy and {base}/flaky\n"));

    let checker = LinkChecker::new(remote_config(root)).unwrap();
    let report = checker.check_files(&[page]).await.unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.ok, 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_server_error_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let page = write(root, "page.md", &format!("[status]({}/down)\n", server.uri()));

    let config = LinkCheckConfig {
        max_retries: 1,
        ..remote_config(root)
    };
    let checker = LinkChecker::new(config).unwrap();
    let report = checker.check_files(&[page]).await.unwrap();

    assert_eq!(report.broken.len(), 1);
    assert_eq!(report.broken[0].reason, "status 500 Internal Server Error");
}

#[tokio::test]
async fn test_mail_links_checked_when_enabled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let page = write(
        root,
        "contact.md",
        "[good](mailto:dcc@example.org) and [bad](mailto:not-an-address)\n",
    );

    let config = LinkCheckConfig {
        include_mail: true,
        ..offline_config(root)
    };
    let checker = LinkChecker::new(config).unwrap();
    let report = checker.check_files(&[page]).await.unwrap();

    assert_eq!(report.ok, 1);
    assert_eq!(report.broken.len(), 1);
    assert_eq!(report.broken[0].link, "mailto:not-an-address");
}

#[test]
fn test_missing_input_is_an_error() {
    let checker = LinkChecker::new(LinkCheckConfig::default()).unwrap();
    assert!(checker.collect_inputs(&[PathBuf::from("/nonexistent/guia/site")]).is_err());
}
