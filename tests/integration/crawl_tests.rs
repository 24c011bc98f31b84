//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the host and run full crawls
//! through the real fetcher, extractors and sinks.

use rusqlite::Connection;
use sluice_crawler::config::{Config, EgressConfig, GlobalWaitEntry, OutputConfig, WriteMode};
use sluice_crawler::crawler::{Controller, HttpFetcher};
use sluice_crawler::egress::EgressPool;
use sluice_crawler::output::build_sinks;
use sluice_crawler::state::StreamKind;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with no pauses
fn create_test_config(base_url: &str, out: &Path) -> Config {
    let mut config = Config::default();
    config.session.base_url = base_url.to_string();
    config.session.cookie = "SUB=test".to_string();
    config.crawl.max_list_pages = 5;
    config.crawl.max_comment_pages = 5;
    config.crawl.request_timeout = 5;
    config.crawl.rotate_identity_every = 0;
    config.pacing.min_wait = 0.0;
    config.pacing.max_wait = 0.0;
    config.pacing.min_failure_wait = 0.0;
    config.pacing.max_failure_wait = 0.0;
    config.pacing.min_page_gap = 1000;
    config.pacing.max_page_gap = 1000;
    config.pacing.global_wait = vec![GlobalWaitEntry {
        pages: 1000,
        wait: 0,
    }];
    config.pacing.seed = Some(42);
    config.egress = EgressConfig::default();
    config.output = OutputConfig {
        directory: out.join("csv").to_string_lossy().into_owned(),
        write_mode: vec![WriteMode::Csv, WriteMode::Sqlite],
        database_path: out.join("crawl.db").to_string_lossy().into_owned(),
    };
    config
}

fn post(id: &str, text: &str) -> String {
    format!(
        r#"<div class="c" id="M_{id}"><div><span class="ctt">{text}</span>
<a href="/repost/{id}">转发[1]</a> <a href="/comment/{id}">评论[2]</a> <a href="/attitude/{id}">赞[3]</a>
<span class="ct">04月01日 10:00&nbsp;来自iPhone</span></div></div>"#
    )
}

fn comment(id: &str, user: &str, text: &str) -> String {
    format!(
        r#"<div class="c" id="C_{id}"><a href="/u/{user}">user{user}</a>:<span class="ctt">{text}</span>
<a href="/attitudeComment?id={id}">赞[0]</a><span class="ct">04月01日 10:05&nbsp;来自Android&nbsp;上海</span></div>"#
    )
}

fn html_page(items: &[String], total: u32) -> String {
    format!(
        r#"<html><body>{}<div id="pagelist"><form><input name="mp" type="hidden" value="{}" /></form></div></body></html>"#,
        items.concat(),
        total
    )
}

async fn mount_page(server: &MockServer, route: &str, page: u32, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn run_crawl(config: &Config, users: &[&str]) -> sluice_crawler::CrawlReport {
    let pool = EgressPool::from_config(config.egress.clone());
    pool.initialize().await;

    let sinks = build_sinks(&config.output, "test-hash").expect("Failed to open sinks");
    let mut controller = Controller::new(config, HttpFetcher::new(), sinks, pool);

    let users: Vec<String> = users.iter().map(|u| u.to_string()).collect();
    controller.run(&users).await.expect("Crawl failed")
}

fn read_csv(path: &Path) -> Vec<Vec<String>> {
    let bytes = fs::read(path).expect("Failed to read CSV");
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"), "missing BOM");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(&bytes[3..]);
    reader
        .records()
        .map(|r| r.expect("Bad CSV row").iter().map(String::from).collect())
        .collect()
}

#[tokio::test]
async fn test_full_crawl_posts_and_comments() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());

    mount_page(
        &server,
        "/2803301701",
        1,
        html_page(&[post("P1", "hello"), post("P2", "world")], 2),
    )
    .await;
    mount_page(&server, "/2803301701", 2, html_page(&[post("P3", "again")], 2)).await;
    mount_page(
        &server,
        "/comment/P1",
        1,
        html_page(&[comment("11", "501", "nice"), comment("12", "502", "ok")], 1),
    )
    .await;
    mount_page(&server, "/comment/P2", 1, html_page(&[], 1)).await;
    mount_page(
        &server,
        "/comment/P3",
        1,
        html_page(&[comment("31", "503", "late")], 1),
    )
    .await;

    let report = run_crawl(&config, &["2803301701"]).await;

    let posts: Vec<_> = report.streams_of(StreamKind::Posts).collect();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].pages, vec![1, 2]);
    assert_eq!(posts[0].total_pages, Some(2));

    let comments: Vec<_> = report.streams_of(StreamKind::Comments).collect();
    assert_eq!(comments.len(), 3);
    assert!(comments[1].ended_empty);

    assert_eq!(report.stats.items_written, 6);
    assert_eq!(report.stats.resources, 1);
    assert_eq!(report.stats.fetch_failures, 0);

    // CSV layout
    let user_dir = dir.path().join("csv").join("2803301701");
    let post_rows = read_csv(&user_dir.join("2803301701.csv"));
    assert_eq!(post_rows[0][..3], ["id", "number", "page"]);
    let ids: Vec<&str> = post_rows[1..].iter().map(|r| r[0].as_str()).collect();
    assert_eq!(ids, vec!["P1", "P2", "P3"]);
    assert_eq!(post_rows[3][1], "3");
    assert_eq!(post_rows[3][2], "2");

    let p1_rows = read_csv(&user_dir.join("comments_P1.csv"));
    assert_eq!(p1_rows.len(), 3);
    assert_eq!(p1_rows[1][4], "1-1");
    assert_eq!(p1_rows[2][4], "1-2");
    assert!(!user_dir.join("comments_P2.csv").exists());

    let p3_rows = read_csv(&user_dir.join("comments_P3.csv"));
    assert_eq!(p3_rows[1][4], "3-1");

    // SQLite run
    let conn = Connection::open(dir.path().join("crawl.db")).unwrap();
    let records: i64 = conn
        .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
        .unwrap();
    assert_eq!(records, 6);
    let status: String = conn
        .query_row("SELECT status FROM runs", [], |row| row.get(0))
        .unwrap();
    assert_eq!(status, "completed");
}

#[tokio::test]
async fn test_rejected_page_is_retried_not_skipped() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server.uri(), dir.path());
    config.crawl.crawl_comments = false;

    // First request for page 2 is refused, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/100"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(403))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_page(&server, "/100", 1, html_page(&[post("A", "a")], 3)).await;
    mount_page(&server, "/100", 2, html_page(&[post("B", "b")], 3)).await;
    mount_page(&server, "/100", 3, html_page(&[post("C", "c")], 3)).await;

    let report = run_crawl(&config, &["100"]).await;

    assert_eq!(report.streams[0].pages, vec![1, 2, 3]);
    assert_eq!(report.stats.fetch_failures, 1);
    assert_eq!(report.stats.items_written, 3);

    let requests = server.received_requests().await.unwrap();
    let page_two = requests
        .iter()
        .filter(|r| r.url.query() == Some("page=2"))
        .count();
    assert_eq!(page_two, 2);
}

#[tokio::test]
async fn test_requests_carry_session_and_identity() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server.uri(), dir.path());
    config.crawl.crawl_comments = false;
    config.identity.user_agents = vec!["sluice-test/1.0".to_string()];

    // Served only when every session header is present; the fallback
    // leaves the expectation unmet
    Mock::given(method("GET"))
        .and(path("/100"))
        .and(header("cookie", "SUB=test"))
        .and(header("user-agent", "sluice-test/1.0"))
        .and(header_exists("referer"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html_page(&[post("A", "a")], 1)))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/100", 1, html_page(&[post("A", "a")], 1)).await;

    let report = run_crawl(&config, &["100"]).await;
    assert_eq!(report.stats.pages_fetched, 1);
}

#[tokio::test]
async fn test_multiple_users_crawled_in_order() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server.uri(), dir.path());
    config.crawl.crawl_comments = false;
    config.output.write_mode = vec![WriteMode::Csv];

    mount_page(&server, "/100", 1, html_page(&[post("A", "a")], 1)).await;
    mount_page(&server, "/200", 1, html_page(&[post("B", "b")], 1)).await;

    let report = run_crawl(&config, &["100", "200"]).await;

    let resources: Vec<&str> = report
        .streams
        .iter()
        .map(|s| s.resource_id.as_str())
        .collect();
    assert_eq!(resources, vec!["100", "200"]);
    assert!(dir.path().join("csv/100/100.csv").exists());
    assert!(dir.path().join("csv/200/200.csv").exists());
    assert!(!dir.path().join("crawl.db").exists());
}

#[tokio::test]
async fn test_interrupted_crawl_marks_run_interrupted() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server.uri(), dir.path());
    config.output.write_mode = vec![WriteMode::Sqlite];

    Mock::given(method("GET"))
        .and(path("/100"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html_page(&[post("A", "a")], 1))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let pool = EgressPool::from_config(config.egress.clone());
    pool.initialize().await;
    let sinks = build_sinks(&config.output, "test-hash").expect("Failed to open sinks");
    let mut controller = Controller::new(&config, HttpFetcher::new(), sinks, pool);

    let users = vec!["100".to_string()];
    let cut_off = tokio::time::timeout(Duration::from_millis(300), controller.run(&users)).await;
    assert!(cut_off.is_err());
    controller.interrupt().expect("Failed to close sinks");

    let conn = Connection::open(dir.path().join("crawl.db")).unwrap();
    let (status, finished_at): (String, Option<String>) = conn
        .query_row("SELECT status, finished_at FROM runs", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(status, "interrupted");
    assert!(finished_at.is_some());
}
