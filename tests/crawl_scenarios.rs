//! End-to-end crawl scenarios against a local `mockito` fixture server,
//! covering the universal invariants (scope soundness, dedup, disallowed
//! extensions, depth bound, body-length suppression) plus the enqueue path
//! used by the robots/sitemap/archives producers.

mod common;

use common::*;
use pathfinder_crawl::emit::Kind;
use pathfinder_crawl::imurl::ImUrl;

#[tokio::test]
async fn scope_soundness_confines_discovery_to_the_target_host() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let root_html = r#"<html><body>
        <a href="/inside">inside</a>
        <a href="http://off-target.invalid/outside">outside</a>
    </body></html>"#;
    let _root = create_html_mock(&mut server, "/", root_html).await;
    let _inside = create_html_mock(&mut server, "/inside", "<html><body>ok</body></html>").await;

    let (code, records) = run_crawl(&base, |b| b.depth(2)).await;
    assert_eq!(code, 0);

    assert!(records.iter().any(|r| r.is_kind(Kind::Url) && r.output == format!("{base}/")));
    assert!(records.iter().any(|r| r.is_kind(Kind::Href) && r.output == format!("{base}/inside")));
    assert!(records.iter().any(|r| r.is_kind(Kind::Url) && r.output == format!("{base}/inside")));
    assert!(
        !records.iter().any(|r| r.output.contains("off-target.invalid")),
        "no record should ever reference the out-of-scope host: {records:?}"
    );
}

#[tokio::test]
async fn disallowed_extension_is_never_requested() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let root_html = r#"<html><body><a href="/photo.png">photo</a></body></html>"#;
    let _root = create_html_mock(&mut server, "/", root_html).await;
    let photo_mock = server
        .mock("GET", "/photo.png")
        .with_status(200)
        .with_body("binary")
        .expect(0)
        .create_async()
        .await;

    let (code, records) = run_crawl(&base, |b| b.depth(2)).await;
    assert_eq!(code, 0);
    photo_mock.assert_async().await;
    assert!(!records.iter().any(|r| r.output.ends_with("photo.png")));
}

#[tokio::test]
async fn depth_zero_enqueues_nothing_past_the_seed() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let root_html = r#"<html><body><a href="/next">next</a></body></html>"#;
    let _root = create_html_mock(&mut server, "/", root_html).await;
    let next_mock = server
        .mock("GET", "/next")
        .with_status(200)
        .with_body("ok")
        .expect(0)
        .create_async()
        .await;

    let (code, records) = run_crawl(&base, |b| b.depth(0)).await;
    assert_eq!(code, 0);
    next_mock.assert_async().await;
    assert_eq!(records.iter().filter(|r| r.is_kind(Kind::Url)).count(), 1);
    assert!(!records.iter().any(|r| r.is_kind(Kind::Href)));
}

#[tokio::test]
async fn javascript_assets_are_fetched_and_linkfinder_discovers_routes() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let root_html = r#"<html><head><script src="/app.js"></script></head><body></body></html>"#;
    let _root = create_html_mock(&mut server, "/", root_html).await;
    let js_body = r#"
        fetch("/api/v1/users");
        const mime = "application/json";
        const when = "2024-01-01";
    "#;
    let _js = create_typed_mock(&mut server, "/app.js", "application/javascript", js_body).await;

    let (code, records) = run_crawl(&base, |b| b.depth(1)).await;
    assert_eq!(code, 0);

    assert!(records
        .iter()
        .any(|r| r.is_kind(Kind::Javascript) && r.output == format!("{base}/app.js")));
    assert!(records
        .iter()
        .any(|r| r.is_kind(Kind::Linkfinder) && r.output == format!("{base}/api/v1/users")));
    assert!(!records.iter().any(|r| r.output.contains("application/json")));
    assert!(!records.iter().any(|r| r.output.contains("2024-01-01")));
}

#[tokio::test]
async fn linkfinder_disabled_skips_js_subcrawl_but_still_emits_the_asset() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let root_html = r#"<html><head><script src="/app.js"></script></head><body></body></html>"#;
    let _root = create_html_mock(&mut server, "/", root_html).await;
    let js_mock = server
        .mock("GET", "/app.js")
        .with_status(200)
        .with_header("content-type", "application/javascript")
        .with_body(r#"fetch("/api/v1/users");"#)
        .expect(0)
        .create_async()
        .await;

    let (code, records) = run_crawl(&base, |b| b.linkfinder(false)).await;
    assert_eq!(code, 0);
    js_mock.assert_async().await;
    assert!(records
        .iter()
        .any(|r| r.is_kind(Kind::Javascript) && r.output == format!("{base}/app.js")));
    assert!(!records.iter().any(|r| r.is_kind(Kind::Linkfinder)));
}

#[tokio::test]
async fn duplicate_hrefs_resolving_to_the_same_canonical_url_are_fetched_once() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let root_html = r#"<html><body>
        <a href="/dup">first</a>
        <a href="/dup#section">second</a>
    </body></html>"#;
    let _root = create_html_mock(&mut server, "/", root_html).await;
    let dup_mock = server
        .mock("GET", "/dup")
        .with_status(200)
        .with_body("ok")
        .expect(1)
        .create_async()
        .await;

    let (code, records) = run_crawl(&base, |b| b.depth(2)).await;
    assert_eq!(code, 0);
    dup_mock.assert_async().await;
    assert_eq!(
        records
            .iter()
            .filter(|r| r.is_kind(Kind::Href) && r.output == format!("{base}/dup"))
            .count(),
        1
    );
}

#[tokio::test]
async fn filter_length_suppresses_url_emission_but_not_discovery() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let root_html = r#"<html><body><a href="/child">child</a></body></html>"#;
    let root_len = root_html.len();
    let _root = create_html_mock(&mut server, "/", root_html).await;
    let _child = create_html_mock(&mut server, "/child", "<html><body>leaf</body></html>").await;

    let (code, records) = run_crawl(&base, move |b| b.depth(1).filter_length(vec![root_len])).await;
    assert_eq!(code, 0);

    assert!(!records.iter().any(|r| r.is_kind(Kind::Url) && r.output == format!("{base}/")));
    assert!(records.iter().any(|r| r.is_kind(Kind::Href) && r.output == format!("{base}/child")));
    assert!(records.iter().any(|r| r.is_kind(Kind::Url) && r.output == format!("{base}/child")));
}

#[tokio::test]
async fn blacklist_pattern_suppresses_matching_urls_even_when_in_scope() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let root_html = r#"<html><body>
        <a href="/admin/secret">secret</a>
        <a href="/public">public</a>
    </body></html>"#;
    let _root = create_html_mock(&mut server, "/", root_html).await;
    let admin_mock = server
        .mock("GET", "/admin/secret")
        .with_status(200)
        .with_body("x")
        .expect(0)
        .create_async()
        .await;
    let _public = create_html_mock(&mut server, "/public", "<html><body>ok</body></html>").await;

    let (code, records) = run_crawl(&base, |b| b.depth(1).blacklist("/admin/").unwrap()).await;
    assert_eq!(code, 0);
    admin_mock.assert_async().await;
    assert!(!records.iter().any(|r| r.output.contains("/admin/")));
    assert!(records.iter().any(|r| r.is_kind(Kind::Url) && r.output == format!("{base}/public")));
}

#[tokio::test]
async fn suppressed_status_codes_are_fetched_but_never_emitted_as_url() {
    let mut server = setup_mock_server().await;
    let base = server.url();
    let _root = server
        .mock("GET", "/")
        .with_status(404)
        .with_body("gone")
        .create_async()
        .await;

    let (code, records) = run_crawl(&base, |b| b.depth(1)).await;
    assert_eq!(code, 0);
    assert!(records.is_empty(), "a 404 seed must produce no url record: {records:?}");
}

#[tokio::test]
async fn enqueue_external_opt_gates_emission_but_not_the_enqueue() {
    let output_dir = tempfile::tempdir().unwrap();
    let engine = build_test_engine("a.test", output_dir.path()).await;

    let silent = ImUrl::parse("https://a.test/silent").unwrap();
    let loud = ImUrl::parse("https://a.test/loud").unwrap();

    assert!(engine.enqueue_external_opt(silent, "archives", Kind::Raw, false).await);
    assert!(engine.enqueue_external_opt(loud, "archives", Kind::Raw, true).await);

    engine.sink.close().await.unwrap();

    let records = read_records_for_host(output_dir.path(), "a.test");
    assert!(!records.iter().any(|r| r.output.contains("silent")));
    assert!(records.iter().any(|r| r.output.contains("loud")));
}

#[tokio::test]
async fn enqueue_external_rejects_out_of_scope_and_duplicate_urls() {
    let output_dir = tempfile::tempdir().unwrap();
    let engine = build_test_engine("a.test", output_dir.path()).await;

    let out_of_scope = ImUrl::parse("https://b.test/elsewhere").unwrap();
    assert!(!engine.enqueue_external(out_of_scope, "robots", Kind::Robots).await);

    let once = ImUrl::parse("https://a.test/sitemap-entry").unwrap();
    assert!(engine.enqueue_external(once.clone(), "sitemap", Kind::Sitemap).await);
    assert!(
        !engine.enqueue_external(once, "sitemap", Kind::Sitemap).await,
        "second observation of the same canonical URL must not re-enqueue"
    );
}
