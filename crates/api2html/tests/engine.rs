use api2html::{
    Backend, BackendError, BackendRequest, BackendResponse, Config, EngineError, EngineFactory,
    EngineOptions, Page,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

/// Lays out the scenario site: templates, layouts, static files, public folder
fn write_site(root: &Path) -> std::path::PathBuf {
    let static_dir = root.join("static");
    let public_dir = root.join("public");
    fs::create_dir_all(&static_dir).unwrap();
    fs::create_dir_all(&public_dir).unwrap();

    fs::write(root.join("test_tmpl"), "hi, {{Extra.name}}!").unwrap();
    fs::write(root.join("test_lyt"), "-{{{content}}}-").unwrap();
    fs::write(static_dir.join("s.txt"), "12345").unwrap();
    fs::write(static_dir.join("robots.txt"), "User-agent: *").unwrap();
    fs::write(static_dir.join("sitemap.xml"), "<urlset></urlset>").unwrap();
    fs::write(public_dir.join("public.js"), "console.log(1);").unwrap();

    let config = serde_json::json!({
        "pages": [
            {
                "name": "a",
                "url_pattern": "/a",
                "template": "a",
                "layout": "b",
                "extra": {"name": "stranger"}
            },
            {
                "name": "b",
                "url_pattern": "/b",
                "backend_url_pattern": "http://backend/b",
                "template": "a"
            }
        ],
        "static_txt_content": ["s.txt"],
        "robots": true,
        "sitemap": true,
        "templates": {"a": root.join("test_tmpl")},
        "layouts": {"b": root.join("test_lyt")},
        "public_folder": {"path_to_folder": public_dir, "url_prefix": "/js"}
    });
    let config_path = root.join("config.json");
    fs::write(&config_path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    config_path
}

fn no_backend(_page: &Page) -> Option<Arc<dyn Backend>> {
    None
}

fn factory(root: &Path) -> EngineFactory {
    EngineFactory::new(EngineOptions {
        static_dir: root.join("static"),
        reload_interval: Duration::from_millis(50),
        ..Default::default()
    })
    .with_backend_factory(no_backend)
}

#[tokio::test]
async fn test_scenario_site() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_site(dir.path());
    let engine = factory(dir.path()).build(&config_path, false).unwrap();
    let router = engine.router();

    assert_eq!(get(&router, "/a").await, (StatusCode::OK, "-hi, stranger!-".to_string()));

    let (status, body) = get(&router, "/b").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, api2html::page::DEFAULT_NOT_FOUND_BODY);

    assert_eq!(get(&router, "/s.txt").await, (StatusCode::OK, "12345".to_string()));
    assert_eq!(
        get(&router, "/robots.txt").await,
        (StatusCode::OK, "User-agent: *".to_string())
    );
    assert_eq!(
        get(&router, "/sitemap.xml").await,
        (StatusCode::OK, "<urlset></urlset>".to_string())
    );
    assert_eq!(
        get(&router, "/js/public.js").await,
        (StatusCode::OK, "console.log(1);".to_string())
    );

    let (status, body) = get(&router, "/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, api2html::page::DEFAULT_NOT_FOUND_BODY);

    let (status, _) = get(&router, "/js/missing.js").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_default_error_bodies_come_from_static_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_site(dir.path());
    fs::write(dir.path().join("static").join("404"), "custom not found").unwrap();

    let engine = factory(dir.path()).build(&config_path, false).unwrap();
    let router = engine.router();

    assert_eq!(
        get(&router, "/b").await,
        (StatusCode::NOT_FOUND, "custom not found".to_string())
    );
    assert_eq!(
        get(&router, "/unknown").await,
        (StatusCode::NOT_FOUND, "custom not found".to_string())
    );
}

#[tokio::test]
async fn test_parser_errors_abort_construction() {
    let failing = EngineFactory::default()
        .with_parser(|_path: &Path| -> anyhow::Result<Config> {
            anyhow::bail!("unreadable route table")
        });

    let err = failing.build("whatever.json", false).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert!(err.to_string().contains("unreadable route table"));

    let dir = tempfile::tempdir().unwrap();
    let err = EngineFactory::default()
        .build(dir.path().join("missing.json"), false)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

/// Answers every call with the same JSON and remembers what it was asked
struct RecordingBackend {
    body: &'static str,
    requests: Mutex<Vec<BackendRequest>>,
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn fetch(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(BackendResponse::ok(self.body).with_header("X-Collection", "true"))
    }
}

#[tokio::test]
async fn test_backend_page_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("list.hbs");
    fs::write(
        &template,
        "{{Params.user}}:{{#each Array}}<li>{{title}}</li>{{/each}}",
    )
    .unwrap();

    let config = Config {
        pages: vec![Page {
            url_pattern: "/users/:user/posts".into(),
            backend_url_pattern: "http://api/users/:user/posts".into(),
            template: "list".into(),
            header: "X-Collection".into(),
            cache_ttl: "1m".into(),
            ..Default::default()
        }],
        templates: [("list".to_string(), template)].into_iter().collect(),
        ..Default::default()
    };

    let backend = Arc::new(RecordingBackend {
        body: r#"[{"title": "one"}, {"title": "two"}]"#,
        requests: Mutex::new(Vec::new()),
    });
    let shared = backend.clone();
    let engine = EngineFactory::new(EngineOptions {
        static_dir: dir.path().to_path_buf(),
        ..Default::default()
    })
    .with_backend_factory(move |_page: &Page| -> Option<Arc<dyn Backend>> {
        Some(shared.clone() as Arc<dyn Backend>)
    })
    .build_from(config, false)
    .unwrap();

    let request = Request::builder()
        .uri("/users/ana/posts?page=2")
        .header("Cookie", "session=abc")
        .header("User-Agent", "test")
        .body(Body::empty())
        .unwrap();
    let response = engine.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=60"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"ana:<li>one</li><li>two</li>");

    // second request is served from the cache
    let (status, _) = get(&engine.router(), "/users/ana/posts?page=2").await;
    assert_eq!(status, StatusCode::OK);

    let requests = backend.requests.lock().unwrap();
    assert_eq!(requests.len(), 2, "different forwarded headers, different fingerprint");
    assert_eq!(requests[0].url, "http://api/users/ana/posts?page=2");
    assert_eq!(requests[0].headers.get("cookie").map(String::as_str), Some("session=abc"));
    assert!(!requests[0].headers.contains_key("user-agent"));
    assert_eq!(requests[0].params["page"], "2");
    assert_eq!(requests[0].params["user"], "ana");
    drop(requests);

    get(&engine.router(), "/users/ana/posts?page=2").await;
    assert_eq!(backend.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_undecodable_path_param_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("post.hbs");
    fs::write(&template, "{{Data.title}}").unwrap();

    let config = Config {
        pages: vec![Page {
            url_pattern: "/posts/:id".into(),
            backend_url_pattern: "http://api/posts/:id".into(),
            template: "post".into(),
            ..Default::default()
        }],
        templates: [("post".to_string(), template)].into_iter().collect(),
        ..Default::default()
    };

    let backend = Arc::new(RecordingBackend {
        body: r#"{"title": "hello"}"#,
        requests: Mutex::new(Vec::new()),
    });
    let shared = backend.clone();
    let engine = factory(dir.path())
        .with_backend_factory(move |_page: &Page| -> Option<Arc<dyn Backend>> {
            Some(shared.clone() as Arc<dyn Backend>)
        })
        .build_from(config, false)
        .unwrap();
    let router = engine.router();

    let (status, body) = get(&router, "/posts/%FF").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("404 Page Not Found"), "{}", body);
    assert!(backend.requests.lock().unwrap().is_empty());

    let (status, body) = get(&router, "/posts/7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello");
    assert_eq!(backend.requests.lock().unwrap()[0].url, "http://api/posts/7");
}

#[tokio::test]
async fn test_live_reload_serves_new_template() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_site(dir.path());
    let engine = factory(dir.path()).build(&config_path, true).unwrap();
    let router = engine.router();
    let mut updates = engine.templates().subscribe("a");

    assert_eq!(get(&router, "/a").await.1, "-hi, stranger!-");

    fs::write(dir.path().join("test_tmpl"), "bye, {{Extra.name}}!").unwrap();
    let renderer = tokio::time::timeout(Duration::from_secs(5), updates.next())
        .await
        .expect("template was not reloaded")
        .unwrap();
    drop(renderer);

    assert_eq!(get(&router, "/a").await.1, "-bye, stranger!-");
}
