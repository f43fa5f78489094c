use alertmanager::scanner::{HttpProbe, Probe, ScanError};
use axum::http::StatusCode;
use axum::routing::get;
use std::time::Duration;

async fn spawn_site() -> String {
    let router = axum::Router::new()
        .route("/", get(|| async { "<h1>Welcome to Example</h1>" }))
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "<h1>Welcome to Example</h1>") }),
        )
        .route(
            "/moved",
            get(|| async { axum::response::Redirect::temporary("/") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "Welcome"
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_probe_of_live_site() {
    let base = spawn_site().await;
    let probe = HttpProbe::new().unwrap();

    probe.probe(&format!("{base}/"), "Welcome").await.unwrap();

    // Responses are inspected regardless of their status.
    probe
        .probe(&format!("{base}/missing"), "Welcome")
        .await
        .unwrap();

    match probe.probe(&format!("{base}/"), "Goodbye").await {
        Err(ScanError::NotFound { find, body }) => {
            assert_eq!(find, "Goodbye");
            assert_eq!(body, "<h1>Welcome to Example</h1>");
        }
        other => panic!("unexpected result {other:?}"),
    }

    // Redirects are not followed, and the redirect itself has an empty body.
    assert!(matches!(
        probe.probe(&format!("{base}/moved"), "Welcome").await,
        Err(ScanError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_probe_of_unreachable_site() {
    // Bind and then drop a listener, so its port is very likely unused.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::mem::drop(listener);

    let url = format!("http://{addr}/");
    let probe = HttpProbe::new().unwrap();

    match probe.probe(&url, "Welcome").await {
        Err(err @ ScanError::Fetch { .. }) => {
            assert!(
                err.to_string().starts_with(&format!("fetching {url}: sending request")),
                "{err}"
            );
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_site_times_out() {
    use alertmanager::scanner::{scan_monitors, ScanConfig};
    use alertmanager::HttpMonitor;

    let base = spawn_site().await;
    let probe = HttpProbe::new().unwrap();
    let config = ScanConfig {
        workers: 2,
        timeout: Duration::from_millis(500),
        retry_timeout: Duration::from_secs(1),
    };
    let monitor = |id: &str, path: &str| HttpMonitor {
        id: id.to_string(),
        created_at: "2019-09-07T12:00:00Z".parse().unwrap(),
        enabled: true,
        url: format!("{base}{path}"),
        find: "Welcome".to_string(),
    };

    let failures = scan_monitors(
        vec![monitor("fast", "/"), monitor("slow", "/slow")],
        &probe,
        &config,
        &tokio_util::sync::CancellationToken::new(),
    )
    .await;

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].monitor.id, "slow");
    // The reported timeout is that of the retry.
    assert_eq!(failures[0].error.to_string(), "timed out after 1s");
}
