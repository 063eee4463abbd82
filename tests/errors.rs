//! Error pages, blocking and pages served by the proxy itself.

mod common;

use common::{header, start_origin, start_proxy, status, Client};

#[tokio::test]
async fn unknown_host_is_404_and_keeps_the_connection() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    client
        .send(b"GET http://no-such-host.invalid/ HTTP/1.1\r\nHost: no-such-host.invalid\r\n\r\n")
        .await;
    let (head, body) = client.response().await;
    assert_eq!(status(&head), 404);
    assert!(String::from_utf8_lossy(&body).contains("no-such-host.invalid"));
    assert!(header(&head, "Connection").is_none());

    // A request with a body that fails before the body is read is fatal.
    client
        .send(b"POST http://no-such-host.invalid/ HTTP/1.1\r\nHost: no-such-host.invalid\r\nContent-Length: 3\r\n\r\nabc")
        .await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 404);
    assert_eq!(header(&head, "Connection").as_deref(), Some("close"));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn http10_clients_are_rejected() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    client
        .send(b"GET http://example.com/ HTTP/1.0\r\nHost: example.com\r\n\r\n")
        .await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 400);
    assert_eq!(header(&head, "Connection").as_deref(), Some("close"));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn unsupported_scheme_is_501() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    client
        .send(b"GET ftp://files.example/pub HTTP/1.1\r\nHost: files.example\r\n\r\n")
        .await;
    let (head, body) = client.response().await;
    assert_eq!(status(&head), 501);
    assert!(String::from_utf8_lossy(&body).contains("ftp"));
}

#[tokio::test]
async fn malformed_request_line_is_400() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    client.send(b"THIS-IS-NOT-HTTP\r\n\r\n").await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 400);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn missing_host_is_400() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    client.send(b"GET /index.html HTTP/1.1\r\n\r\n").await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 400);
}

#[tokio::test]
async fn blocked_requests_are_answered_locally() {
    let origin = start_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n", false).await;
    let proxy = start_proxy(|_| {}).await;
    let rules = proxy.profile.rules();
    rules
        .block_rules
        .add_patterns(Some("127.0.0.1"), Some("/ads/"), None)
        .unwrap();
    rules
        .image_rules
        .add_patterns(Some("127.0.0.1"), Some(r"^/ads/.*\.gif$"), None)
        .unwrap();

    let mut client = Client::connect(proxy.addr).await;
    let port = origin.port();

    let request = format!(
        "GET http://127.0.0.1:{port}/ads/banner.html HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n"
    );
    client.send(request.as_bytes()).await;
    let (head, body) = client.response().await;
    assert_eq!(status(&head), 403);
    assert!(String::from_utf8_lossy(&body).contains("/rule?id="));

    let request = format!(
        "GET http://127.0.0.1:{port}/ads/banner.gif HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n"
    );
    client.send(request.as_bytes()).await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 307);
    assert_eq!(
        header(&head, "Location"),
        Some(format!("http://localhost:{}/res/blank.gif", proxy.addr.port()))
    );

    assert!(origin.requests().is_empty());
}

#[tokio::test]
async fn serves_builtin_resources() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    let request = format!(
        "GET /res/blank.gif HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n",
        proxy.addr.port()
    );
    client.send(request.as_bytes()).await;
    let (head, body) = client.response().await;
    assert_eq!(status(&head), 200);
    assert_eq!(header(&head, "Content-Type").as_deref(), Some("image/gif"));
    assert_eq!(body.len(), 43);
    assert!(body.starts_with(b"GIF89a"));
}

#[tokio::test]
async fn status_page_lists_rule_counts() {
    let proxy = start_proxy(|_| {}).await;
    proxy
        .profile
        .rules()
        .block_rules
        .add_patterns(Some("ads.example"), None, None)
        .unwrap();
    let mut client = Client::connect(proxy.addr).await;

    let request = format!(
        "GET http://localhost:{port}/ HTTP/1.1\r\nHost: localhost:{port}\r\n\r\n",
        port = proxy.addr.port()
    );
    client.send(request.as_bytes()).await;
    let (head, body) = client.response().await;
    assert_eq!(status(&head), 200);
    let html = String::from_utf8_lossy(&body);
    assert!(html.contains("Proxy status for default"), "{html}");
    assert!(html.contains("<tr><th>Block rules</th><td>1</td></tr>"), "{html}");
}

#[tokio::test]
async fn options_with_no_forwards_left_ends_at_the_proxy() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    client
        .send(b"OPTIONS http://example.com/ HTTP/1.1\r\nHost: example.com\r\nMax-Forwards: 0\r\n\r\n")
        .await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 501);
}

#[tokio::test]
async fn unsupported_local_method_is_501() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    let request = format!(
        "DELETE /res/blank.gif HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n",
        proxy.addr.port()
    );
    client.send(request.as_bytes()).await;
    let (head, body) = client.response().await;
    assert_eq!(status(&head), 501);
    assert!(String::from_utf8_lossy(&body).contains("DELETE"));
}

fn local_request(proxy: &common::TestProxy, head: &str, body: &str) -> String {
    format!(
        "{head}\r\nHost: 127.0.0.1:{}\r\n{body}",
        proxy.addr.port()
    )
}

#[tokio::test]
async fn missing_resource_keeps_a_bodiless_connection() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    client
        .send(local_request(&proxy, "GET /res/missing.css HTTP/1.1", "\r\n").as_bytes())
        .await;
    let (head, body) = client.response().await;
    assert_eq!(status(&head), 404);
    assert!(String::from_utf8_lossy(&body).contains("/res/missing.css"));
    assert!(header(&head, "Connection").is_none());

    client
        .send(local_request(&proxy, "GET /res/blank.gif HTTP/1.1", "\r\n").as_bytes())
        .await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 200);
}

#[tokio::test]
async fn local_errors_with_unread_bodies_close_the_connection() {
    let proxy = start_proxy(|_| {}).await;
    let cases = [
        ("GET /res/missing.css HTTP/1.1", "Content-Length: 5\r\n\r\nXXXXX", 404),
        ("GET /unknown HTTP/1.1", "Content-Length: 5\r\n\r\nXXXXX", 404),
        ("OPTIONS / HTTP/1.1", "Content-Length: 5\r\n\r\nXXXXX", 501),
        ("TRACE / HTTP/1.1", "Content-Length: 5\r\n\r\nXXXXX", 501),
        ("DELETE /res/blank.gif HTTP/1.1", "Content-Length: 5\r\n\r\nXXXXX", 501),
        ("POST / HTTP/1.1", "Content-Length: five\r\n\r\nXXXXX", 400),
        ("POST / HTTP/1.1", "Transfer-Encoding: chunked\r\n\r\n5\r\nXXXXX\r\n0\r\n\r\n", 411),
    ];

    for (line, rest, expected) in cases {
        let mut client = Client::connect(proxy.addr).await;
        client.send(local_request(&proxy, line, rest).as_bytes()).await;
        let (head, _) = client.response().await;
        assert_eq!(status(&head), expected, "{line}");
        assert_eq!(header(&head, "Connection").as_deref(), Some("close"), "{line}");
        assert!(client.is_closed().await, "{line}");
    }
}

#[tokio::test]
async fn drained_post_body_keeps_the_connection() {
    let proxy = start_proxy(|_| {}).await;
    let mut client = Client::connect(proxy.addr).await;

    client
        .send(local_request(&proxy, "POST / HTTP/1.1", "Content-Length: 5\r\n\r\nXXXXX").as_bytes())
        .await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 501);
    assert!(header(&head, "Connection").is_none());

    client
        .send(local_request(&proxy, "GET / HTTP/1.1", "\r\n").as_bytes())
        .await;
    let (head, _) = client.response().await;
    assert_eq!(status(&head), 200);
}
